//! Local persistence for interactions and preferences.
//!
//! One `SQLite` file holds two tables, created on open if absent:
//!
//! ```text
//! conversations(id, prompt, command, output, timestamp)   # append-only
//! preferences(key PRIMARY KEY, value)                     # upsert
//! ```

use crate::storage::{Conversation, Preference};
use chrono::{Local, SecondsFormat};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, StoreError>;

/// Where finished interactions go. The pipeline only ever saves; the
/// read-loop uses the rest.
pub trait Recorder {
    fn save_conversation(&self, prompt: &str, command: &str, output: &str) -> Result<()>;
    fn recent_conversations(&self, limit: usize) -> Result<Vec<Conversation>>;
    fn set_pref(&self, key: &str, value: &str) -> Result<()>;
    fn get_pref(&self, key: &str, default: &str) -> Result<String>;
    fn all_prefs(&self) -> Result<Vec<Preference>>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    prompt TEXT,
    command TEXT,
    output TEXT,
    timestamp TEXT
);
CREATE TABLE IF NOT EXISTS preferences (
    key TEXT PRIMARY KEY,
    value TEXT
);
";

pub struct StoreManager {
    conn: Connection,
}

impl StoreManager {
    /// Opens (or creates) the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        debug!(path = %path.display(), "opening store");
        Self::init(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Returns the default database path: `~/.orbix/memory.db`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".orbix")
            .join("memory.db")
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }
}

impl Recorder for StoreManager {
    fn save_conversation(&self, prompt: &str, command: &str, output: &str) -> Result<()> {
        let timestamp = Local::now().to_rfc3339_opts(SecondsFormat::Micros, false);
        self.conn.execute(
            "INSERT INTO conversations (prompt, command, output, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![prompt, command, output, timestamp],
        )?;
        Ok(())
    }

    fn recent_conversations(&self, limit: usize) -> Result<Vec<Conversation>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "SELECT id, prompt, command, output, timestamp FROM conversations ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(Conversation {
                id: row.get(0)?,
                prompt: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                command: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                output: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                timestamp: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<core::result::Result<Vec<_>, _>>()?)
    }

    fn set_pref(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn get_pref(&self, key: &str, default: &str) -> Result<String> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(value.unwrap_or_else(|| default.to_string()))
    }

    fn all_prefs(&self) -> Result<Vec<Preference>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM preferences ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok(Preference {
                key: row.get(0)?,
                value: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<core::result::Result<Vec<_>, _>>()?)
    }
}
