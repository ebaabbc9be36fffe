use crate::executor::DEFAULT_SHELL;
use crate::explainer::{COMMAND_SYSTEM_PROMPT, EXPLAIN_SYSTEM_PROMPT};
use crate::model_client::{GenerationProfile, DEFAULT_HOST};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub execution: ExecutionConfig,
    pub storage: StorageConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub host: String,
    pub command_model: String,
    pub explain_model: String,
    // Kept small so runaway generations are cut short
    pub command_max_tokens: u32,
    pub explain_max_tokens: u32,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutionConfig {
    pub shell: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    // Defaults to ~/.orbix/memory.db when unset
    pub database: Option<PathBuf>,
    pub history_limit: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    pub language: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            command_model: "phi3".to_string(),
            explain_model: "phi3".to_string(),
            command_max_tokens: 32,
            explain_max_tokens: 128,
            request_timeout_secs: 120,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: None,
            history_limit: 5,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
        }
    }
}

impl Config {
    /// Loads `~/.orbix/config.toml`, writing the defaults there first if missing.
    pub fn new() -> Result<Self> {
        Self::load_or_create(&Self::get_config_path())
    }

    pub fn load_or_create(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("invalid config at {}", config_path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_path)?;
            Ok(config)
        }
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(config_dir) = config_path.parent() {
            fs::create_dir_all(config_dir)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(config_path, content)?;
        Ok(())
    }

    fn get_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".orbix")
            .join("config.toml")
    }

    /// `OLLAMA_HOST` wins over the file; CLI flags are applied on top by the caller.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            let host = host.trim();
            if !host.is_empty() {
                self.model.host = normalize_host(host);
            }
        }
    }

    pub fn get_effective_language(&self) -> String {
        if self.display.language == "auto" {
            // Try to get system language
            std::env::var("LANG")
                .unwrap_or_else(|_| "en_US".to_string())
                .split('.')
                .next()
                .unwrap_or("en")
                .to_string()
        } else {
            self.display.language.clone()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database
            .clone()
            .unwrap_or_else(crate::store_manager::StoreManager::default_path)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution.timeout_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.model.request_timeout_secs.max(1))
    }

    pub fn command_profile(&self) -> GenerationProfile {
        GenerationProfile {
            model: self.model.command_model.clone(),
            system_prompt: COMMAND_SYSTEM_PROMPT.to_string(),
            max_tokens: self.model.command_max_tokens,
        }
    }

    pub fn explain_profile(&self) -> GenerationProfile {
        GenerationProfile {
            model: self.model.explain_model.clone(),
            system_prompt: EXPLAIN_SYSTEM_PROMPT.to_string(),
            max_tokens: self.model.explain_max_tokens,
        }
    }
}

// Ollama accepts a bare `host:port` in OLLAMA_HOST.
pub fn normalize_host(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", host.trim_end_matches('/'))
    }
}
