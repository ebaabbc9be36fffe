use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: i64,           // Row id, monotonically increasing
    pub prompt: String,    // Natural-language request
    pub command: String,   // Command that was executed
    pub output: String,    // Reported output (never empty)
    pub timestamp: String, // ISO-8601 local time of the save
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Preference {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub output: String,         // stdout, else stderr, else the "No output." sentinel
    pub timed_out: bool,        // Killed after the configured timeout
    pub failed: bool,           // Shell could not be spawned or waited on
    pub exit_code: Option<i32>, // None when killed, failed, or terminated by signal
    pub duration_ms: u64,       // Wall-clock time until exit or kill
}
