// Dealwatch Atoms: Error Types
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain, matching the error kinds in §7.
//   • `#[from]` wires std/external error conversions automatically.
//   • No variant carries CRM/LLM credentials in its message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Enrichment feed CSV parsing failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Criteria failed validation at agent creation (§7 InvalidCriteria).
    #[error("Invalid criteria: {0}")]
    InvalidCriteria(String),

    /// Lifecycle command on a cancelled/completed agent (§7 TerminalState).
    #[error("Agent {0} is in a terminal state")]
    TerminalState(String),

    /// Lifecycle command not legal from the agent's current status
    /// (e.g. resume on a non-paused agent).
    #[error("Illegal transition: {0}")]
    IllegalTransition(String),

    /// `force_check` against an agent that already has a check in flight.
    #[error("Agent {0} already has a check in progress")]
    Busy(String),

    /// Match Engine invoked with no current corpus snapshot.
    #[error("No corpus snapshot is available")]
    NoCorpus,

    /// Agent, client, criteria, or match id not found.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Storage or CRM transient error, already retried per policy.
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// CRM 4xx (other than 429) or malformed field mapping — event is dead.
    #[error("Permanent I/O error: {0}")]
    PermanentIo(String),

    /// Per-check wall-clock budget exhausted.
    #[error("Check timed out after {0:?}")]
    TimeoutExceeded(std::time::Duration),

    /// Engine or server configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    #[error("{0}")]
    Other(String),
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
