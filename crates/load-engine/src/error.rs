//! Error types for the load engine.
//!
//! Individual request failures are not errors at this level: they are
//! recorded as data by the [`crate::recorder::ResultRecorder`]. Only
//! conditions that stop a target or the whole invocation surface here.

use thiserror::Error;

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that abort a target or a whole invocation.
#[derive(Debug, Error)]
pub enum EngineError {
    // === Invocation-fatal ===
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to build HTTP client: {0}")]
    Http(String),

    // === Target-fatal ===
    #[error("Service '{service}' is unreachable: {reason}")]
    Unreachable { service: String, reason: String },

    // === Artifact persistence ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Build a configuration error from anything printable.
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Config(message.into())
    }

    /// True if this error means the invocation never generated traffic.
    pub fn is_config(&self) -> bool {
        matches!(self, EngineError::Config(_))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Config(format!("YAML error: {}", err))
    }
}

impl From<csv::Error> for EngineError {
    fn from(err: csv::Error) -> Self {
        EngineError::Serialization(format!("CSV error: {}", err))
    }
}
