//! Error handling for the result log
//!
//! Readers treat missing files as empty and skip malformed lines, so most
//! errors here come from the write path or from bad query input.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for result log operations
#[derive(Error, Debug)]
pub enum ResultsError {
    /// I/O failure against a log file
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Benchmark name pattern is not a valid regex
    #[error("Invalid name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Field name does not exist on a record or is not usable here
    #[error("Unknown or non-numeric record field: {name}")]
    UnknownField { name: String },

    /// Writer was used after `close()`
    #[error("Result writer is closed")]
    WriterClosed,

    /// Background flush worker is gone
    #[error("Flush worker unavailable: {reason}")]
    WorkerUnavailable { reason: String },

    /// Configuration errors
    #[error("Configuration error: {reason}")]
    Config { reason: String },
}

/// Result type alias for result log operations
pub type Result<T> = std::result::Result<T, ResultsError>;

impl ResultsError {
    /// Attach the offending path to an I/O error
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ResultsError::Io {
            path: path.into(),
            source,
        }
    }

    /// Check if retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResultsError::Io { .. })
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ResultsError::Io { .. } => "io",
            ResultsError::Serialization(_) => "serialization",
            ResultsError::InvalidPattern(_) => "query",
            ResultsError::UnknownField { .. } => "query",
            ResultsError::WriterClosed => "writer",
            ResultsError::WorkerUnavailable { .. } => "writer",
            ResultsError::Config { .. } => "config",
        }
    }
}

impl From<toml::de::Error> for ResultsError {
    fn from(error: toml::de::Error) -> Self {
        ResultsError::Config {
            reason: error.to_string(),
        }
    }
}

impl From<toml::ser::Error> for ResultsError {
    fn from(error: toml::ser::Error) -> Self {
        ResultsError::Config {
            reason: error.to_string(),
        }
    }
}
