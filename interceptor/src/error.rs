//! Error handling for the blobmeter interceptor
//!
//! Backend failures travel through the interceptor untouched as
//! [`StoreError`]; the interceptor never invents errors of its own for a
//! storage call. Configuration loading has its own [`ConfigError`].

use std::error::Error as StdError;
use std::io;

use thiserror::Error;

/// Errors surfaced by a storage backend or the metered wrappers around it
#[derive(Error, Debug)]
pub enum StoreError {
    /// Error raised by the wrapped backend, forwarded unchanged
    #[error("Backend error: {0}")]
    Backend(#[source] Box<dyn StdError + Send + Sync>),

    /// Key was required but absent
    #[error("Key not found: {key}")]
    NotFound { key: String },

    /// `one()` was called on a cursor that produced no rows
    #[error("Query returned no rows")]
    NoRows,

    /// Transaction body failed or never produced a value
    #[error("Transaction aborted: {reason}")]
    TransactionAborted { reason: String },

    /// Backend does not implement the requested operation
    #[error("Operation not supported by backend: {operation}")]
    Unsupported { operation: String },
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration parsing error: {reason}")]
    Parse { reason: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    Validation { reason: String },
}

/// Result type for storage calls
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl StoreError {
    /// Wrap an arbitrary backend error without altering it
    pub fn backend<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(error))
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            StoreError::Backend(_) => "backend",
            StoreError::NotFound { .. } => "not_found",
            StoreError::NoRows => "no_rows",
            StoreError::TransactionAborted { .. } => "transaction",
            StoreError::Unsupported { .. } => "unsupported",
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(error: toml::de::Error) -> Self {
        ConfigError::Parse {
            reason: error.to_string(),
        }
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(error: toml::ser::Error) -> Self {
        ConfigError::Parse {
            reason: error.to_string(),
        }
    }
}
