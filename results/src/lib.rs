//! Blobmeter result log
//!
//! Benchmark measurements are persisted as one JSON object per line. The
//! [`ResultWriter`] buffers records and appends them from a background
//! worker; the [`ResultReader`] streams them back for filtering,
//! aggregation and run-to-run comparison.

pub mod analysis;
pub mod config;
pub mod error;
pub mod filter;
pub mod reader;
pub mod record;
pub mod stats;
pub mod writer;

// Re-export commonly used types
pub use analysis::{Comparison, GroupSummary, VfsSummary};
pub use config::{ReaderConfig, ResultsConfig, WriteMode, WriterConfig};
pub use error::{Result, ResultsError};
pub use filter::{FieldValue, RecordField, RecordFilter, SortOrder};
pub use reader::ResultReader;
pub use record::{BenchmarkRecord, Environment, RunId, SCHEMA_VERSION};
pub use stats::Distribution;
pub use writer::{ResultWriter, WriterStats};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global `tracing` subscriber
///
/// `RUST_LOG` takes precedence; otherwise blobmeter crates log at `level`.
/// Calling this again after a subscriber is installed does nothing.
pub fn init_logging(level: &str, json: bool) {
    let level = match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "blobmeter_interceptor={level},blobmeter_results={level},tokio=warn"
        ))
    });

    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}
