//! Blobmeter storage interceptor
//!
//! This library meters storage traffic without the backend's cooperation.
//! Wrap any [`BlobStore`] or [`SqlExecutor`] through an [`Interceptor`] and
//! every completed call updates a shared [`MetricsRecorder`]; snapshots carry
//! amplification ratios and cost estimates under a [`Pricing`] table.

pub mod config;
pub mod error;
pub mod interceptor;
pub mod memory;
pub mod metrics;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use config::{MeterConfig, PricingConfig, TraceConfig};
pub use error::{ConfigError, ConfigResult, StoreError, StoreResult};
pub use interceptor::{Interceptor, MeteredCursor, MeteredSql, MeteredStore};
pub use memory::{MemoryCursor, MemorySql, MemoryStore};
pub use metrics::{Counters, Metrics, MetricsRecorder, Operation, OperationKind, Pricing};
pub use session::{OperationBreakdown, SessionAggregator, SessionSample, SessionSummary};
pub use store::{
    run_transaction, BlobStore, BlobValue, ListOptions, QueryKind, SqlCursor, SqlExecutor, SqlRow,
};
