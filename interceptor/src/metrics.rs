//! Metrics model for metered storage sessions
//!
//! [`MetricsRecorder`] is the mutable accumulator shared by every wrapper an
//! [`Interceptor`](crate::Interceptor) hands out. [`Metrics`] is the immutable
//! snapshot derived from it, including amplification ratios and cost
//! estimates under a [`Pricing`] table.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TraceConfig;
use crate::store::QueryKind;

/// Kind of storage call observed by the interceptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Get,
    Put,
    Delete,
    List,
    SqlExec,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Get => write!(f, "get"),
            OperationKind::Put => write!(f, "put"),
            OperationKind::Delete => write!(f, "delete"),
            OperationKind::List => write!(f, "list"),
            OperationKind::SqlExec => write!(f, "sql_exec"),
        }
    }
}

/// One observed storage call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,

    /// Key or SQL text the call targeted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    pub bytes: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,

    pub duration_ms: f64,

    pub timestamp: DateTime<Utc>,
}

/// Per-million-unit pricing used for cost estimates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// Price per million read units (rows or blobs read)
    pub read_per_million: f64,

    /// Price per million write units (rows or blobs written)
    pub write_per_million: f64,
}

impl Pricing {
    pub fn new(read_per_million: f64, write_per_million: f64) -> Self {
        Self {
            read_per_million,
            write_per_million,
        }
    }

    /// Cost of `units` read units
    pub fn read_cost(&self, units: u64) -> f64 {
        units as f64 / 1_000_000.0 * self.read_per_million
    }

    /// Cost of `units` write units
    pub fn write_cost(&self, units: u64) -> f64 {
        units as f64 / 1_000_000.0 * self.write_per_million
    }
}

/// Raw counters accumulated for one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    /// Read calls issued (get, list, read-classified exec)
    pub read_ops: u64,
    /// Write calls issued (put, delete, write-classified exec)
    pub write_ops: u64,
    pub blobs_read: u64,
    pub blobs_written: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub rows_read: u64,
    pub rows_written: u64,
    pub storage_read_ms: f64,
    pub storage_write_ms: f64,
    pub logical_bytes_read: u64,
    pub logical_bytes_written: u64,
}

/// Point-in-time view of a session's counters with derived figures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub read_ops: u64,
    pub write_ops: u64,
    pub blobs_read: u64,
    pub blobs_written: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub rows_read: u64,
    pub rows_written: u64,
    pub storage_read_ms: f64,
    pub storage_write_ms: f64,
    pub logical_bytes_read: u64,
    pub logical_bytes_written: u64,
    pub write_amplification: f64,
    pub read_amplification: f64,
    pub estimated_read_cost: f64,
    pub estimated_write_cost: f64,
    pub estimated_total_cost: f64,
}

impl Metrics {
    /// Derive a snapshot from raw counters
    pub fn derive(counters: &Counters, pricing: &Pricing) -> Self {
        let estimated_read_cost = pricing.read_cost(counters.rows_read + counters.blobs_read);
        let estimated_write_cost =
            pricing.write_cost(counters.rows_written + counters.blobs_written);

        Self {
            read_ops: counters.read_ops,
            write_ops: counters.write_ops,
            blobs_read: counters.blobs_read,
            blobs_written: counters.blobs_written,
            bytes_read: counters.bytes_read,
            bytes_written: counters.bytes_written,
            rows_read: counters.rows_read,
            rows_written: counters.rows_written,
            storage_read_ms: counters.storage_read_ms,
            storage_write_ms: counters.storage_write_ms,
            logical_bytes_read: counters.logical_bytes_read,
            logical_bytes_written: counters.logical_bytes_written,
            write_amplification: amplification(
                counters.bytes_written,
                counters.logical_bytes_written,
            ),
            read_amplification: amplification(counters.bytes_read, counters.logical_bytes_read),
            estimated_read_cost,
            estimated_write_cost,
            estimated_total_cost: estimated_read_cost + estimated_write_cost,
        }
    }
}

/// Physical over logical bytes; 1.0 without a logical baseline, 0 when idle
pub fn amplification(physical: u64, logical: u64) -> f64 {
    if logical > 0 {
        physical as f64 / logical as f64
    } else if physical > 0 {
        1.0
    } else {
        0.0
    }
}

/// Bounded buffer of recent operations
#[derive(Debug)]
pub struct OperationTrace {
    capacity: usize,
    trim_to: usize,
    operations: VecDeque<Operation>,
}

impl OperationTrace {
    pub fn new(capacity: usize, trim_to: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            trim_to: trim_to.clamp(1, capacity),
            operations: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an operation, dropping the oldest entries on overflow
    pub fn push(&mut self, operation: Operation) {
        self.operations.push_back(operation);
        if self.operations.len() > self.capacity {
            let excess = self.operations.len() - self.trim_to;
            self.operations.drain(..excess);
            tracing::debug!(
                dropped = excess,
                retained = self.operations.len(),
                "Trimmed operation trace"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn clear(&mut self) {
        self.operations.clear();
    }

    pub fn to_vec(&self) -> Vec<Operation> {
        self.operations.iter().cloned().collect()
    }
}

#[derive(Debug)]
struct RecorderState {
    counters: Counters,
    trace: Option<OperationTrace>,
}

/// Mutable accumulator shared by all wrappers of one session
#[derive(Debug)]
pub struct MetricsRecorder {
    pricing: Pricing,
    state: Mutex<RecorderState>,
}

impl MetricsRecorder {
    /// Create an empty recorder; tracing is enabled when `trace.enabled`
    pub fn new(pricing: Pricing, trace: &TraceConfig) -> Self {
        let trace = trace
            .enabled
            .then(|| OperationTrace::new(trace.capacity, trace.trim_to));

        Self {
            pricing,
            state: Mutex::new(RecorderState {
                counters: Counters::default(),
                trace,
            }),
        }
    }

    pub fn pricing(&self) -> Pricing {
        self.pricing
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A `get` call; `hit_bytes` carries the value size when the key existed
    pub fn record_get(&self, key: &str, hit_bytes: Option<u64>, elapsed: Duration) {
        let mut state = self.lock();
        let duration_ms = elapsed_ms(elapsed);
        state.counters.read_ops += 1;
        state.counters.storage_read_ms += duration_ms;
        if let Some(bytes) = hit_bytes {
            state.counters.blobs_read += 1;
            state.counters.bytes_read += bytes;
        }
        push_trace(
            &mut state,
            OperationKind::Get,
            Some(key),
            hit_bytes.unwrap_or(0),
            None,
            duration_ms,
        );
    }

    pub fn record_put(&self, key: &str, bytes: u64, elapsed: Duration) {
        let mut state = self.lock();
        let duration_ms = elapsed_ms(elapsed);
        state.counters.write_ops += 1;
        state.counters.blobs_written += 1;
        state.counters.bytes_written += bytes;
        state.counters.storage_write_ms += duration_ms;
        push_trace(&mut state, OperationKind::Put, Some(key), bytes, None, duration_ms);
    }

    /// One delete call covering `keys` keys
    pub fn record_delete(&self, key: Option<&str>, keys: u64, elapsed: Duration) {
        let mut state = self.lock();
        let duration_ms = elapsed_ms(elapsed);
        state.counters.write_ops += 1;
        state.counters.blobs_written += keys;
        state.counters.storage_write_ms += duration_ms;
        push_trace(
            &mut state,
            OperationKind::Delete,
            key,
            0,
            Some(keys),
            duration_ms,
        );
    }

    pub fn record_list(&self, prefix: Option<&str>, entries: u64, bytes: u64, elapsed: Duration) {
        let mut state = self.lock();
        let duration_ms = elapsed_ms(elapsed);
        state.counters.read_ops += 1;
        state.counters.blobs_read += entries;
        state.counters.bytes_read += bytes;
        state.counters.storage_read_ms += duration_ms;
        push_trace(
            &mut state,
            OperationKind::List,
            prefix,
            bytes,
            Some(entries),
            duration_ms,
        );
    }

    /// An exec call; `rows_written` is only known for write statements
    pub fn record_exec(
        &self,
        query: &str,
        kind: QueryKind,
        rows_written: Option<u64>,
        elapsed: Duration,
    ) {
        let mut state = self.lock();
        let duration_ms = elapsed_ms(elapsed);
        match kind {
            QueryKind::Write => {
                state.counters.write_ops += 1;
                state.counters.rows_written += rows_written.unwrap_or(0);
                state.counters.storage_write_ms += duration_ms;
            }
            QueryKind::Read => {
                state.counters.read_ops += 1;
                state.counters.storage_read_ms += duration_ms;
            }
            QueryKind::Other => {}
        }
        push_trace(
            &mut state,
            OperationKind::SqlExec,
            Some(query),
            0,
            rows_written,
            duration_ms,
        );
    }

    /// Rows surfaced to the caller from a read cursor
    pub fn record_rows_read(&self, rows: u64) {
        self.lock().counters.rows_read += rows;
    }

    pub fn record_logical_write(&self, bytes: u64) {
        self.lock().counters.logical_bytes_written += bytes;
    }

    pub fn record_logical_read(&self, bytes: u64) {
        self.lock().counters.logical_bytes_read += bytes;
    }

    pub fn counters(&self) -> Counters {
        self.lock().counters.clone()
    }

    pub fn snapshot(&self) -> Metrics {
        let counters = self.counters();
        Metrics::derive(&counters, &self.pricing)
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.lock()
            .trace
            .as_ref()
            .map(OperationTrace::to_vec)
            .unwrap_or_default()
    }

    pub fn is_tracing(&self) -> bool {
        self.lock().trace.is_some()
    }

    /// Zero every counter and clear the trace buffer
    pub fn reset(&self) {
        let mut state = self.lock();
        state.counters = Counters::default();
        if let Some(trace) = state.trace.as_mut() {
            trace.clear();
        }
    }
}

fn elapsed_ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

fn push_trace(
    state: &mut RecorderState,
    kind: OperationKind,
    key: Option<&str>,
    bytes: u64,
    rows: Option<u64>,
    duration_ms: f64,
) {
    if let Some(trace) = state.trace.as_mut() {
        trace.push(Operation {
            kind,
            key: key.map(str::to_string),
            bytes,
            rows,
            duration_ms,
            timestamp: Utc::now(),
        });
    }
}
