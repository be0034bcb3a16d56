//! Metering decorators for storage backends
//!
//! An [`Interceptor`] owns one session's [`MetricsRecorder`] and hands out
//! wrappers that implement the same traits as the backend they wrap. Every
//! call is forwarded unchanged; only completed calls update the counters.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{MeterConfig, TraceConfig};
use crate::error::{StoreError, StoreResult};
use crate::metrics::{Metrics, MetricsRecorder, Operation, Pricing};
use crate::store::{
    BlobStore, BlobValue, ListOptions, QueryKind, SqlCursor, SqlExecutor, SqlRow, TransactionBody,
};

/// Entry point for one metered session
///
/// Cloning an interceptor shares its recorder, so wrappers produced by
/// clones report into the same metrics.
#[derive(Debug, Clone)]
pub struct Interceptor {
    recorder: Arc<MetricsRecorder>,
}

impl Interceptor {
    /// Interceptor with tracing disabled
    pub fn new(pricing: Pricing) -> Self {
        Self {
            recorder: Arc::new(MetricsRecorder::new(pricing, &TraceConfig::default())),
        }
    }

    pub fn with_config(config: &MeterConfig) -> Self {
        Self {
            recorder: Arc::new(MetricsRecorder::new(
                config.pricing.pricing(),
                &config.trace,
            )),
        }
    }

    /// Wrap a key/value backend
    pub fn wrap_store<S: BlobStore>(&self, store: S) -> MeteredStore<S> {
        MeteredStore {
            inner: store,
            recorder: Arc::clone(&self.recorder),
        }
    }

    /// Wrap a SQL backend
    pub fn wrap_sql<E: SqlExecutor>(&self, executor: E) -> MeteredSql<E> {
        MeteredSql {
            inner: executor,
            recorder: Arc::clone(&self.recorder),
        }
    }

    /// Declare the payload size the caller intended to write
    pub fn record_logical_write(&self, bytes: u64) {
        self.recorder.record_logical_write(bytes);
    }

    /// Declare the payload size the caller intended to read
    pub fn record_logical_read(&self, bytes: u64) {
        self.recorder.record_logical_read(bytes);
    }

    pub fn metrics(&self) -> Metrics {
        self.recorder.snapshot()
    }

    pub fn reset(&self) {
        self.recorder.reset();
        tracing::debug!("Interceptor metrics reset");
    }

    /// Retained operations, oldest first; empty unless tracing is enabled
    pub fn operations(&self) -> Vec<Operation> {
        self.recorder.operations()
    }

    /// Retained operations as a JSON array
    pub fn export_operations(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.recorder.operations())
    }

    pub fn recorder(&self) -> &Arc<MetricsRecorder> {
        &self.recorder
    }
}

/// Key/value backend wrapped with metering
#[derive(Debug)]
pub struct MeteredStore<S> {
    inner: S,
    recorder: Arc<MetricsRecorder>,
}

impl<S: BlobStore> MeteredStore<S> {
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: BlobStore> BlobStore for MeteredStore<S> {
    fn get(&self, key: &str) -> StoreResult<Option<BlobValue>> {
        let start = Instant::now();
        let value = self.inner.get(key)?;
        let hit_bytes = value.as_ref().map(BlobValue::estimated_size);
        self.recorder.record_get(key, hit_bytes, start.elapsed());
        Ok(value)
    }

    fn put(&self, key: &str, value: BlobValue) -> StoreResult<()> {
        let bytes = value.estimated_size();
        let start = Instant::now();
        self.inner.put(key, value)?;
        self.recorder.record_put(key, bytes, start.elapsed());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let start = Instant::now();
        let existed = self.inner.delete(key)?;
        self.recorder.record_delete(Some(key), 1, start.elapsed());
        Ok(existed)
    }

    fn delete_many(&self, keys: &[&str]) -> StoreResult<u64> {
        let start = Instant::now();
        let deleted = self.inner.delete_many(keys)?;
        self.recorder
            .record_delete(None, keys.len() as u64, start.elapsed());
        Ok(deleted)
    }

    fn list(&self, options: &ListOptions) -> StoreResult<BTreeMap<String, BlobValue>> {
        let start = Instant::now();
        let entries = self.inner.list(options)?;
        let elapsed = start.elapsed();
        let bytes = entries.values().map(BlobValue::estimated_size).sum();
        self.recorder.record_list(
            options.prefix.as_deref(),
            entries.len() as u64,
            bytes,
            elapsed,
        );
        Ok(entries)
    }

    fn transaction(&self, body: &mut TransactionBody<'_>) -> StoreResult<()> {
        let recorder = &self.recorder;
        self.inner.transaction(&mut |txn: &dyn BlobStore| {
            let metered = MeteredStore {
                inner: txn,
                recorder: Arc::clone(recorder),
            };
            body(&metered)
        })
    }
}

/// SQL backend wrapped with metering
#[derive(Debug)]
pub struct MeteredSql<E> {
    inner: E,
    recorder: Arc<MetricsRecorder>,
}

impl<E: SqlExecutor> MeteredSql<E> {
    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E: SqlExecutor> SqlExecutor for MeteredSql<E> {
    type Cursor = MeteredCursor<E::Cursor>;

    fn exec(&self, query: &str, params: &[serde_json::Value]) -> StoreResult<Self::Cursor> {
        let kind = QueryKind::classify(query);
        let start = Instant::now();
        let cursor = self.inner.exec(query, params)?;
        let elapsed = start.elapsed();

        let rows_written = match kind {
            QueryKind::Write => cursor.rows_written(),
            _ => None,
        };
        self.recorder
            .record_exec(query, kind, rows_written, elapsed);

        Ok(MeteredCursor {
            inner: cursor,
            count_rows: kind == QueryKind::Read,
            consumed: 0,
            recorder: Arc::clone(&self.recorder),
        })
    }
}

/// Cursor that counts rows as the caller consumes them
#[derive(Debug)]
pub struct MeteredCursor<C> {
    inner: C,
    count_rows: bool,
    consumed: u64,
    recorder: Arc<MetricsRecorder>,
}

impl<C: SqlCursor> MeteredCursor<C> {
    /// Drain every remaining row
    pub fn to_array(self) -> Vec<SqlRow> {
        self.collect()
    }

    /// Take the next row only; remaining rows are never surfaced
    pub fn one(mut self) -> StoreResult<SqlRow> {
        self.next().ok_or(StoreError::NoRows)
    }

    /// Rows surfaced through this cursor so far
    pub fn rows_consumed(&self) -> u64 {
        self.consumed
    }
}

impl<C: SqlCursor> Iterator for MeteredCursor<C> {
    type Item = SqlRow;

    fn next(&mut self) -> Option<SqlRow> {
        let row = self.inner.next()?;
        self.consumed += 1;
        if self.count_rows {
            self.recorder.record_rows_read(1);
        }
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<C: SqlCursor> SqlCursor for MeteredCursor<C> {
    fn rows_written(&self) -> Option<u64> {
        self.inner.rows_written()
    }
}
