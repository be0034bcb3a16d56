//! In-memory reference backends
//!
//! Useful for dry runs of a scenario and for testing the metering layer
//! without a real database.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StoreResult;
use crate::store::{
    BlobStore, BlobValue, ListOptions, SqlCursor, SqlExecutor, SqlRow, TransactionBody,
};

/// Ordered in-memory key/value store
///
/// Transactions run against a staged copy that is committed only when the
/// body succeeds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, BlobValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: BTreeMap<String, BlobValue>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, BlobValue>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn into_entries(self) -> BTreeMap<String, BlobValue> {
        self.entries
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl BlobStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<BlobValue>> {
        Ok(self.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: BlobValue) -> StoreResult<()> {
        self.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.lock().remove(key).is_some())
    }

    fn list(&self, options: &ListOptions) -> StoreResult<BTreeMap<String, BlobValue>> {
        let entries = self.lock();
        let limit = options.limit.unwrap_or(usize::MAX);

        Ok(entries
            .iter()
            .filter(|(key, _)| options.matches(key))
            .take(limit)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn transaction(&self, body: &mut TransactionBody<'_>) -> StoreResult<()> {
        let staged = MemoryStore::from_entries(self.lock().clone());
        body(&staged)?;
        *self.lock() = staged.into_entries();
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ScriptedResponse {
    prefix: String,
    rows: Vec<SqlRow>,
    rows_written: Option<u64>,
}

/// Scripted SQL executor returning canned responses
///
/// Responses are matched by case-insensitive statement prefix, first match
/// wins. Unmatched statements yield an empty cursor.
#[derive(Debug, Default)]
pub struct MemorySql {
    responses: Vec<ScriptedResponse>,
    executed: Mutex<Vec<String>>,
}

impl MemorySql {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `rows` for statements starting with `prefix`
    pub fn respond(mut self, prefix: &str, rows: Vec<SqlRow>) -> Self {
        self.responses.push(ScriptedResponse {
            prefix: prefix.to_string(),
            rows,
            rows_written: None,
        });
        self
    }

    /// Report `rows_written` for statements starting with `prefix`
    pub fn respond_write(mut self, prefix: &str, rows_written: u64) -> Self {
        self.responses.push(ScriptedResponse {
            prefix: prefix.to_string(),
            rows: Vec::new(),
            rows_written: Some(rows_written),
        });
        self
    }

    /// Statements executed so far, in order
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SqlExecutor for MemorySql {
    type Cursor = MemoryCursor;

    fn exec(&self, query: &str, _params: &[serde_json::Value]) -> StoreResult<MemoryCursor> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.to_string());

        let normalized = query.trim_start().to_ascii_lowercase();
        let response = self
            .responses
            .iter()
            .find(|response| normalized.starts_with(&response.prefix.to_ascii_lowercase()));

        Ok(match response {
            Some(response) => MemoryCursor::new(response.rows.clone(), response.rows_written),
            None => MemoryCursor::new(Vec::new(), None),
        })
    }
}

/// Cursor over pre-materialized rows
#[derive(Debug)]
pub struct MemoryCursor {
    rows: std::vec::IntoIter<SqlRow>,
    rows_written: Option<u64>,
}

impl MemoryCursor {
    pub fn new(rows: Vec<SqlRow>, rows_written: Option<u64>) -> Self {
        Self {
            rows: rows.into_iter(),
            rows_written,
        }
    }
}

impl Iterator for MemoryCursor {
    type Item = SqlRow;

    fn next(&mut self) -> Option<SqlRow> {
        self.rows.next()
    }
}

impl SqlCursor for MemoryCursor {
    fn rows_written(&self) -> Option<u64> {
        self.rows_written
    }
}

/// Build a row from `(column, value)` pairs
pub fn row<I, K>(columns: I) -> SqlRow
where
    I: IntoIterator<Item = (K, serde_json::Value)>,
    K: Into<String>,
{
    columns
        .into_iter()
        .map(|(column, value)| (column.into(), value))
        .collect()
}
