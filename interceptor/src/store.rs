//! Backend contracts consumed by the interceptor
//!
//! Any key/value backend implements [`BlobStore`]; any SQL engine implements
//! [`SqlExecutor`] with a [`SqlCursor`]. The interceptor requires nothing
//! else from the storage being measured.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{StoreError, StoreResult};

/// One opaque value stored under a key
#[derive(Debug, Clone, PartialEq)]
pub enum BlobValue {
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
}

impl BlobValue {
    /// Size used for byte accounting
    ///
    /// Bytes count their length, text its UTF-8 length, anything else its
    /// JSON encoding.
    pub fn estimated_size(&self) -> u64 {
        match self {
            BlobValue::Bytes(bytes) => bytes.len() as u64,
            BlobValue::Text(text) => text.len() as u64,
            BlobValue::Json(value) => estimate_size(value),
        }
    }
}

impl From<Vec<u8>> for BlobValue {
    fn from(bytes: Vec<u8>) -> Self {
        BlobValue::Bytes(bytes)
    }
}

impl From<&[u8]> for BlobValue {
    fn from(bytes: &[u8]) -> Self {
        BlobValue::Bytes(bytes.to_vec())
    }
}

impl From<String> for BlobValue {
    fn from(text: String) -> Self {
        BlobValue::Text(text)
    }
}

impl From<&str> for BlobValue {
    fn from(text: &str) -> Self {
        BlobValue::Text(text.to_string())
    }
}

impl From<serde_json::Value> for BlobValue {
    fn from(value: serde_json::Value) -> Self {
        BlobValue::Json(value)
    }
}

/// Encoded JSON length of `value`, or 0 when it cannot be serialized
pub fn estimate_size<T: Serialize + ?Sized>(value: &T) -> u64 {
    serde_json::to_vec(value)
        .map(|encoded| encoded.len() as u64)
        .unwrap_or(0)
}

/// Range and paging options for [`BlobStore::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub prefix: Option<String>,
    /// Inclusive lower bound
    pub start: Option<String>,
    /// Exclusive upper bound
    pub end: Option<String>,
    pub limit: Option<usize>,
}

impl ListOptions {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn range(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self.end = Some(end.into());
        self
    }

    /// Whether `key` falls inside the prefix and range bounds
    pub fn matches(&self, key: &str) -> bool {
        if let Some(prefix) = &self.prefix {
            if !key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(start) = &self.start {
            if key < start.as_str() {
                return false;
            }
        }
        if let Some(end) = &self.end {
            if key >= end.as_str() {
                return false;
            }
        }
        true
    }
}

/// Transaction body; receives the transactional handle
pub type TransactionBody<'a> = dyn FnMut(&dyn BlobStore) -> StoreResult<()> + 'a;

/// Key/value storage backend
pub trait BlobStore {
    fn get(&self, key: &str) -> StoreResult<Option<BlobValue>>;

    fn put(&self, key: &str, value: BlobValue) -> StoreResult<()>;

    /// Returns whether the key existed
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete several keys, returning how many existed
    fn delete_many(&self, keys: &[&str]) -> StoreResult<u64> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(key)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn list(&self, options: &ListOptions) -> StoreResult<BTreeMap<String, BlobValue>>;

    /// Run `body` against a transactional handle
    fn transaction(&self, body: &mut TransactionBody<'_>) -> StoreResult<()>;
}

impl<T: BlobStore + ?Sized> BlobStore for &T {
    fn get(&self, key: &str) -> StoreResult<Option<BlobValue>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: BlobValue) -> StoreResult<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        (**self).delete(key)
    }

    fn delete_many(&self, keys: &[&str]) -> StoreResult<u64> {
        (**self).delete_many(keys)
    }

    fn list(&self, options: &ListOptions) -> StoreResult<BTreeMap<String, BlobValue>> {
        (**self).list(options)
    }

    fn transaction(&self, body: &mut TransactionBody<'_>) -> StoreResult<()> {
        (**self).transaction(body)
    }
}

impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    fn get(&self, key: &str) -> StoreResult<Option<BlobValue>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: BlobValue) -> StoreResult<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        (**self).delete(key)
    }

    fn delete_many(&self, keys: &[&str]) -> StoreResult<u64> {
        (**self).delete_many(keys)
    }

    fn list(&self, options: &ListOptions) -> StoreResult<BTreeMap<String, BlobValue>> {
        (**self).list(options)
    }

    fn transaction(&self, body: &mut TransactionBody<'_>) -> StoreResult<()> {
        (**self).transaction(body)
    }
}

/// Run a transaction whose body produces a value
pub fn run_transaction<S, T, F>(store: &S, mut body: F) -> StoreResult<T>
where
    S: BlobStore + ?Sized,
    F: FnMut(&dyn BlobStore) -> StoreResult<T>,
{
    let mut output = None;
    store.transaction(&mut |txn: &dyn BlobStore| {
        output = Some(body(txn)?);
        Ok(())
    })?;

    output.ok_or_else(|| StoreError::TransactionAborted {
        reason: "transaction body was never invoked".to_string(),
    })
}

/// One result row: column name to value
pub type SqlRow = serde_json::Map<String, serde_json::Value>;

/// How a statement affects storage, judged by its leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Read,
    Write,
    Other,
}

impl QueryKind {
    pub fn classify(query: &str) -> Self {
        let keyword = query
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
            .next()
            .unwrap_or("");

        if keyword.eq_ignore_ascii_case("SELECT") {
            return QueryKind::Read;
        }

        const WRITE_KEYWORDS: [&str; 6] = ["INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER"];
        if WRITE_KEYWORDS
            .iter()
            .any(|write| keyword.eq_ignore_ascii_case(write))
        {
            QueryKind::Write
        } else {
            QueryKind::Other
        }
    }
}

/// Rows produced by one executed statement
pub trait SqlCursor: Iterator<Item = SqlRow> {
    /// Rows modified by the statement, when the backend reports it
    fn rows_written(&self) -> Option<u64> {
        None
    }
}

/// SQL execution backend
pub trait SqlExecutor {
    type Cursor: SqlCursor;

    fn exec(&self, query: &str, params: &[serde_json::Value]) -> StoreResult<Self::Cursor>;
}

impl<E: SqlExecutor + ?Sized> SqlExecutor for &E {
    type Cursor = E::Cursor;

    fn exec(&self, query: &str, params: &[serde_json::Value]) -> StoreResult<Self::Cursor> {
        (**self).exec(query, params)
    }
}

impl<E: SqlExecutor + ?Sized> SqlExecutor for Arc<E> {
    type Cursor = E::Cursor;

    fn exec(&self, query: &str, params: &[serde_json::Value]) -> StoreResult<Self::Cursor> {
        (**self).exec(query, params)
    }
}
