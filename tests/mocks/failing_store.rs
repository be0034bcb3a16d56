use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use blobmeter_interceptor::{
    BlobStore, BlobValue, ListOptions, SqlExecutor, StoreError, StoreResult,
};
use blobmeter_interceptor::store::TransactionBody;

/// When a mock backend should fail
#[derive(Debug, Clone, Default)]
pub enum FailureMode {
    /// Never fail
    #[default]
    Never,
    /// Fail every call
    Always,
    /// Fail calls touching one of these keys
    Keys(HashSet<String>),
    /// Succeed for the first `n` calls, then fail
    AfterCalls(u64),
}

impl FailureMode {
    pub fn keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        FailureMode::Keys(keys.into_iter().map(Into::into).collect())
    }
}

/// Message carried by every injected error
pub const INJECTED_FAILURE: &str = "injected backend failure";

fn injected_error() -> StoreError {
    StoreError::backend(io::Error::new(io::ErrorKind::Other, INJECTED_FAILURE))
}

/// Blob store that forwards to `inner` and fails on demand
pub struct FailingStore<S> {
    inner: S,
    mode: FailureMode,
    calls: AtomicU64,
}

impl<S: BlobStore> FailingStore<S> {
    pub fn new(inner: S, mode: FailureMode) -> Self {
        Self {
            inner,
            mode,
            calls: AtomicU64::new(0),
        }
    }

    /// Calls received, failed ones included
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self, keys: &[&str]) -> StoreResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = match &self.mode {
            FailureMode::Never => false,
            FailureMode::Always => true,
            FailureMode::Keys(failing) => keys.iter().any(|key| failing.contains(*key)),
            FailureMode::AfterCalls(limit) => call >= *limit,
        };

        if fail {
            Err(injected_error())
        } else {
            Ok(())
        }
    }
}

impl<S: BlobStore> BlobStore for FailingStore<S> {
    fn get(&self, key: &str) -> StoreResult<Option<BlobValue>> {
        self.check(&[key])?;
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: BlobValue) -> StoreResult<()> {
        self.check(&[key])?;
        self.inner.put(key, value)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check(&[key])?;
        self.inner.delete(key)
    }

    fn delete_many(&self, keys: &[&str]) -> StoreResult<u64> {
        self.check(keys)?;
        self.inner.delete_many(keys)
    }

    fn list(&self, options: &ListOptions) -> StoreResult<BTreeMap<String, BlobValue>> {
        self.check(&[])?;
        self.inner.list(options)
    }

    fn transaction(&self, body: &mut TransactionBody<'_>) -> StoreResult<()> {
        self.check(&[])?;
        self.inner.transaction(body)
    }
}

/// SQL executor that forwards to `inner` and fails on demand
///
/// Key-based modes match against the statement text.
pub struct FailingSql<E> {
    inner: E,
    mode: FailureMode,
    calls: AtomicU64,
}

impl<E: SqlExecutor> FailingSql<E> {
    pub fn new(inner: E, mode: FailureMode) -> Self {
        Self {
            inner,
            mode,
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<E: SqlExecutor> SqlExecutor for FailingSql<E> {
    type Cursor = E::Cursor;

    fn exec(&self, query: &str, params: &[serde_json::Value]) -> StoreResult<E::Cursor> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = match &self.mode {
            FailureMode::Never => false,
            FailureMode::Always => true,
            FailureMode::Keys(failing) => failing.iter().any(|text| query.contains(text.as_str())),
            FailureMode::AfterCalls(limit) => call >= *limit,
        };

        if fail {
            return Err(injected_error());
        }
        self.inner.exec(query, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobmeter_interceptor::MemoryStore;

    #[test]
    fn test_fails_after_limit() {
        let store = FailingStore::new(MemoryStore::new(), FailureMode::AfterCalls(2));
        assert!(store.put("a", BlobValue::from("1")).is_ok());
        assert!(store.get("a").is_ok());
        assert!(store.get("a").is_err());
        assert_eq!(store.calls(), 3);
    }

    #[test]
    fn test_fails_on_listed_keys() {
        let store = FailingStore::new(MemoryStore::new(), FailureMode::keys(["bad"]));
        assert!(store.put("good", BlobValue::from("1")).is_ok());
        let error = store.put("bad", BlobValue::from("1")).unwrap_err();
        assert!(error.to_string().contains(INJECTED_FAILURE));
    }
}
