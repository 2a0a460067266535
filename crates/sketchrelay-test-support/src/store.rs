//! Test stores: `SessionStore` doubles for exercising error paths and
//! asserting on write traffic.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use sketchrelay_core::document::{Document, FieldPath, FieldWrite};
use sketchrelay_core::error::SessionError;
use sketchrelay_core::store::{SessionStore, Subscription, TransactionBody};
use sketchrelay_store::memory::MemorySessionStore;

/// Converts a `json!` object literal into a [`Document`].
///
/// # Panics
///
/// Panics if `value` is not a JSON object.
#[must_use]
pub fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A store whose every operation fails with `PersistenceFailure`.
#[derive(Debug)]
pub struct FailingSessionStore;

fn unavailable() -> SessionError {
    SessionError::PersistenceFailure("connection refused".to_owned())
}

#[async_trait]
impl SessionStore for FailingSessionStore {
    async fn create(&self, _key: &str, _initial: Document) -> Result<(), SessionError> {
        Err(unavailable())
    }

    async fn get(&self, _key: &str) -> Result<Document, SessionError> {
        Err(unavailable())
    }

    async fn transact(
        &self,
        _key: &str,
        _body: &mut TransactionBody<'_>,
    ) -> Result<Document, SessionError> {
        Err(unavailable())
    }

    async fn delete_fields(&self, _key: &str, _paths: &[FieldPath]) -> Result<(), SessionError> {
        Err(unavailable())
    }

    async fn delete(&self, _key: &str) -> Result<(), SessionError> {
        Err(unavailable())
    }

    async fn subscribe(&self, _key: &str) -> Result<Subscription, SessionError> {
        Err(unavailable())
    }
}

/// One call observed by a [`RecordingSessionStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// `create` for the key.
    Create(String),
    /// `transact` for the key that committed at least one write.
    Commit(String),
    /// `delete` for the key.
    Delete(String),
}

/// An in-memory store that remembers which mutations reached it.
#[derive(Debug, Default)]
pub struct RecordingSessionStore {
    inner: MemorySessionStore,
    calls: Mutex<Vec<StoreCall>>,
}

impl RecordingSessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The backing in-memory store, for out-of-band writes.
    #[must_use]
    pub fn inner(&self) -> &MemorySessionStore {
        &self.inner
    }

    /// Returns a copy of every recorded call, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of committed transactions against `key`.
    #[must_use]
    pub fn commits_for(&self, key: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, StoreCall::Commit(k) if k == key))
            .count()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SessionStore for RecordingSessionStore {
    async fn create(&self, key: &str, initial: Document) -> Result<(), SessionError> {
        self.inner.create(key, initial).await?;
        self.record(StoreCall::Create(key.to_owned()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Document, SessionError> {
        self.inner.get(key).await
    }

    async fn transact(
        &self,
        key: &str,
        body: &mut TransactionBody<'_>,
    ) -> Result<Document, SessionError> {
        let mut wrote = false;
        let mut tracked = |current: &Document| -> Result<Vec<FieldWrite>, SessionError> {
            let writes = body(current)?;
            wrote = !writes.is_empty();
            Ok(writes)
        };
        let document = self.inner.transact(key, &mut tracked).await?;
        if wrote {
            self.record(StoreCall::Commit(key.to_owned()));
        }
        Ok(document)
    }

    async fn delete_fields(&self, key: &str, paths: &[FieldPath]) -> Result<(), SessionError> {
        self.inner.delete_fields(key, paths).await?;
        self.record(StoreCall::Commit(key.to_owned()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        self.inner.delete(key).await?;
        self.record(StoreCall::Delete(key.to_owned()));
        Ok(())
    }

    async fn subscribe(&self, key: &str) -> Result<Subscription, SessionError> {
        self.inner.subscribe(key).await
    }
}
