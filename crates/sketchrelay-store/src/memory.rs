//! In-process implementation of the `SessionStore` trait.
//!
//! Documents live in a mutex-protected map. Transactions are optimistic: the
//! body runs against a snapshot outside the lock, and the commit succeeds
//! only if no other writer bumped the document's version in the meantime.
//! The lock is never held across an await point.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use sketchrelay_core::document::{Document, FieldPath, FieldWrite, apply_writes};
use sketchrelay_core::error::SessionError;
use sketchrelay_core::store::{DocumentChange, SessionStore, Subscription, TransactionBody};

use crate::{CHANGE_CHANNEL_CAPACITY, DEFAULT_MAX_ATTEMPTS};

#[derive(Debug)]
struct Entry {
    document: Document,
    version: u64,
}

/// In-memory session store.
#[derive(Debug)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, Entry>>,
    channels: DashMap<String, broadcast::Sender<DocumentChange>>,
    max_attempts: u32,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    /// Creates an empty store with the default retry budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    /// Creates an empty store that runs a transaction body at most
    /// `max_attempts` times.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            channels: DashMap::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Number of documents currently stored.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::PersistenceFailure` if the store mutex is
    /// poisoned.
    pub fn len(&self) -> Result<usize, SessionError> {
        Ok(self.lock()?.len())
    }

    /// Returns `true` if no documents are stored.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::PersistenceFailure` if the store mutex is
    /// poisoned.
    pub fn is_empty(&self) -> Result<bool, SessionError> {
        Ok(self.lock()?.is_empty())
    }

    /// Applies `writes` immediately, bumping the version and notifying
    /// subscribers. Used for non-transactional field updates.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` if `key` is absent, or
    /// `SessionError::InvalidState` if a write cannot be applied.
    pub fn write_now(&self, key: &str, writes: &[FieldWrite]) -> Result<Document, SessionError> {
        let mut entries = self.lock()?;
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| SessionError::NotFound(key.to_owned()))?;
        let mut next = entry.document.clone();
        apply_writes(&mut next, writes)?;
        entry.document = next.clone();
        entry.version += 1;
        self.publish(key, DocumentChange::Updated(next.clone()));
        Ok(next)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, SessionError> {
        self.entries
            .lock()
            .map_err(|e| SessionError::PersistenceFailure(format!("store mutex poisoned: {e}")))
    }

    fn snapshot(&self, key: &str) -> Result<(Document, u64), SessionError> {
        let entries = self.lock()?;
        let entry = entries
            .get(key)
            .ok_or_else(|| SessionError::NotFound(key.to_owned()))?;
        Ok((entry.document.clone(), entry.version))
    }

    // Called with the entries lock held so that subscribers observe commits
    // in version order.
    fn publish(&self, key: &str, change: DocumentChange) {
        if let Some(sender) = self.channels.get(key) {
            match sender.send(change) {
                Ok(count) => debug!(key, subscribers = count, "published change"),
                Err(_) => debug!(key, "no subscribers for change"),
            }
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, key: &str, initial: Document) -> Result<(), SessionError> {
        let mut entries = self.lock()?;
        if entries.contains_key(key) {
            return Err(SessionError::AlreadyExists(key.to_owned()));
        }
        entries.insert(
            key.to_owned(),
            Entry {
                document: initial.clone(),
                version: 0,
            },
        );
        self.publish(key, DocumentChange::Updated(initial));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Document, SessionError> {
        self.snapshot(key).map(|(document, _)| document)
    }

    async fn transact(
        &self,
        key: &str,
        body: &mut TransactionBody<'_>,
    ) -> Result<Document, SessionError> {
        for attempt in 1..=self.max_attempts {
            let (snapshot, read_version) = self.snapshot(key)?;
            let writes = body(&snapshot)?;
            if writes.is_empty() {
                return Ok(snapshot);
            }
            let mut next = snapshot;
            apply_writes(&mut next, &writes)?;

            {
                let mut entries = self.lock()?;
                let entry = entries
                    .get_mut(key)
                    .ok_or_else(|| SessionError::NotFound(key.to_owned()))?;
                if entry.version == read_version {
                    entry.document = next.clone();
                    entry.version += 1;
                    self.publish(key, DocumentChange::Updated(next.clone()));
                    return Ok(next);
                }
            }

            debug!(key, attempt, "transaction conflicted, retrying");
            tokio::task::yield_now().await;
        }

        Err(SessionError::Conflict {
            key: key.to_owned(),
            attempts: self.max_attempts,
        })
    }

    async fn delete_fields(&self, key: &str, paths: &[FieldPath]) -> Result<(), SessionError> {
        let writes: Vec<FieldWrite> = paths.iter().cloned().map(FieldWrite::Delete).collect();
        self.write_now(key, &writes).map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        let mut entries = self.lock()?;
        if entries.remove(key).is_some() {
            self.publish(key, DocumentChange::Deleted);
        }
        // Dropping the sender closes the feed once subscribers drain it.
        self.channels.remove(key);
        Ok(())
    }

    async fn subscribe(&self, key: &str) -> Result<Subscription, SessionError> {
        let entries = self.lock()?;
        let receiver = self
            .channels
            .entry(key.to_owned())
            .or_insert_with(|| broadcast::channel(CHANGE_CHANNEL_CAPACITY).0)
            .subscribe();
        let initial = entries
            .get(key)
            .map(|entry| DocumentChange::Updated(entry.document.clone()));
        Ok(Subscription::new(key, initial, receiver))
    }
}
