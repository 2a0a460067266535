//! Session store abstraction.
//!
//! The engine never talks to a database directly. It needs a keyed document
//! store with create-if-absent, point reads, field deletes, an atomic
//! read-modify-write primitive, and a change feed that pushes the full
//! document after every committed write.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::document::{Document, FieldPath, FieldWrite};
use crate::error::SessionError;

/// Body of a transaction: inspects the latest committed document and returns
/// the writes to commit. Returning `Err` aborts without writing.
///
/// The body may run more than once when concurrent writers conflict, so it
/// must derive everything from the document it is given.
pub type TransactionBody<'a> =
    dyn FnMut(&Document) -> Result<Vec<FieldWrite>, SessionError> + Send + 'a;

/// A change pushed to subscribers of one key.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentChange {
    /// The document after a committed write.
    Updated(Document),
    /// The document was deleted.
    Deleted,
}

/// Keyed document store with transactions and change subscriptions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates the document only if `key` is unused.
    ///
    /// # Errors
    ///
    /// `SessionError::AlreadyExists` if the key is taken,
    /// `SessionError::PersistenceFailure` on storage errors.
    async fn create(&self, key: &str, initial: Document) -> Result<(), SessionError>;

    /// Reads the latest committed document.
    ///
    /// # Errors
    ///
    /// `SessionError::NotFound` if the key is absent.
    async fn get(&self, key: &str) -> Result<Document, SessionError>;

    /// Atomically reads, runs `body`, and commits its writes. Conflicting
    /// concurrent commits cause `body` to be re-run against the fresh
    /// document. Returns the committed document. A body that returns no
    /// writes commits nothing and notifies nobody.
    ///
    /// # Errors
    ///
    /// `SessionError::NotFound` if the key is absent, any error returned by
    /// `body` (nothing is written), `SessionError::Conflict` once the retry
    /// budget is spent, `SessionError::PersistenceFailure` on storage errors.
    async fn transact(
        &self,
        key: &str,
        body: &mut TransactionBody<'_>,
    ) -> Result<Document, SessionError>;

    /// Removes the given fields.
    ///
    /// # Errors
    ///
    /// `SessionError::NotFound` if the key is absent.
    async fn delete_fields(&self, key: &str, paths: &[FieldPath]) -> Result<(), SessionError>;

    /// Deletes the document. Deleting an absent key succeeds.
    ///
    /// # Errors
    ///
    /// `SessionError::PersistenceFailure` on storage errors.
    async fn delete(&self, key: &str) -> Result<(), SessionError>;

    /// Subscribes to changes of `key`. The first item yielded is the current
    /// document when one exists.
    ///
    /// # Errors
    ///
    /// `SessionError::PersistenceFailure` if the feed cannot be established.
    async fn subscribe(&self, key: &str) -> Result<Subscription, SessionError>;
}

/// Handle on a change feed for one key. Dropping or cancelling it detaches.
pub struct Subscription {
    key: String,
    initial: Option<DocumentChange>,
    receiver: broadcast::Receiver<DocumentChange>,
    on_cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Wraps a broadcast receiver. `initial` is yielded before anything
    /// received from the channel.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        initial: Option<DocumentChange>,
        receiver: broadcast::Receiver<DocumentChange>,
    ) -> Self {
        Self {
            key: key.into(),
            initial,
            receiver,
            on_cancel: None,
        }
    }

    /// Registers a hook run once when the subscription is cancelled or
    /// dropped, e.g. to stop a backend listener task.
    #[must_use]
    pub fn with_cancel_hook(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    /// The key this subscription observes.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Waits for the next change. Returns `None` once the feed is closed.
    ///
    /// A subscriber that fell behind skips straight to the newest retained
    /// snapshots; every change carries the full document.
    pub async fn next(&mut self) -> Option<DocumentChange> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        loop {
            match self.receiver.recv().await {
                Ok(change) => return Some(change),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Detaches from the feed.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hook) = self.on_cancel.take() {
            hook();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("pending_initial", &self.initial.is_some())
            .finish_non_exhaustive()
    }
}
