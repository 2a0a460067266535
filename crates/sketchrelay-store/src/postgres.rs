//! `PostgreSQL` implementation of the `SessionStore` trait.
//!
//! Each session is a single JSONB row. Transactions take a row lock with
//! `SELECT ... FOR UPDATE`, so concurrent writers queue up instead of
//! clobbering each other; serialization failures and deadlocks are retried.
//! Every commit issues `pg_notify` with the session key. A single
//! `PgListener` per store receives those notifications, re-reads the row and
//! fans the document out to the per-key broadcast channels, so subscribers
//! never hold a pooled connection of their own.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sketchrelay_core::document::{Document, FieldPath, FieldWrite, apply_writes};
use sketchrelay_core::error::SessionError;
use sketchrelay_core::store::{DocumentChange, SessionStore, Subscription, TransactionBody};

use crate::schema::CHANGE_CHANNEL;
use crate::{CHANGE_CHANNEL_CAPACITY, DEFAULT_MAX_ATTEMPTS};

type Channels = DashMap<String, broadcast::Sender<DocumentChange>>;

/// PostgreSQL-backed session store.
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
    max_attempts: u32,
    fanout: Arc<Fanout>,
}

/// The store's shared change listener and its per-key channels.
#[derive(Debug, Default)]
struct Fanout {
    channels: Arc<Channels>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Fanout {
    fn drop(&mut self) {
        if let Some(task) = self.listener.get_mut().take() {
            task.abort();
        }
    }
}

impl PgSessionStore {
    /// Creates a new `PgSessionStore` with the default retry budget.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_max_attempts(pool, DEFAULT_MAX_ATTEMPTS)
    }

    /// Creates a new `PgSessionStore` that retries a transaction at most
    /// `max_attempts` times.
    #[must_use]
    pub fn with_max_attempts(pool: PgPool, max_attempts: u32) -> Self {
        Self {
            pool,
            max_attempts: max_attempts.max(1),
            fanout: Arc::default(),
        }
    }

    /// Number of keys with a live change channel.
    #[must_use]
    pub fn watched_keys(&self) -> usize {
        self.fanout.channels.len()
    }

    /// Starts the shared listener unless it is already running. Returns once
    /// `LISTEN` is in effect.
    async fn ensure_listener(&self) -> Result<(), SessionError> {
        let mut running = self.fanout.listener.lock().await;
        if running.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(persistence)?;
        listener.listen(CHANGE_CHANNEL).await.map_err(persistence)?;
        info!(channel = CHANGE_CHANNEL, "session change listener started");

        let pool = self.pool.clone();
        let channels = Arc::clone(&self.fanout.channels);
        *running = Some(tokio::spawn(relay_notifications(listener, pool, channels)));
        Ok(())
    }

    async fn notify(
        executor: &mut Transaction<'_, Postgres>,
        key: &str,
    ) -> Result<(), SessionError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CHANGE_CHANNEL)
            .bind(key)
            .execute(&mut **executor)
            .await
            .map_err(persistence)?;
        Ok(())
    }

    // Dropping `tx` on any early return rolls the transaction back.
    async fn try_transact(
        &self,
        key: &str,
        body: &mut TransactionBody<'_>,
    ) -> Result<Document, AttemptError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<Json<Value>> =
            sqlx::query_scalar("SELECT document FROM sessions WHERE key = $1 FOR UPDATE")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(Json(current)) = row else {
            return Err(AttemptError::Aborted(SessionError::NotFound(key.to_owned())));
        };
        let current = into_document(key, current).map_err(AttemptError::Aborted)?;

        let writes = body(&current).map_err(AttemptError::Aborted)?;
        if writes.is_empty() {
            return Ok(current);
        }
        let mut next = current;
        apply_writes(&mut next, &writes).map_err(AttemptError::Aborted)?;

        sqlx::query(
            "UPDATE sessions SET document = $2, version = version + 1, updated_at = NOW() \
             WHERE key = $1",
        )
        .bind(key)
        .bind(Json(Value::Object(next.clone())))
        .execute(&mut *tx)
        .await?;
        Self::notify(&mut tx, key)
            .await
            .map_err(AttemptError::Aborted)?;

        tx.commit().await?;
        Ok(next)
    }
}

/// Outcome of a single failed transaction attempt.
#[derive(Debug)]
enum AttemptError {
    /// The database rejected the attempt; may be transient.
    Sql(sqlx::Error),
    /// The body or document decoding refused to commit.
    Aborted(SessionError),
}

impl From<sqlx::Error> for AttemptError {
    fn from(err: sqlx::Error) -> Self {
        Self::Sql(err)
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, key: &str, initial: Document) -> Result<(), SessionError> {
        let mut tx = self.pool.begin().await.map_err(persistence)?;
        let result = sqlx::query(
            "INSERT INTO sessions (key, document) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(Json(Value::Object(initial)))
        .execute(&mut *tx)
        .await
        .map_err(persistence)?;

        if result.rows_affected() == 0 {
            return Err(SessionError::AlreadyExists(key.to_owned()));
        }
        Self::notify(&mut tx, key).await?;
        tx.commit().await.map_err(persistence)
    }

    async fn get(&self, key: &str) -> Result<Document, SessionError> {
        let row: Option<Json<Value>> =
            sqlx::query_scalar("SELECT document FROM sessions WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(persistence)?;
        match row {
            Some(Json(value)) => into_document(key, value),
            None => Err(SessionError::NotFound(key.to_owned())),
        }
    }

    async fn transact(
        &self,
        key: &str,
        body: &mut TransactionBody<'_>,
    ) -> Result<Document, SessionError> {
        for attempt in 1..=self.max_attempts {
            match self.try_transact(key, body).await {
                Ok(document) => return Ok(document),
                Err(AttemptError::Aborted(err)) => return Err(err),
                Err(AttemptError::Sql(err)) if is_transient(&err) => {
                    debug!(key, attempt, error = %err, "transaction conflicted, retrying");
                }
                Err(AttemptError::Sql(err)) => return Err(persistence(err)),
            }
        }
        Err(SessionError::Conflict {
            key: key.to_owned(),
            attempts: self.max_attempts,
        })
    }

    async fn delete_fields(&self, key: &str, paths: &[FieldPath]) -> Result<(), SessionError> {
        let writes: Vec<FieldWrite> = paths.iter().cloned().map(FieldWrite::Delete).collect();
        let mut body = move |_: &Document| -> Result<Vec<FieldWrite>, SessionError> {
            Ok(writes.clone())
        };
        self.transact(key, &mut body).await.map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        let mut tx = self.pool.begin().await.map_err(persistence)?;
        let result = sqlx::query("DELETE FROM sessions WHERE key = $1")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(persistence)?;
        if result.rows_affected() > 0 {
            Self::notify(&mut tx, key).await?;
        }
        tx.commit().await.map_err(persistence)
    }

    async fn subscribe(&self, key: &str) -> Result<Subscription, SessionError> {
        self.ensure_listener().await?;
        let receiver = self
            .fanout
            .channels
            .entry(key.to_owned())
            .or_insert_with(|| broadcast::channel(CHANGE_CHANNEL_CAPACITY).0)
            .subscribe();

        // Read after registering so no commit can fall between the two.
        let initial = match self.get(key).await {
            Ok(document) => Some(DocumentChange::Updated(document)),
            Err(SessionError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };

        let channels = Arc::clone(&self.fanout.channels);
        let watched = key.to_owned();
        Ok(
            Subscription::new(key, initial, receiver).with_cancel_hook(move || {
                // The departing receiver is still counted here.
                channels.remove_if(&watched, |_, sender| sender.receiver_count() <= 1);
            }),
        )
    }
}

/// Forwards every notification for a watched key to its channel. When the
/// listener fails, every channel is closed so subscribers see the feed end
/// instead of waiting forever; the next `subscribe` starts a new listener.
async fn relay_notifications(mut listener: PgListener, pool: PgPool, channels: Arc<Channels>) {
    loop {
        let notification = match listener.recv().await {
            Ok(notification) => notification,
            Err(err) => {
                warn!(error = %err, "session change listener failed, closing feeds");
                channels.clear();
                return;
            }
        };
        let key = notification.payload();
        let Some(sender) = channels.get(key).map(|entry| entry.value().clone()) else {
            continue;
        };
        if sender.receiver_count() == 0 {
            channels.remove_if(key, |_, sender| sender.receiver_count() == 0);
            continue;
        }

        let row: Result<Option<Json<Value>>, sqlx::Error> =
            sqlx::query_scalar("SELECT document FROM sessions WHERE key = $1")
                .bind(key)
                .fetch_optional(&pool)
                .await;
        let change = match row {
            Ok(Some(Json(value))) => match into_document(key, value) {
                Ok(document) => DocumentChange::Updated(document),
                Err(err) => {
                    warn!(key, error = %err, "changed session is unreadable");
                    continue;
                }
            },
            Ok(None) => DocumentChange::Deleted,
            Err(err) => {
                warn!(key, error = %err, "failed to reload session");
                continue;
            }
        };
        let deleted = change == DocumentChange::Deleted;
        let _ = sender.send(change);
        if deleted {
            // Dropping the sender closes the feed once subscribers drain it.
            channels.remove(key);
        }
    }
}

fn into_document(key: &str, value: Value) -> Result<Document, SessionError> {
    match value {
        Value::Object(document) => Ok(document),
        other => Err(SessionError::InvalidState(format!(
            "session {key} is stored as {other}, expected an object"
        ))),
    }
}

fn persistence(err: sqlx::Error) -> SessionError {
    SessionError::PersistenceFailure(err.to_string())
}

fn is_transient(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(sqlx::error::DatabaseError::code)
        .is_some_and(|code| code == "40001" || code == "40P01")
}
