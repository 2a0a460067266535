//! Session error types.

use thiserror::Error;

/// Top-level error type shared by the engine and the store backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No session exists under the given PIN.
    #[error("session not found: {0}")]
    NotFound(String),

    /// A session already exists under the given PIN.
    #[error("session already exists: {0}")]
    AlreadyExists(String),

    /// The session has reached its player capacity.
    #[error("session is full (capacity {capacity})")]
    Full {
        /// The maximum number of players.
        capacity: usize,
    },

    /// A player with the same name is already in the session.
    #[error("a player named {0:?} is already in the session")]
    DuplicateName(String),

    /// The game has already started.
    #[error("game already in progress")]
    InProgress,

    /// The stored document is missing fields or holds values of the wrong
    /// shape. The transaction that observed it wrote nothing.
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// Concurrent writers kept invalidating the transaction.
    #[error("write conflict on {key} after {attempts} attempts")]
    Conflict {
        /// The contended document key.
        key: String,
        /// How many times the transaction body was run.
        attempts: u32,
    },

    /// A transport or storage error.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// The PIN is not a numeric string of the expected width.
    #[error("invalid pin: {0}")]
    InvalidPin(String),

    /// The player name is empty or otherwise unusable.
    #[error("invalid player name: {0}")]
    InvalidName(String),

    /// The requester is not the session host.
    #[error("{0:?} is not the host of this session")]
    NotHost(String),

    /// The named player is not part of the session.
    #[error("player not found: {0:?}")]
    PlayerNotFound(String),

    /// Too few players to start.
    #[error("not enough players: {actual} joined, {required} required")]
    NotEnoughPlayers {
        /// The minimum number of players.
        required: usize,
        /// The number of players present.
        actual: usize,
    },

    /// The operation requires a started game.
    #[error("game has not started")]
    NotStarted,

    /// The session was cancelled by its host.
    #[error("session was cancelled")]
    Cancelled,

    /// A submission did not match the submitter's current task.
    #[error("task mismatch for {player:?}: {detail}")]
    TaskMismatch {
        /// The submitting player.
        player: String,
        /// What did not match.
        detail: String,
    },

    /// Submitted content exceeds the configured limit.
    #[error("content too large: {size} bytes (limit {limit})")]
    ContentTooLarge {
        /// Size of the submitted content in bytes.
        size: usize,
        /// Configured maximum in bytes.
        limit: usize,
    },
}

impl SessionError {
    /// Returns `true` for errors where repeating the whole operation may
    /// succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::PersistenceFailure(_))
    }
}
