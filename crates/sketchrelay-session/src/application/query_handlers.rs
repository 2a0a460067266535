//! Query handlers for the session engine.
//!
//! Read-only views built from the stored session document, for lobbies and
//! progress displays.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sketchrelay_core::error::SessionError;
use sketchrelay_core::store::SessionStore;

use crate::domain::pin::Pin;
use crate::domain::session::SessionDocument;
use crate::domain::task::TaskType;

/// What a player is currently doing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PlayerStatus {
    /// Holding a task with nothing queued behind it.
    Working {
        /// The task being worked on.
        task_type: TaskType,
    },
    /// Holding a task with more queued.
    Queued {
        /// The task being worked on.
        task_type: TaskType,
        /// Tasks queued behind it.
        backlog: usize,
    },
    /// Nothing to do until a neighbour submits.
    Waiting,
}

/// A seated player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    /// The player name.
    pub name: String,
    /// Whether the player hosts the session.
    pub is_host: bool,
    /// Current activity.
    #[serde(flatten)]
    pub status: PlayerStatus,
    /// Last recorded activity.
    pub last_active: Option<DateTime<Utc>>,
}

/// Read-only view of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// The session key.
    pub pin: Pin,
    /// The host.
    pub host_player: String,
    /// Players in relay order.
    pub players: Vec<PlayerView>,
    /// Whether play has begun.
    pub is_game_started: bool,
    /// Whether every chain is finished.
    pub complete: bool,
    /// Whether the host called the game off.
    pub cancelled: bool,
    /// Whether anyone was evicted for inactivity.
    pub any_inactive: bool,
    /// Entries recorded per chain.
    pub chain_lengths: BTreeMap<String, usize>,
}

impl SessionView {
    /// Builds the view of a decoded session.
    #[must_use]
    pub fn of(session: &SessionDocument) -> Self {
        let players = session
            .players
            .iter()
            .map(|name| {
                let backlog = session.backlog(name);
                let status = match session.current_task(name) {
                    Some(task) if !task.is_waiting() && backlog > 0 => PlayerStatus::Queued {
                        task_type: task.task_type,
                        backlog,
                    },
                    Some(task) if !task.is_waiting() => PlayerStatus::Working {
                        task_type: task.task_type,
                    },
                    _ => PlayerStatus::Waiting,
                };
                PlayerView {
                    name: name.clone(),
                    is_host: *name == session.host_player,
                    status,
                    last_active: session.last_active_timestamps.get(name).copied(),
                }
            })
            .collect();

        Self {
            pin: session.pin.clone(),
            host_player: session.host_player.clone(),
            players,
            is_game_started: session.is_game_started,
            complete: session.complete,
            cancelled: session.cancelled,
            any_inactive: session.any_inactive,
            chain_lengths: session
                .results
                .iter()
                .map(|(root, chain)| (root.clone(), chain.len()))
                .collect(),
        }
    }
}

/// Retrieves a session by its PIN.
///
/// # Errors
///
/// Returns `SessionError::NotFound` if no session exists under the PIN.
/// Returns `SessionError::InvalidState` if the document does not decode.
pub async fn get_session(pin: &Pin, store: &dyn SessionStore) -> Result<SessionView, SessionError> {
    let document = store.get(pin.as_str()).await?;
    let session = SessionDocument::from_document(&document)?;
    Ok(SessionView::of(&session))
}
