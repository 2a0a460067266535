//! Local session mirror.
//!
//! A client-side, read-only copy of one session, refreshed from the store's
//! change feed. Presentation code reads the latest state or awaits changes;
//! it never writes through the mirror.

use serde::Serialize;
use sketchrelay_core::error::SessionError;
use sketchrelay_core::store::{DocumentChange, SessionStore, Subscription};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

use crate::domain::pin::Pin;
use crate::domain::session::SessionDocument;
use crate::domain::task::{Content, Task};

/// Where the mirrored session stands, as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MirrorPhase {
    /// Players are still joining.
    Lobby,
    /// The relay is running.
    InProgress,
    /// Every chain is finished; stories can be revealed.
    Complete,
    /// The host called the game off. The feed has stopped.
    Cancelled,
    /// The session was deleted, the client's player was removed, or the
    /// feed closed. The feed has stopped.
    Detached,
}

impl MirrorPhase {
    /// Returns `true` once no further updates will arrive.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Detached)
    }
}

/// The latest state held by a mirror.
#[derive(Debug, Clone)]
pub struct MirrorState {
    /// The last session document received. Kept after detaching.
    pub session: Option<SessionDocument>,
    /// Where the session stands.
    pub phase: MirrorPhase,
}

/// One finished or partial chain, for the reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    /// Whose seed opened the chain.
    pub root_player: String,
    /// The chain in submission order.
    pub entries: Vec<Content>,
}

fn phase_of(session: &SessionDocument, player: Option<&str>) -> MirrorPhase {
    if session.cancelled {
        MirrorPhase::Cancelled
    } else if player.is_some_and(|p| !session.contains(p)) {
        MirrorPhase::Detached
    } else if session.complete {
        MirrorPhase::Complete
    } else if session.is_game_started {
        MirrorPhase::InProgress
    } else {
        MirrorPhase::Lobby
    }
}

/// A read-only projection of one session, kept current by a background
/// task.
#[derive(Debug)]
pub struct LocalSessionMirror {
    pin: Pin,
    state: watch::Receiver<MirrorState>,
    feed: JoinHandle<()>,
}

impl LocalSessionMirror {
    /// Subscribes to the session under `pin`. When `player` is given, the
    /// mirror detaches once that player is no longer seated.
    ///
    /// # Errors
    ///
    /// `SessionError::NotFound` if the session does not exist,
    /// `SessionError::InvalidState` if it does not decode, or
    /// `SessionError::PersistenceFailure`.
    pub async fn attach(
        store: &dyn SessionStore,
        pin: Pin,
        player: Option<String>,
    ) -> Result<Self, SessionError> {
        let subscription = store.subscribe(pin.as_str()).await?;
        // Read after subscribing so no commit falls between the two.
        let session = SessionDocument::from_document(&store.get(pin.as_str()).await?)?;
        let initial = MirrorState {
            phase: phase_of(&session, player.as_deref()),
            session: Some(session),
        };
        let already_over = initial.phase.is_terminal();
        let (sender, state) = watch::channel(initial);

        let span = info_span!("session_mirror", pin = %pin, player = player.as_deref());
        let feed = if already_over {
            subscription.cancel();
            tokio::spawn(async {})
        } else {
            tokio::spawn(run_feed(subscription, sender, player).instrument(span))
        };

        Ok(Self { pin, state, feed })
    }

    /// The mirrored session's PIN.
    #[must_use]
    pub fn pin(&self) -> &Pin {
        &self.pin
    }

    /// A copy of the latest state.
    #[must_use]
    pub fn state(&self) -> MirrorState {
        self.state.borrow().clone()
    }

    /// A copy of the latest session document.
    #[must_use]
    pub fn snapshot(&self) -> Option<SessionDocument> {
        self.state.borrow().session.clone()
    }

    #[must_use]
    pub fn phase(&self) -> MirrorPhase {
        self.state.borrow().phase
    }

    /// The task `player` must act on now.
    #[must_use]
    pub fn current_task(&self, player: &str) -> Option<Task> {
        self.state
            .borrow()
            .session
            .as_ref()
            .and_then(|session| session.current_task(player).cloned())
    }

    /// The newest entry of `root`'s chain.
    #[must_use]
    pub fn previous_content(&self, root: &str) -> Option<Content> {
        self.state
            .borrow()
            .session
            .as_ref()
            .and_then(|session| session.results.get(root))
            .and_then(|chain| chain.last().cloned())
    }

    /// The player whose output `player` receives.
    #[must_use]
    pub fn previous_player(&self, player: &str) -> Option<String> {
        self.state
            .borrow()
            .session
            .as_ref()
            .and_then(|session| session.previous_player(player).map(str::to_owned))
    }

    /// Every chain ordered by root player, the reveal order.
    #[must_use]
    pub fn stories(&self) -> Vec<Story> {
        self.state
            .borrow()
            .session
            .as_ref()
            .map(|session| {
                session
                    .results
                    .iter()
                    .map(|(root, entries)| Story {
                        root_player: root.clone(),
                        entries: entries.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Waits for the next update. Returns `None` once the feed has stopped
    /// and every update was seen.
    pub async fn changed(&mut self) -> Option<MirrorState> {
        self.state.changed().await.ok()?;
        Some(self.state.borrow_and_update().clone())
    }

    /// Waits until `condition` holds for the latest state. Returns `None` if
    /// the feed stops first.
    pub async fn wait_until(
        &mut self,
        mut condition: impl FnMut(&MirrorState) -> bool,
    ) -> Option<MirrorState> {
        let state = self.state.wait_for(|state| condition(state)).await.ok()?;
        Some(state.clone())
    }

    /// Stops following the session.
    pub fn detach(self) {
        drop(self);
    }
}

impl Drop for LocalSessionMirror {
    fn drop(&mut self) {
        self.feed.abort();
    }
}

async fn run_feed(
    mut subscription: Subscription,
    sender: watch::Sender<MirrorState>,
    player: Option<String>,
) {
    while let Some(change) = subscription.next().await {
        let next = match change {
            DocumentChange::Updated(document) => match SessionDocument::from_document(&document) {
                Ok(session) => MirrorState {
                    phase: phase_of(&session, player.as_deref()),
                    session: Some(session),
                },
                Err(err) => {
                    warn!(error = %err, "ignoring session update that does not decode");
                    continue;
                }
            },
            DocumentChange::Deleted => MirrorState {
                session: sender.borrow().session.clone(),
                phase: MirrorPhase::Detached,
            },
        };
        let phase = next.phase;
        sender.send_replace(next);
        if phase.is_terminal() {
            debug!(?phase, "mirror detaching");
            subscription.cancel();
            return;
        }
    }

    sender.send_modify(|state| state.phase = MirrorPhase::Detached);
    debug!("change feed closed, mirror detached");
}
