//! Session coordinator.
//!
//! Owns the shared collaborators (store, clock, RNG, configuration) and runs
//! the background work a started game needs: one inactivity monitor per
//! session, stopped on completion or cancellation, and the deletion of a
//! finished session once its grace period has passed.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use sketchrelay_core::clock::Clock;
use sketchrelay_core::error::SessionError;
use sketchrelay_core::rng::DeterministicRng;
use sketchrelay_core::store::{DocumentChange, SessionStore, Subscription};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::application::command_handlers::{
    self, SessionCommandResult, handle_cancel_game, handle_delete_session, handle_host_game,
    handle_host_new_game, handle_join_game, handle_leave_game, handle_start_game,
    handle_submit_task,
};
use crate::application::mirror::LocalSessionMirror;
use crate::application::monitor::{InactivityMonitor, MonitorHandle};
use crate::application::query_handlers::{self, SessionView};
use crate::config::RelayConfig;
use crate::domain::commands::{
    CancelGame, DeleteSession, HostGame, HostNewGame, JoinGame, LeaveGame, StartGame, SubmitTask,
};
use crate::domain::pin::Pin;
use crate::domain::session::{SessionDocument, SubmitOutcome, Withdrawal};
use crate::domain::task::{Content, TaskType};

/// Background task owning one session's monitor or pending deletion.
struct Watcher {
    ticket: u64,
    task: JoinHandle<()>,
}

type Watchers = DashMap<Pin, Watcher>;

/// How a watched game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Complete,
    Cancelled,
    Gone,
}

/// Entry point for driving sessions.
pub struct SessionCoordinator {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    rng: Arc<Mutex<dyn DeterministicRng + Send>>,
    config: RelayConfig,
    watchers: Arc<Watchers>,
    next_ticket: AtomicU64,
}

impl SessionCoordinator {
    /// Creates a coordinator over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        rng: Arc<Mutex<dyn DeterministicRng + Send>>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            clock,
            rng,
            config,
            watchers: Arc::new(DashMap::new()),
            next_ticket: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Sessions with a running watcher or a pending deletion.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.watchers.len()
    }

    /// Opens a lobby under a freshly drawn PIN.
    ///
    /// # Errors
    ///
    /// See [`handle_host_new_game`].
    pub async fn host_game(&self, player_name: &str) -> Result<SessionCommandResult, SessionError> {
        let command = HostNewGame {
            correlation_id: Uuid::new_v4(),
            player_name: player_name.to_owned(),
        };
        handle_host_new_game(
            &command,
            self.clock.as_ref(),
            self.rng.as_ref(),
            self.store.as_ref(),
            &self.config,
        )
        .await
    }

    /// Opens a lobby under a PIN chosen by the caller.
    ///
    /// # Errors
    ///
    /// See [`handle_host_game`].
    pub async fn host_game_with_pin(
        &self,
        pin: &Pin,
        player_name: &str,
    ) -> Result<SessionCommandResult, SessionError> {
        let command = HostGame {
            correlation_id: Uuid::new_v4(),
            pin: pin.clone(),
            player_name: player_name.to_owned(),
        };
        handle_host_game(&command, self.clock.as_ref(), self.store.as_ref()).await
    }

    /// # Errors
    ///
    /// See [`handle_join_game`].
    pub async fn join_game(
        &self,
        pin: &Pin,
        player_name: &str,
    ) -> Result<SessionCommandResult<String>, SessionError> {
        let command = JoinGame {
            correlation_id: Uuid::new_v4(),
            pin: pin.clone(),
            player_name: player_name.to_owned(),
        };
        handle_join_game(&command, self.clock.as_ref(), self.store.as_ref(), &self.config).await
    }

    /// Starts the game and arms its inactivity monitor.
    ///
    /// # Errors
    ///
    /// See [`handle_start_game`]. Also `PersistenceFailure` if the change
    /// feed for the watcher cannot be opened; the game is started anyway.
    pub async fn start_game(
        &self,
        pin: &Pin,
        requester: &str,
    ) -> Result<SessionCommandResult, SessionError> {
        let command = StartGame {
            correlation_id: Uuid::new_v4(),
            pin: pin.clone(),
            requester: requester.to_owned(),
        };
        let result = handle_start_game(
            &command,
            self.clock.as_ref(),
            self.rng.as_ref(),
            self.store.as_ref(),
            &self.config,
        )
        .await?;
        self.arm(pin).await?;
        Ok(result)
    }

    /// Cancels the game. A started game's watcher schedules the deletion;
    /// a lobby nobody watches gets its deletion scheduled here.
    ///
    /// # Errors
    ///
    /// See [`handle_cancel_game`].
    pub async fn cancel_game(
        &self,
        pin: &Pin,
        requester: &str,
    ) -> Result<SessionCommandResult<bool>, SessionError> {
        let command = CancelGame {
            correlation_id: Uuid::new_v4(),
            pin: pin.clone(),
            requester: requester.to_owned(),
        };
        let result = handle_cancel_game(&command, self.store.as_ref()).await?;
        if result.outcome && !self.watchers.contains_key(pin) {
            let retirement = retire(
                pin.clone(),
                Arc::clone(&self.store),
                self.config.completion_grace,
                Ending::Cancelled,
            );
            self.register(pin, retirement.instrument(info_span!("session_watcher", pin = %pin)));
        }
        Ok(result)
    }

    /// # Errors
    ///
    /// See [`handle_leave_game`].
    pub async fn leave_game(
        &self,
        pin: &Pin,
        player_name: &str,
    ) -> Result<SessionCommandResult<Withdrawal>, SessionError> {
        let command = LeaveGame {
            correlation_id: Uuid::new_v4(),
            pin: pin.clone(),
            player_name: player_name.to_owned(),
        };
        handle_leave_game(&command, self.clock.as_ref(), self.store.as_ref(), &self.config).await
    }

    /// Answers `player_name`'s current task.
    ///
    /// # Errors
    ///
    /// See [`handle_submit_task`].
    pub async fn submit_task(
        &self,
        pin: &Pin,
        player_name: &str,
        root_player: &str,
        task_type: TaskType,
        content: Content,
    ) -> Result<SessionCommandResult<SubmitOutcome>, SessionError> {
        let command = SubmitTask {
            correlation_id: Uuid::new_v4(),
            pin: pin.clone(),
            player_name: player_name.to_owned(),
            root_player: root_player.to_owned(),
            task_type,
            content,
        };
        handle_submit_task(&command, self.clock.as_ref(), self.store.as_ref(), &self.config).await
    }

    /// # Errors
    ///
    /// See [`query_handlers::get_session`].
    pub async fn get_session(&self, pin: &Pin) -> Result<SessionView, SessionError> {
        query_handlers::get_session(pin, self.store.as_ref()).await
    }

    /// Deletes the session now, stopping its monitor.
    ///
    /// # Errors
    ///
    /// See [`handle_delete_session`].
    pub async fn delete_session(&self, pin: &Pin) -> Result<(), SessionError> {
        if let Some((_, watcher)) = self.watchers.remove(pin) {
            watcher.task.abort();
        }
        let command = DeleteSession {
            correlation_id: Uuid::new_v4(),
            pin: pin.clone(),
        };
        handle_delete_session(&command, self.store.as_ref()).await
    }

    /// Attaches a local mirror of the session for `player`.
    ///
    /// # Errors
    ///
    /// See [`LocalSessionMirror::attach`].
    pub async fn mirror(
        &self,
        pin: &Pin,
        player: Option<&str>,
    ) -> Result<LocalSessionMirror, SessionError> {
        LocalSessionMirror::attach(self.store.as_ref(), pin.clone(), player.map(str::to_owned))
            .await
    }

    /// Stops every monitor and pending deletion.
    pub fn shutdown(&self) {
        self.watchers.retain(|pin, watcher| {
            debug!(%pin, "stopping session watcher");
            watcher.task.abort();
            false
        });
    }

    async fn arm(&self, pin: &Pin) -> Result<(), SessionError> {
        let subscription = self
            .store
            .subscribe(pin.as_str())
            .await
            .map_err(|err| command_handlers::surface(pin, err))?;
        let monitor = InactivityMonitor::new(
            pin.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.clone(),
        )
        .spawn();

        let watcher = watch_session(
            pin.clone(),
            subscription,
            monitor,
            Arc::clone(&self.store),
            self.config.completion_grace,
        );
        self.register(pin, watcher.instrument(info_span!("session_watcher", pin = %pin)));
        Ok(())
    }

    /// Runs `work` as the session's watcher, replacing any previous one. The
    /// task removes its own entry when it ends, and only its own.
    fn register(&self, pin: &Pin, work: impl Future<Output = ()> + Send + 'static) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let watchers = Arc::clone(&self.watchers);
        let key = pin.clone();
        let task = tokio::spawn(async move {
            // Waiting for the insert keeps a fast exit from leaving a stale entry.
            if registered_rx.await.is_ok() {
                work.await;
            }
            watchers.remove_if(&key, |_, watcher| watcher.ticket == ticket);
        });
        if let Some(previous) = self.watchers.insert(pin.clone(), Watcher { ticket, task }) {
            previous.task.abort();
        }
        let _ = registered_tx.send(());
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Follows a started session until it ends, then stops its monitor. A
/// completed or cancelled session is deleted after `grace`.
async fn watch_session(
    pin: Pin,
    mut subscription: Subscription,
    mut monitor: MonitorHandle,
    store: Arc<dyn SessionStore>,
    grace: Duration,
) {
    let ending = loop {
        let Some(change) = subscription.next().await else {
            debug!("change feed closed");
            break Ending::Gone;
        };
        let DocumentChange::Updated(document) = change else {
            debug!("session deleted");
            break Ending::Gone;
        };
        match SessionDocument::from_document(&document) {
            Ok(session) if session.cancelled => {
                info!("session cancelled");
                break Ending::Cancelled;
            }
            Ok(session) if session.complete => break Ending::Complete,
            Ok(_) => {}
            Err(err) => warn!(error = %err, "ignoring session update that does not decode"),
        }
    };

    subscription.cancel();
    monitor.stop();
    monitor.join().await;

    if ending != Ending::Gone {
        retire(pin, store, grace, ending).await;
    }
}

/// Deletes a finished session once `grace` has passed.
async fn retire(pin: Pin, store: Arc<dyn SessionStore>, grace: Duration, ending: Ending) {
    info!(grace_secs = grace.as_secs(), ?ending, "session over, deletion scheduled");
    tokio::time::sleep(grace).await;
    let command = DeleteSession {
        correlation_id: Uuid::new_v4(),
        pin,
    };
    if let Err(err) = handle_delete_session(&command, store.as_ref()).await {
        warn!(error = %err, "could not delete finished session");
    }
}
