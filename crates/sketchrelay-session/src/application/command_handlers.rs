//! Command handlers for the session engine.
//!
//! Each handler runs its domain mutation as a single store transaction
//! against the latest committed document, never against a local copy. The
//! store re-runs the mutation when a concurrent writer got there first.

use std::sync::{Mutex, MutexGuard};

use sketchrelay_core::clock::Clock;
use sketchrelay_core::command::Command;
use sketchrelay_core::document::{Document, FieldWrite};
use sketchrelay_core::error::SessionError;
use sketchrelay_core::rng::DeterministicRng;
use sketchrelay_core::store::SessionStore;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RelayConfig;
use crate::domain::commands::{
    CancelGame, DeleteSession, EvictInactivePlayer, HostGame, HostNewGame, JoinGame, LeaveGame,
    StartGame, SubmitTask,
};
use crate::domain::pin::Pin;
use crate::domain::session::{SessionDocument, SubmitOutcome, Submission, Withdrawal};

/// Result of a successfully handled command.
#[derive(Debug, Clone)]
pub struct SessionCommandResult<T = ()> {
    /// The session affected.
    pub pin: Pin,
    /// The session as committed.
    pub session: SessionDocument,
    /// What the mutation reported.
    pub outcome: T,
}

/// Runs `mutation` against the stored session inside one transaction and
/// commits the fields it changed. A mutation that changes nothing writes
/// nothing.
pub(crate) async fn mutate_session<T, F>(
    store: &dyn SessionStore,
    pin: &Pin,
    mut mutation: F,
) -> Result<SessionCommandResult<T>, SessionError>
where
    T: Send,
    F: FnMut(&mut SessionDocument) -> Result<T, SessionError> + Send,
{
    let mut outcome = None;
    let mut body = |current: &Document| -> Result<Vec<FieldWrite>, SessionError> {
        let mut session = SessionDocument::from_document(current)?;
        let result = mutation(&mut session)?;
        let writes = session.writes_against(current)?;
        outcome = Some(result);
        Ok(writes)
    };
    let committed = store
        .transact(pin.as_str(), &mut body)
        .await
        .map_err(|err| surface(pin, err))?;

    let outcome = outcome.ok_or_else(|| {
        SessionError::InvalidState("transaction finished without running its body".to_owned())
    })?;
    Ok(SessionCommandResult {
        pin: pin.clone(),
        session: SessionDocument::from_document(&committed)?,
        outcome,
    })
}

/// Logs a failed store operation and turns an exhausted conflict into a
/// persistence failure.
pub(crate) fn surface(pin: &Pin, err: SessionError) -> SessionError {
    match err {
        SessionError::Conflict { key, attempts } => {
            warn!(%pin, attempts, "transaction kept conflicting, giving up");
            SessionError::PersistenceFailure(format!(
                "write conflict on {key} persisted after {attempts} attempts"
            ))
        }
        SessionError::InvalidState(detail) => {
            error!(%pin, %detail, "session document is invalid, nothing written");
            SessionError::InvalidState(detail)
        }
        other => {
            debug!(%pin, error = %other, "command rejected");
            other
        }
    }
}

pub(crate) fn lock_rng<'a>(
    rng: &'a Mutex<dyn DeterministicRng + Send + 'static>,
) -> Result<MutexGuard<'a, dyn DeterministicRng + Send + 'static>, SessionError> {
    rng.lock()
        .map_err(|e| SessionError::InvalidState(format!("RNG mutex poisoned: {e}")))
}

/// Handles the `HostGame` command: creates the lobby document under the
/// requested PIN.
///
/// # Errors
///
/// `AlreadyExists` if the PIN is taken, `InvalidName`, or
/// `PersistenceFailure`.
#[instrument(skip_all, fields(pin = %command.pin, player = %command.player_name))]
pub async fn handle_host_game(
    command: &HostGame,
    clock: &dyn Clock,
    store: &dyn SessionStore,
) -> Result<SessionCommandResult, SessionError> {
    let session =
        SessionDocument::new_lobby(command.pin.clone(), &command.player_name, clock.now())?;
    store
        .create(command.pin.as_str(), session.to_document()?)
        .await
        .map_err(|err| surface(&command.pin, err))?;

    info!(
        correlation_id = %command.correlation_id,
        command = command.command_type(),
        "session hosted"
    );
    Ok(SessionCommandResult {
        pin: command.pin.clone(),
        session,
        outcome: (),
    })
}

/// Handles the `HostNewGame` command: draws PINs until one is free.
///
/// The `Mutex` is locked only while drawing a PIN, never across an await.
///
/// # Errors
///
/// `AlreadyExists` with the last PIN drawn once `host_pin_attempts` PINs
/// were all taken, plus the
/// errors of [`handle_host_game`].
#[instrument(skip_all, fields(player = %command.player_name))]
pub async fn handle_host_new_game(
    command: &HostNewGame,
    clock: &dyn Clock,
    rng: &Mutex<dyn DeterministicRng + Send + 'static>,
    store: &dyn SessionStore,
    config: &RelayConfig,
) -> Result<SessionCommandResult, SessionError> {
    let mut last_taken = None;
    for attempt in 1..=config.host_pin_attempts {
        let pin = {
            let mut guard = lock_rng(rng)?;
            Pin::generate(&mut *guard, config.pin_digits)
        };
        let host = HostGame {
            correlation_id: command.correlation_id,
            pin,
            player_name: command.player_name.clone(),
        };
        match handle_host_game(&host, clock, store).await {
            Err(SessionError::AlreadyExists(taken)) => {
                debug!(pin = %taken, attempt, "pin already in use, drawing another");
                last_taken = Some(taken);
            }
            other => return other,
        }
    }
    warn!(attempts = config.host_pin_attempts, "no free pin found");
    Err(SessionError::AlreadyExists(last_taken.unwrap_or_default()))
}

/// Handles the `JoinGame` command. Returns the normalized player name.
///
/// # Errors
///
/// `NotFound`, `Cancelled`, `Full`, `DuplicateName`, `InProgress`,
/// `InvalidName`, `InvalidState` or `PersistenceFailure`.
#[instrument(skip_all, fields(pin = %command.pin, player = %command.player_name))]
pub async fn handle_join_game(
    command: &JoinGame,
    clock: &dyn Clock,
    store: &dyn SessionStore,
    config: &RelayConfig,
) -> Result<SessionCommandResult<String>, SessionError> {
    let now = clock.now();
    let result = mutate_session(store, &command.pin, |session| {
        session.join(&command.player_name, now, config)
    })
    .await?;

    info!(
        correlation_id = %command.correlation_id,
        command = command.command_type(),
        players = result.session.players.len(),
        "player joined"
    );
    Ok(result)
}

/// Handles the `StartGame` command: shuffles the relay order and starts.
///
/// The `Mutex` is locked only inside the synchronous transaction body.
///
/// # Errors
///
/// `NotFound`, `Cancelled`, `NotHost`, `InProgress`, `NotEnoughPlayers`,
/// `Full`, `InvalidState` or `PersistenceFailure`.
#[instrument(skip_all, fields(pin = %command.pin, requester = %command.requester))]
pub async fn handle_start_game(
    command: &StartGame,
    clock: &dyn Clock,
    rng: &Mutex<dyn DeterministicRng + Send + 'static>,
    store: &dyn SessionStore,
    config: &RelayConfig,
) -> Result<SessionCommandResult, SessionError> {
    let now = clock.now();
    let result = mutate_session(store, &command.pin, |session| {
        let mut guard = lock_rng(rng)?;
        session.start(&command.requester, now, config, &mut *guard)
    })
    .await?;

    info!(
        correlation_id = %command.correlation_id,
        command = command.command_type(),
        order = ?result.session.players,
        "game started"
    );
    Ok(result)
}

/// Handles the `CancelGame` command. The outcome is `false` if the session
/// was already cancelled.
///
/// # Errors
///
/// `NotFound`, `NotHost`, `InvalidState` or `PersistenceFailure`.
#[instrument(skip_all, fields(pin = %command.pin, requester = %command.requester))]
pub async fn handle_cancel_game(
    command: &CancelGame,
    store: &dyn SessionStore,
) -> Result<SessionCommandResult<bool>, SessionError> {
    let result =
        mutate_session(store, &command.pin, |session| session.cancel(&command.requester)).await?;

    info!(
        correlation_id = %command.correlation_id,
        command = command.command_type(),
        changed = result.outcome,
        "game cancelled"
    );
    Ok(result)
}

/// Handles the `LeaveGame` command.
///
/// # Errors
///
/// `NotFound`, `PlayerNotFound`, `InvalidState` or `PersistenceFailure`.
#[instrument(skip_all, fields(pin = %command.pin, player = %command.player_name))]
pub async fn handle_leave_game(
    command: &LeaveGame,
    clock: &dyn Clock,
    store: &dyn SessionStore,
    config: &RelayConfig,
) -> Result<SessionCommandResult<Withdrawal>, SessionError> {
    let now = clock.now();
    let result = mutate_session(store, &command.pin, |session| {
        session.leave(&command.player_name, now, config)
    })
    .await?;

    let withdrawal = &result.outcome;
    if withdrawal.dropped > 0 {
        warn!(
            dropped = withdrawal.dropped,
            "leaving player's tasks were discarded"
        );
    }
    info!(
        correlation_id = %command.correlation_id,
        command = command.command_type(),
        forwarded = withdrawal.forwarded.len(),
        cancelled = withdrawal.cancelled,
        "player left"
    );
    Ok(result)
}

/// Handles the `SubmitTask` command: records the content and relays the
/// next hop.
///
/// # Errors
///
/// `NotFound`, `Cancelled`, `NotStarted`, `PlayerNotFound`,
/// `ContentTooLarge`, `TaskMismatch`, `InvalidState` or
/// `PersistenceFailure`.
#[instrument(
    skip_all,
    fields(pin = %command.pin, player = %command.player_name, root = %command.root_player)
)]
pub async fn handle_submit_task(
    command: &SubmitTask,
    clock: &dyn Clock,
    store: &dyn SessionStore,
    config: &RelayConfig,
) -> Result<SessionCommandResult<SubmitOutcome>, SessionError> {
    let now = clock.now();
    let result = mutate_session(store, &command.pin, |session| {
        session.submit(
            Submission {
                player: &command.player_name,
                root_player: &command.root_player,
                task_type: command.task_type,
                content: &command.content,
            },
            now,
            config,
        )
    })
    .await?;

    let outcome = &result.outcome;
    info!(
        correlation_id = %command.correlation_id,
        command = command.command_type(),
        task_type = %command.task_type,
        hop = result.session.chain_len(&command.root_player),
        handed_to = outcome.handoff.as_ref().map(|h| h.target.as_str()),
        direct = outcome.handoff.as_ref().is_some_and(|h| h.direct),
        completed = outcome.completed,
        "task submitted"
    );
    Ok(result)
}

/// Handles the `EvictInactivePlayer` command: removes the player if they are
/// still idle past the timeout and forwards everything they held. The
/// outcome is `None` when the fresh document no longer warrants eviction.
///
/// # Errors
///
/// `NotFound`, `InvalidState` or `PersistenceFailure`.
#[instrument(skip_all, fields(pin = %command.pin, player = %command.player_name))]
pub async fn handle_inactive_user(
    command: &EvictInactivePlayer,
    clock: &dyn Clock,
    store: &dyn SessionStore,
    config: &RelayConfig,
) -> Result<SessionCommandResult<Option<Withdrawal>>, SessionError> {
    let now = clock.now();
    let result = mutate_session(store, &command.pin, |session| {
        session.evict_if_inactive(&command.player_name, now, config)
    })
    .await?;

    match &result.outcome {
        Some(withdrawal) => warn!(
            correlation_id = %command.correlation_id,
            command = command.command_type(),
            forwarded = withdrawal.forwarded.len(),
            cancelled = withdrawal.cancelled,
            "evicted inactive player"
        ),
        None => debug!("player is no longer inactive, nothing evicted"),
    }
    Ok(result)
}

/// Handles the `DeleteSession` command. Deleting an absent session succeeds.
///
/// # Errors
///
/// `PersistenceFailure` on storage errors.
#[instrument(skip_all, fields(pin = %command.pin))]
pub async fn handle_delete_session(
    command: &DeleteSession,
    store: &dyn SessionStore,
) -> Result<(), SessionError> {
    store
        .delete(command.pin.as_str())
        .await
        .map_err(|err| surface(&command.pin, err))?;

    info!(
        correlation_id = %command.correlation_id,
        command = command.command_type(),
        "session deleted"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sketchrelay_core::store::SessionStore;
    use sketchrelay_store::memory::MemorySessionStore;
    use sketchrelay_test_support::{
        FailingSessionStore, FixedClock, ManualClock, MaxRng, RecordingSessionStore, SequenceRng,
        document, fixed_now,
    };
    use uuid::Uuid;

    use super::*;
    use crate::domain::task::{Content, TaskType};

    fn fixed_clock() -> FixedClock {
        FixedClock(fixed_now())
    }

    fn pin() -> Pin {
        Pin::parse("123456", 6).unwrap()
    }

    fn identity_rng() -> Mutex<MaxRng> {
        Mutex::new(MaxRng)
    }

    async fn host(store: &dyn SessionStore, name: &str) {
        let command = HostGame {
            correlation_id: Uuid::new_v4(),
            pin: pin(),
            player_name: name.to_owned(),
        };
        handle_host_game(&command, &fixed_clock(), store).await.unwrap();
    }

    async fn join(store: &dyn SessionStore, name: &str) -> Result<String, SessionError> {
        let command = JoinGame {
            correlation_id: Uuid::new_v4(),
            pin: pin(),
            player_name: name.to_owned(),
        };
        handle_join_game(&command, &fixed_clock(), store, &RelayConfig::default())
            .await
            .map(|result| result.outcome)
    }

    async fn start(store: &dyn SessionStore, requester: &str) -> Result<(), SessionError> {
        let command = StartGame {
            correlation_id: Uuid::new_v4(),
            pin: pin(),
            requester: requester.to_owned(),
        };
        let rng = identity_rng();
        let rng_ref: &Mutex<dyn DeterministicRng + Send + 'static> = &rng;
        handle_start_game(&command, &fixed_clock(), rng_ref, store, &RelayConfig::default())
            .await
            .map(|_| ())
    }

    fn seed_command(player: &str, content: &str) -> SubmitTask {
        SubmitTask {
            correlation_id: Uuid::new_v4(),
            pin: pin(),
            player_name: player.to_owned(),
            root_player: player.to_owned(),
            task_type: TaskType::WriteSentence,
            content: Content::new(content),
        }
    }

    async fn started_game(store: &dyn SessionStore, players: &[&str]) {
        host(store, players[0]).await;
        for player in &players[1..] {
            join(store, player).await.unwrap();
        }
        start(store, players[0]).await.unwrap();
    }

    async fn load(store: &dyn SessionStore) -> SessionDocument {
        SessionDocument::from_document(&store.get("123456").await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_host_game_creates_lobby_once() {
        // Arrange
        let store = MemorySessionStore::new();

        // Act
        host(&store, "alice").await;
        let again = handle_host_game(
            &HostGame {
                correlation_id: Uuid::new_v4(),
                pin: pin(),
                player_name: "bob".to_owned(),
            },
            &fixed_clock(),
            &store,
        )
        .await;

        // Assert
        assert!(matches!(again, Err(SessionError::AlreadyExists(_))));
        let session = load(&store).await;
        assert_eq!(session.host_player, "alice");
        assert_eq!(session.players, vec!["alice"]);
    }

    #[tokio::test]
    async fn test_host_new_game_draws_past_taken_pins() {
        // Arrange
        let store = MemorySessionStore::new();
        host(&store, "first").await;
        let rng: Mutex<SequenceRng> = Mutex::new(SequenceRng::new(vec![123_456, 654_321]));
        let rng_ref: &Mutex<dyn DeterministicRng + Send + 'static> = &rng;
        let command = HostNewGame {
            correlation_id: Uuid::new_v4(),
            player_name: "second".to_owned(),
        };

        // Act
        let result = handle_host_new_game(
            &command,
            &fixed_clock(),
            rng_ref,
            &store,
            &RelayConfig::default(),
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(result.pin.as_str(), "654321");
        assert_eq!(store.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_host_new_game_gives_up_after_configured_attempts() {
        let store = MemorySessionStore::new();
        host(&store, "first").await;
        let rng: Mutex<SequenceRng> = Mutex::new(SequenceRng::new(vec![123_456, 123_456]));
        let rng_ref: &Mutex<dyn DeterministicRng + Send + 'static> = &rng;
        let config = RelayConfig {
            host_pin_attempts: 2,
            ..RelayConfig::default()
        };
        let command = HostNewGame {
            correlation_id: Uuid::new_v4(),
            player_name: "second".to_owned(),
        };

        let result = handle_host_new_game(&command, &fixed_clock(), rng_ref, &store, &config).await;

        assert!(matches!(result, Err(SessionError::AlreadyExists(ref taken)) if taken == "123456"));
    }

    #[tokio::test]
    async fn test_poisoned_rng_is_reported_as_invalid_state() {
        // Arrange
        let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(MaxRng));
        let holder = Arc::clone(&rng);
        let _ = std::thread::spawn(move || {
            let _guard = holder.lock().unwrap();
            panic!("rng holder crashed");
        })
        .join();
        let command = HostNewGame {
            correlation_id: Uuid::new_v4(),
            player_name: "alice".to_owned(),
        };
        let store = MemorySessionStore::new();

        // Act
        let locked = lock_rng(&rng).map(|_| ());
        let hosted =
            handle_host_new_game(&command, &fixed_clock(), &rng, &store, &RelayConfig::default())
                .await;

        // Assert
        assert!(matches!(locked, Err(SessionError::InvalidState(_))));
        assert!(matches!(hosted, Err(SessionError::InvalidState(_))));
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_join_unknown_pin_is_not_found() {
        let store = MemorySessionStore::new();

        let result = join(&store, "bob").await;

        assert_eq!(result, Err(SessionError::NotFound("123456".to_owned())));
    }

    #[tokio::test]
    async fn test_join_and_start_through_the_store() {
        // Arrange
        let store = MemorySessionStore::new();
        host(&store, "alice").await;

        // Act
        let joined = join(&store, " bob ").await.unwrap();
        let duplicate = join(&store, "bob").await;
        start(&store, "alice").await.unwrap();
        let late = join(&store, "carol").await;

        // Assert
        assert_eq!(joined, "bob");
        assert_eq!(duplicate, Err(SessionError::DuplicateName("bob".to_owned())));
        assert_eq!(late, Err(SessionError::InProgress));
        let session = load(&store).await;
        assert!(session.is_game_started);
        assert_eq!(session.players, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_submit_task_relays_through_the_store() {
        // Arrange
        let store = MemorySessionStore::new();
        started_game(&store, &["alice", "bob"]).await;

        // Act
        let result = handle_submit_task(
            &seed_command("alice", "a fox in a hat"),
            &fixed_clock(),
            &store,
            &RelayConfig::default(),
        )
        .await
        .unwrap();

        // Assert
        let handoff = result.outcome.handoff.unwrap();
        assert_eq!(handoff.target, "bob");
        assert!(!handoff.direct);
        let session = load(&store).await;
        assert_eq!(session.results["alice"], vec![Content::new("a fox in a hat")]);
        assert_eq!(session.backlog("bob"), 1);
        assert!(session.is_waiting_for_input("alice"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_lose_nothing() {
        // Arrange
        let store = Arc::new(MemorySessionStore::new());
        let names: Vec<String> = (0..15).map(|i| format!("p{i:02}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        started_game(store.as_ref(), &refs).await;

        // Act
        let mut tasks = Vec::new();
        for name in &names {
            let store = Arc::clone(&store);
            let command = seed_command(name, &format!("seed of {name}"));
            tasks.push(tokio::spawn(async move {
                handle_submit_task(
                    &command,
                    &FixedClock(fixed_now()),
                    store.as_ref(),
                    &RelayConfig::default(),
                )
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // Assert: every seed is recorded and its next hop exists exactly once.
        let session = load(store.as_ref()).await;
        assert!(session.results.values().all(|chain| chain.len() == 1));
        let mut hops: Vec<String> = session
            .current_tasks
            .values()
            .filter(|task| task.task_type == TaskType::DrawPicture)
            .chain(session.todo_tasks.values().flatten())
            .map(|task| task.root_player.clone())
            .collect();
        hops.sort();
        assert_eq!(hops, names);
    }

    #[tokio::test]
    async fn test_invalid_document_is_left_untouched() {
        // Arrange
        let store = MemorySessionStore::new();
        let corrupt = document(serde_json::json!({ "pin": "123456", "players": 3 }));
        store.create("123456", corrupt.clone()).await.unwrap();

        // Act
        let result = handle_submit_task(
            &seed_command("alice", "x"),
            &fixed_clock(),
            &store,
            &RelayConfig::default(),
        )
        .await;

        // Assert
        assert!(matches!(result, Err(SessionError::InvalidState(_))));
        assert_eq!(store.get("123456").await.unwrap(), corrupt);
    }

    #[tokio::test]
    async fn test_persistence_failure_propagates() {
        let result = join(&FailingSessionStore, "bob").await;

        assert!(matches!(result, Err(SessionError::PersistenceFailure(_))));
    }

    #[test]
    fn test_exhausted_conflict_surfaces_as_persistence_failure() {
        let err = surface(
            &pin(),
            SessionError::Conflict {
                key: "123456".to_owned(),
                attempts: 16,
            },
        );

        assert!(matches!(err, SessionError::PersistenceFailure(_)));
        assert_eq!(surface(&pin(), SessionError::Full { capacity: 15 }), SessionError::Full { capacity: 15 });
    }

    #[tokio::test]
    async fn test_cancel_requires_the_host() {
        let store = MemorySessionStore::new();
        host(&store, "alice").await;
        join(&store, "bob").await.unwrap();
        let cancel = |requester: &str| CancelGame {
            correlation_id: Uuid::new_v4(),
            pin: pin(),
            requester: requester.to_owned(),
        };

        let by_guest = handle_cancel_game(&cancel("bob"), &store).await;
        let by_host = handle_cancel_game(&cancel("alice"), &store).await.unwrap();
        let again = handle_cancel_game(&cancel("alice"), &store).await.unwrap();

        assert_eq!(by_guest.map(|r| r.outcome), Err(SessionError::NotHost("bob".to_owned())));
        assert!(by_host.outcome);
        assert!(!again.outcome);
        assert!(load(&store).await.cancelled);
    }

    #[tokio::test]
    async fn test_inactive_user_is_evicted_only_once_stale() {
        // Arrange
        let store = RecordingSessionStore::new();
        started_game(&store, &["alice", "bob", "carol"]).await;
        let clock = ManualClock::new(fixed_now());
        let command = EvictInactivePlayer {
            correlation_id: Uuid::new_v4(),
            pin: pin(),
            player_name: "carol".to_owned(),
        };
        let commits_before = store.commits_for("123456");

        // Act
        let early = handle_inactive_user(&command, &clock, &store, &RelayConfig::default())
            .await
            .unwrap();
        let commits_after_early = store.commits_for("123456");
        clock.advance_secs(301);
        let late = handle_inactive_user(&command, &clock, &store, &RelayConfig::default())
            .await
            .unwrap();

        // Assert
        assert!(early.outcome.is_none());
        assert_eq!(commits_after_early, commits_before);
        assert_eq!(store.commits_for("123456"), commits_before + 1);
        let withdrawal = late.outcome.unwrap();
        assert_eq!(withdrawal.player, "carol");
        assert_eq!(withdrawal.forwarded[0].target, "alice");
        assert_eq!(late.session.players, vec!["alice", "bob"]);
        assert!(late.session.any_inactive);
    }

    #[tokio::test]
    async fn test_leave_and_delete() {
        let store = MemorySessionStore::new();
        host(&store, "alice").await;
        join(&store, "bob").await.unwrap();

        let left = handle_leave_game(
            &LeaveGame {
                correlation_id: Uuid::new_v4(),
                pin: pin(),
                player_name: "bob".to_owned(),
            },
            &fixed_clock(),
            &store,
            &RelayConfig::default(),
        )
        .await
        .unwrap();
        handle_delete_session(
            &DeleteSession {
                correlation_id: Uuid::new_v4(),
                pin: pin(),
            },
            &store,
        )
        .await
        .unwrap();

        assert_eq!(left.session.players, vec!["alice"]);
        assert!(store.is_empty().unwrap());
    }
}
