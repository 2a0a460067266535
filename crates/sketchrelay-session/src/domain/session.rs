//! The session document and the task relay state machine.
//!
//! Every mutation here is pure: it runs inside a store transaction against
//! the freshly read document, and the caller commits whatever fields changed.
//! Submission and eviction share [`SessionDocument::forward`], so a task
//! lands on the same player and in the same place whichever path produced it.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sketchrelay_core::document::{Document, FieldWrite};
use sketchrelay_core::error::SessionError;
use sketchrelay_core::rng::{DeterministicRng, shuffle};

use crate::config::{LeavePolicy, RelayConfig};
use crate::domain::pin::Pin;
use crate::domain::task::{Content, Task, TaskType};

/// Longest accepted player name, in characters.
pub const MAX_NAME_CHARS: usize = 32;

/// The shared state of one game, as stored under its PIN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    /// The session key.
    pub pin: Pin,
    /// The player allowed to start and cancel.
    pub host_player: String,
    /// Relay order once started: index `i` hands off to `i + 1`, wrapping.
    pub players: Vec<String>,
    /// Set by `startGame`; joins are refused afterwards.
    pub is_game_started: bool,
    /// Every chain has reached its full length.
    pub complete: bool,
    /// The host called the game off, or everyone left.
    pub cancelled: bool,
    /// At least one player has been evicted for inactivity.
    pub any_inactive: bool,
    /// The task each player must act on now.
    pub current_tasks: BTreeMap<String, Task>,
    /// Work handed to a player while they were busy, oldest first.
    pub todo_tasks: BTreeMap<String, VecDeque<Task>>,
    /// Players with nothing to do, eligible for a direct handoff.
    pub waiting_for_input: BTreeMap<String, bool>,
    /// Chains keyed by root player.
    pub results: BTreeMap<String, Vec<Content>>,
    /// Last activity per player.
    pub last_active_timestamps: BTreeMap<String, DateTime<Utc>>,
    /// When the host opened the session.
    pub created_at: DateTime<Utc>,
    /// When the last chain was finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A submission as made by a player.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    /// The submitting player.
    pub player: &'a str,
    /// The chain the content extends.
    pub root_player: &'a str,
    /// The task being answered.
    pub task_type: TaskType,
    /// The sentence or drawing.
    pub content: &'a Content,
}

/// Where a forwarded task ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    /// The receiving player.
    pub target: String,
    /// The task handed over.
    pub task: Task,
    /// `true` if it became the target's current task, `false` if queued.
    pub direct: bool,
}

/// Result of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// The next hop of the chain, unless the chain just finished.
    pub handoff: Option<Handoff>,
    /// The chain reached its full length with this submission.
    pub chain_finished: bool,
    /// The submitter's new current task.
    pub next_task: Task,
    /// The whole session is now complete.
    pub completed: bool,
}

/// Result of removing a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    /// The removed player.
    pub player: String,
    /// Tasks passed on to the next player, in original order.
    pub forwarded: Vec<Handoff>,
    /// Pending tasks discarded with the player.
    pub dropped: usize,
    /// Nobody is left; the session was cancelled.
    pub cancelled: bool,
}

/// Trims and checks a player name.
///
/// # Errors
///
/// Returns `SessionError::InvalidName` for empty or over-long names and names
/// containing control characters.
pub fn validate_player_name(raw: &str) -> Result<String, SessionError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(SessionError::InvalidName("name must not be empty".to_owned()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(SessionError::InvalidName(format!(
            "{name:?} is longer than {MAX_NAME_CHARS} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(SessionError::InvalidName(format!(
            "{name:?} contains control characters"
        )));
    }
    Ok(name.to_owned())
}

/// The inactivity timeout as a signed duration.
#[must_use]
pub fn inactivity_timeout(config: &RelayConfig) -> TimeDelta {
    TimeDelta::from_std(config.inactivity_timeout).unwrap_or(TimeDelta::MAX)
}

impl SessionDocument {
    /// A fresh lobby holding only the host.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidName` if the host name is unusable.
    pub fn new_lobby(pin: Pin, host: &str, now: DateTime<Utc>) -> Result<Self, SessionError> {
        let host = validate_player_name(host)?;
        let mut session = Self {
            pin,
            host_player: host.clone(),
            players: Vec::new(),
            is_game_started: false,
            complete: false,
            cancelled: false,
            any_inactive: false,
            current_tasks: BTreeMap::new(),
            todo_tasks: BTreeMap::new(),
            waiting_for_input: BTreeMap::new(),
            results: BTreeMap::new(),
            last_active_timestamps: BTreeMap::new(),
            created_at: now,
            completed_at: None,
        };
        session.seat(&host, now);
        Ok(session)
    }

    /// Decodes a stored document.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` if a field is missing or has the
    /// wrong shape.
    pub fn from_document(document: &Document) -> Result<Self, SessionError> {
        serde_json::from_value(Value::Object(document.clone()))
            .map_err(|e| SessionError::InvalidState(format!("malformed session document: {e}")))
    }

    /// Encodes the session for storage.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` if encoding fails.
    pub fn to_document(&self) -> Result<Document, SessionError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(document)) => Ok(document),
            Ok(other) => Err(SessionError::InvalidState(format!(
                "session encoded as {other}, expected an object"
            ))),
            Err(e) => Err(SessionError::InvalidState(format!(
                "session encoding failed: {e}"
            ))),
        }
    }

    /// The top-level field writes that turn `before` into `self`. Fields the
    /// session does not model are left alone.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` if encoding fails.
    pub fn writes_against(&self, before: &Document) -> Result<Vec<FieldWrite>, SessionError> {
        Ok(self
            .to_document()?
            .into_iter()
            .filter(|(field, value)| before.get(field) != Some(value))
            .map(|(field, value)| FieldWrite::set(field, value))
            .collect())
    }

    /// Returns `true` if `player` is seated.
    #[must_use]
    pub fn contains(&self, player: &str) -> bool {
        self.players.iter().any(|p| p == player)
    }

    /// The player `player` hands off to.
    #[must_use]
    pub fn next_player(&self, player: &str) -> Option<&str> {
        let index = self.players.iter().position(|p| p == player)?;
        self.players
            .get((index + 1) % self.players.len())
            .map(String::as_str)
    }

    /// The player whose output `player` receives.
    #[must_use]
    pub fn previous_player(&self, player: &str) -> Option<&str> {
        let index = self.players.iter().position(|p| p == player)?;
        let len = self.players.len();
        self.players.get((index + len - 1) % len).map(String::as_str)
    }

    /// The task `player` must act on now.
    #[must_use]
    pub fn current_task(&self, player: &str) -> Option<&Task> {
        self.current_tasks.get(player)
    }

    /// Tasks queued for `player`.
    #[must_use]
    pub fn backlog(&self, player: &str) -> usize {
        self.todo_tasks.get(player).map_or(0, VecDeque::len)
    }

    /// Returns `true` if `player` is flagged as waiting for input.
    #[must_use]
    pub fn is_waiting_for_input(&self, player: &str) -> bool {
        self.waiting_for_input.get(player).copied().unwrap_or(false)
    }

    /// Entries so far in `root`'s chain.
    #[must_use]
    pub fn chain_len(&self, root: &str) -> usize {
        self.results.get(root).map_or(0, Vec::len)
    }

    /// Adds a player to the lobby.
    ///
    /// # Errors
    ///
    /// `InvalidName`, `Cancelled`, `Full`, `DuplicateName` or `InProgress`.
    pub fn join(
        &mut self,
        player_name: &str,
        now: DateTime<Utc>,
        config: &RelayConfig,
    ) -> Result<String, SessionError> {
        let name = validate_player_name(player_name)?;
        if self.cancelled {
            return Err(SessionError::Cancelled);
        }
        if self.players.len() >= config.max_players {
            return Err(SessionError::Full {
                capacity: config.max_players,
            });
        }
        if self.contains(&name) {
            return Err(SessionError::DuplicateName(name));
        }
        if self.is_game_started {
            return Err(SessionError::InProgress);
        }
        self.seat(&name, now);
        Ok(name)
    }

    /// Fixes the relay order and starts the game.
    ///
    /// # Errors
    ///
    /// `Cancelled`, `NotHost`, `InProgress`, `NotEnoughPlayers` or `Full`.
    pub fn start(
        &mut self,
        requester: &str,
        now: DateTime<Utc>,
        config: &RelayConfig,
        rng: &mut dyn DeterministicRng,
    ) -> Result<(), SessionError> {
        if self.cancelled {
            return Err(SessionError::Cancelled);
        }
        if requester != self.host_player {
            return Err(SessionError::NotHost(requester.to_owned()));
        }
        if self.is_game_started {
            return Err(SessionError::InProgress);
        }
        let count = self.players.len();
        if count < config.min_players {
            return Err(SessionError::NotEnoughPlayers {
                required: config.min_players,
                actual: count,
            });
        }
        if count > config.max_players {
            return Err(SessionError::Full {
                capacity: config.max_players,
            });
        }

        shuffle(&mut self.players, rng);
        self.is_game_started = true;
        for player in &self.players {
            self.last_active_timestamps.insert(player.clone(), now);
        }
        Ok(())
    }

    /// Marks the session cancelled. Returns `false` if it already was.
    ///
    /// # Errors
    ///
    /// `NotHost` if `requester` is not the host.
    pub fn cancel(&mut self, requester: &str) -> Result<bool, SessionError> {
        if requester != self.host_player {
            return Err(SessionError::NotHost(requester.to_owned()));
        }
        if self.cancelled {
            return Ok(false);
        }
        self.cancelled = true;
        Ok(true)
    }

    /// Records a submission and relays the next hop of its chain.
    ///
    /// 1. Append the content to the root's chain.
    /// 2. Unless the chain is now full, forward the opposite task to the next
    ///    player.
    /// 3. Give the submitter the head of their queue, or mark them waiting.
    /// 4. Recompute completion.
    ///
    /// # Errors
    ///
    /// `Cancelled`, `NotStarted`, `PlayerNotFound`, `ContentTooLarge`,
    /// `TaskMismatch` when the submission does not answer the player's
    /// current task, and `InvalidState` for a document that breaks the relay
    /// invariants.
    pub fn submit(
        &mut self,
        submission: Submission<'_>,
        now: DateTime<Utc>,
        config: &RelayConfig,
    ) -> Result<SubmitOutcome, SessionError> {
        let Submission {
            player,
            root_player,
            task_type,
            content,
        } = submission;

        self.ensure_running()?;
        if !self.contains(player) {
            return Err(SessionError::PlayerNotFound(player.to_owned()));
        }
        if content.len() > config.max_content_bytes {
            return Err(SessionError::ContentTooLarge {
                size: content.len(),
                limit: config.max_content_bytes,
            });
        }
        let current = self
            .current_tasks
            .get(player)
            .ok_or_else(|| SessionError::InvalidState(format!("{player} has no current task")))?;
        if current.is_waiting() {
            return Err(SessionError::TaskMismatch {
                player: player.to_owned(),
                detail: "no task is assigned".to_owned(),
            });
        }
        if current.root_player != root_player || current.task_type != task_type {
            return Err(SessionError::TaskMismatch {
                player: player.to_owned(),
                detail: format!(
                    "expected {} for {}'s chain, got {task_type} for {root_player}'s",
                    current.task_type, current.root_player
                ),
            });
        }

        let chain = self.results.get_mut(root_player).ok_or_else(|| {
            SessionError::InvalidState(format!("no chain recorded for {root_player}"))
        })?;
        if chain.len() >= config.chain_length {
            return Err(SessionError::InvalidState(format!(
                "chain for {root_player} is already finished"
            )));
        }
        chain.push(content.clone());
        let chain_finished = chain.len() >= config.chain_length;

        let handoff = if chain_finished {
            None
        } else {
            let next_type = task_type.opposite().ok_or_else(|| {
                SessionError::InvalidState(format!("{player} answered a waiting task"))
            })?;
            Some(self.forward(
                player,
                Task {
                    task_type: next_type,
                    root_player: root_player.to_owned(),
                    previous_content: content.clone(),
                },
                now,
            )?)
        };

        let next_task = self.take_next_task(player);
        self.last_active_timestamps.insert(player.to_owned(), now);
        self.recompute_complete(now, config);

        Ok(SubmitOutcome {
            handoff,
            chain_finished,
            next_task,
            completed: self.complete,
        })
    }

    /// Removes a player at their own request.
    ///
    /// Before the start every trace of the player goes, chain included. After
    /// the start their chain stays in `results`; what happens to the tasks
    /// they held depends on `config.leave_policy`.
    ///
    /// # Errors
    ///
    /// `PlayerNotFound` if `player` is not seated.
    pub fn leave(
        &mut self,
        player: &str,
        now: DateTime<Utc>,
        config: &RelayConfig,
    ) -> Result<Withdrawal, SessionError> {
        if !self.contains(player) {
            return Err(SessionError::PlayerNotFound(player.to_owned()));
        }
        let rethread = config.leave_policy == LeavePolicy::Rethread;
        let withdrawal = self.withdraw(player, rethread, now, config)?;
        if !self.is_game_started {
            self.results.remove(player);
        }
        Ok(withdrawal)
    }

    /// Evicts `player` if they are still working and idle for longer than
    /// the inactivity timeout, forwarding everything they held. Returns
    /// `None` when the player no longer qualifies.
    ///
    /// # Errors
    ///
    /// `InvalidState` for a document that breaks the relay invariants.
    pub fn evict_if_inactive(
        &mut self,
        player: &str,
        now: DateTime<Utc>,
        config: &RelayConfig,
    ) -> Result<Option<Withdrawal>, SessionError> {
        if !self.is_game_started || self.cancelled || self.complete || !self.contains(player) {
            return Ok(None);
        }
        if self.current_task(player).is_none_or(Task::is_waiting) {
            return Ok(None);
        }
        let Some(last_active) = self.last_active_timestamps.get(player) else {
            return Ok(None);
        };
        if now - *last_active <= inactivity_timeout(config) {
            return Ok(None);
        }

        let withdrawal = self.withdraw(player, true, now, config)?;
        self.any_inactive = true;
        Ok(Some(withdrawal))
    }

    /// Working players idle for longer than the inactivity timeout.
    #[must_use]
    pub fn stale_players(&self, now: DateTime<Utc>, config: &RelayConfig) -> Vec<String> {
        let timeout = inactivity_timeout(config);
        self.players
            .iter()
            .filter(|p| self.current_task(p).is_some_and(|task| !task.is_waiting()))
            .filter(|p| {
                self.last_active_timestamps
                    .get(p.as_str())
                    .is_some_and(|last| now - *last > timeout)
            })
            .cloned()
            .collect()
    }

    /// Stamps every waiting player as active. Waiting is not idling.
    /// Returns the refreshed players.
    pub fn refresh_waiting(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let waiting: Vec<String> = self
            .players
            .iter()
            .filter(|p| self.current_task(p).is_some_and(Task::is_waiting))
            .cloned()
            .collect();
        for player in &waiting {
            self.last_active_timestamps.insert(player.clone(), now);
        }
        waiting
    }

    fn ensure_running(&self) -> Result<(), SessionError> {
        if self.cancelled {
            return Err(SessionError::Cancelled);
        }
        if !self.is_game_started {
            return Err(SessionError::NotStarted);
        }
        Ok(())
    }

    fn seat(&mut self, player: &str, now: DateTime<Utc>) {
        let name = player.to_owned();
        self.players.push(name.clone());
        self.current_tasks.insert(name.clone(), Task::seed(player));
        self.todo_tasks.insert(name.clone(), VecDeque::new());
        self.waiting_for_input.insert(name.clone(), false);
        self.results.insert(name.clone(), Vec::new());
        self.last_active_timestamps.insert(name, now);
    }

    /// Hands `task` to the player after `from`: straight into their current
    /// slot if they are waiting, otherwise onto the back of their queue. A
    /// direct handoff restarts the target's inactivity clock.
    fn forward(
        &mut self,
        from: &str,
        task: Task,
        now: DateTime<Utc>,
    ) -> Result<Handoff, SessionError> {
        let target = self
            .next_player(from)
            .ok_or_else(|| SessionError::PlayerNotFound(from.to_owned()))?
            .to_owned();
        let direct = self.is_waiting_for_input(&target);
        if direct {
            self.current_tasks.insert(target.clone(), task.clone());
            self.waiting_for_input.insert(target.clone(), false);
            self.last_active_timestamps.insert(target.clone(), now);
        } else {
            self.todo_tasks
                .entry(target.clone())
                .or_default()
                .push_back(task.clone());
        }
        Ok(Handoff {
            target,
            task,
            direct,
        })
    }

    fn take_next_task(&mut self, player: &str) -> Task {
        let queued = self.todo_tasks.get_mut(player).and_then(VecDeque::pop_front);
        let waiting = queued.is_none();
        let task = queued.unwrap_or_else(Task::waiting);
        self.current_tasks.insert(player.to_owned(), task.clone());
        self.waiting_for_input.insert(player.to_owned(), waiting);
        task
    }

    fn withdraw(
        &mut self,
        player: &str,
        rethread: bool,
        now: DateTime<Utc>,
        config: &RelayConfig,
    ) -> Result<Withdrawal, SessionError> {
        let pending: Vec<Task> = if self.is_game_started {
            self.current_tasks
                .get(player)
                .cloned()
                .into_iter()
                .chain(self.todo_tasks.get(player).into_iter().flatten().cloned())
                .filter(|task| !task.is_waiting())
                .collect()
        } else {
            Vec::new()
        };

        let mut forwarded = Vec::new();
        let mut dropped = 0;
        if rethread && self.players.len() > 1 {
            for task in pending {
                forwarded.push(self.forward(player, task, now)?);
            }
        } else {
            dropped = pending.len();
        }

        self.players.retain(|p| p != player);
        self.current_tasks.remove(player);
        self.todo_tasks.remove(player);
        self.waiting_for_input.remove(player);
        self.last_active_timestamps.remove(player);

        match self.players.first() {
            None => self.cancelled = true,
            Some(first) if self.host_player == player => self.host_player = first.clone(),
            Some(_) => {}
        }
        self.recompute_complete(now, config);

        Ok(Withdrawal {
            player: player.to_owned(),
            forwarded,
            dropped,
            cancelled: self.cancelled,
        })
    }

    fn recompute_complete(&mut self, now: DateTime<Utc>, config: &RelayConfig) {
        let complete = !self.results.is_empty()
            && self
                .results
                .values()
                .all(|chain| chain.len() == config.chain_length);
        if complete && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        self.complete = complete;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sketchrelay_test_support::{MaxRng, SequenceRng, fixed_now};

    use super::*;

    fn config() -> RelayConfig {
        RelayConfig::default()
    }

    fn pin() -> Pin {
        Pin::parse("123456", 6).unwrap()
    }

    fn lobby(players: &[&str]) -> SessionDocument {
        let mut session = SessionDocument::new_lobby(pin(), players[0], fixed_now()).unwrap();
        for player in &players[1..] {
            session.join(player, fixed_now(), &config()).unwrap();
        }
        session
    }

    /// A started session whose relay order is exactly `players`.
    fn started(players: &[&str]) -> SessionDocument {
        let mut session = lobby(players);
        session
            .start(players[0], fixed_now(), &config(), &mut MaxRng)
            .unwrap();
        session
    }

    fn submit_as(session: &mut SessionDocument, player: &str, content: &str) -> SubmitOutcome {
        let task = session.current_task(player).unwrap().clone();
        session
            .submit(
                Submission {
                    player,
                    root_player: &task.root_player,
                    task_type: task.task_type,
                    content: &Content::new(content),
                },
                fixed_now(),
                &config(),
            )
            .unwrap()
    }

    fn seed_of<'a>(player: &'a str, content: &'a Content) -> Submission<'a> {
        Submission {
            player,
            root_player: player,
            task_type: TaskType::WriteSentence,
            content,
        }
    }

    fn assert_relay_invariants(session: &SessionDocument, config: &RelayConfig) {
        for player in &session.players {
            let working = session.current_task(player).is_some_and(|t| !t.is_waiting());
            let waiting = session.is_waiting_for_input(player);
            assert!(!(working && waiting), "{player} is both working and waiting");
            if waiting {
                assert_eq!(session.backlog(player), 0, "{player} waits with a backlog");
            }
        }
        for chain in session.results.values() {
            assert!(chain.len() <= config.chain_length);
        }
        let all_full = session
            .results
            .values()
            .all(|chain| chain.len() == config.chain_length);
        assert_eq!(session.complete, all_full);
    }

    /// Lets the first player with work submit, tagging the content with the
    /// task type so alternation can be checked afterwards.
    fn play_one_step(session: &mut SessionDocument) -> Option<(String, SubmitOutcome)> {
        let player = session
            .players
            .iter()
            .find(|p| session.current_task(p).is_some_and(|t| !t.is_waiting()))?
            .clone();
        let task = session.current_task(&player)?.clone();
        let content = format!("{}:{}:{}", task.task_type, task.root_player, player);
        let outcome = submit_as(session, &player, &content);
        Some((player, outcome))
    }

    #[test]
    fn test_new_lobby_seeds_the_host() {
        let session = lobby(&["alice"]);

        assert_eq!(session.host_player, "alice");
        assert_eq!(session.players, vec!["alice"]);
        assert_eq!(session.current_task("alice"), Some(&Task::seed("alice")));
        assert_eq!(session.backlog("alice"), 0);
        assert!(!session.is_waiting_for_input("alice"));
        assert_eq!(session.chain_len("alice"), 0);
        assert_eq!(session.last_active_timestamps["alice"], fixed_now());
        assert!(!session.is_game_started);
    }

    #[test]
    fn test_document_wire_format_uses_camel_case() {
        let document = lobby(&["alice"]).to_document().unwrap();

        assert_eq!(document["pin"], json!("123456"));
        assert_eq!(document["hostPlayer"], json!("alice"));
        assert_eq!(document["isGameStarted"], json!(false));
        assert_eq!(
            document["currentTasks"]["alice"],
            json!({ "taskType": "writeSentence", "rootPlayer": "alice", "previousContent": "" })
        );
        assert_eq!(document["todoTasks"]["alice"], json!([]));
        assert!(document.contains_key("lastActiveTimestamps"));
        assert!(!document.contains_key("completedAt"));
    }

    #[test]
    fn test_from_document_rejects_missing_fields() {
        let mut document = lobby(&["alice"]).to_document().unwrap();
        document.remove("waitingForInput");

        let result = SessionDocument::from_document(&document);

        assert!(matches!(result, Err(SessionError::InvalidState(_))));
    }

    #[test]
    fn test_writes_against_only_touches_changed_fields() {
        // Arrange
        let before = lobby(&["alice"]).to_document().unwrap();
        let mut session = SessionDocument::from_document(&before).unwrap();

        // Act
        session.join("bob", fixed_now(), &config()).unwrap();
        let writes = session.writes_against(&before).unwrap();

        // Assert
        let mut fields: Vec<String> = writes.iter().map(|w| w.path().to_string()).collect();
        fields.sort();
        assert_eq!(
            fields,
            vec![
                "currentTasks",
                "lastActiveTimestamps",
                "players",
                "results",
                "todoTasks",
                "waitingForInput"
            ]
        );
    }

    #[test]
    fn test_join_rejects_the_sixteenth_player() {
        // Arrange
        let names: Vec<String> = (0..15).map(|i| format!("player{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut session = lobby(&refs);

        // Act
        let result = session.join("latecomer", fixed_now(), &config());

        // Assert
        assert_eq!(result, Err(SessionError::Full { capacity: 15 }));
        assert_eq!(session.players.len(), 15);
    }

    #[test]
    fn test_join_rejects_duplicate_names() {
        let mut session = lobby(&["Alice", "bob"]);

        let result = session.join(" Alice ", fixed_now(), &config());

        assert_eq!(result, Err(SessionError::DuplicateName("Alice".to_owned())));
    }

    #[test]
    fn test_join_rejects_started_and_cancelled_sessions() {
        let mut in_progress = started(&["alice", "bob"]);
        let mut cancelled = lobby(&["alice"]);
        cancelled.cancel("alice").unwrap();

        assert_eq!(
            in_progress.join("carol", fixed_now(), &config()),
            Err(SessionError::InProgress)
        );
        assert_eq!(
            cancelled.join("carol", fixed_now(), &config()),
            Err(SessionError::Cancelled)
        );
    }

    #[test]
    fn test_join_rejects_blank_names() {
        let mut session = lobby(&["alice"]);

        assert!(matches!(
            session.join("   ", fixed_now(), &config()),
            Err(SessionError::InvalidName(_))
        ));
        assert!(matches!(
            session.join(&"x".repeat(MAX_NAME_CHARS + 1), fixed_now(), &config()),
            Err(SessionError::InvalidName(_))
        ));
    }

    #[test]
    fn test_start_shuffles_with_the_injected_rng() {
        // Arrange: i=2 swaps with 0, then i=1 swaps with 0.
        let mut session = lobby(&["host", "a", "b"]);
        let mut rng = SequenceRng::new(vec![0, 0]);
        let later = fixed_now() + TimeDelta::seconds(30);

        // Act
        session.start("host", later, &config(), &mut rng).unwrap();

        // Assert
        assert_eq!(session.players, vec!["a", "b", "host"]);
        assert!(session.is_game_started);
        assert!(session.last_active_timestamps.values().all(|t| *t == later));
    }

    #[test]
    fn test_start_enforces_host_and_player_count() {
        let mut alone = lobby(&["host"]);
        let mut pair = lobby(&["host", "guest"]);

        assert_eq!(
            alone.start("host", fixed_now(), &config(), &mut MaxRng),
            Err(SessionError::NotEnoughPlayers {
                required: 2,
                actual: 1
            })
        );
        assert_eq!(
            pair.start("guest", fixed_now(), &config(), &mut MaxRng),
            Err(SessionError::NotHost("guest".to_owned()))
        );
        pair.start("host", fixed_now(), &config(), &mut MaxRng).unwrap();
        assert_eq!(
            pair.start("host", fixed_now(), &config(), &mut MaxRng),
            Err(SessionError::InProgress)
        );
    }

    #[test]
    fn test_cancel_is_host_only_and_idempotent() {
        let mut session = lobby(&["host", "guest"]);

        assert_eq!(
            session.cancel("guest"),
            Err(SessionError::NotHost("guest".to_owned()))
        );
        assert_eq!(session.cancel("host"), Ok(true));
        assert_eq!(session.cancel("host"), Ok(false));
        assert!(session.cancelled);
    }

    #[test]
    fn test_three_player_relay_scenario() {
        // Arrange
        let mut session = started(&["A", "B", "C"]);

        // Act / Assert: B finishes its seed first and waits.
        submit_as(&mut session, "B", "b");
        assert!(session.is_waiting_for_input("B"));

        // A's seed goes straight to the waiting B.
        let outcome = submit_as(&mut session, "A", "x");
        let handoff = outcome.handoff.unwrap();
        assert_eq!(handoff.target, "B");
        assert!(handoff.direct);
        assert_eq!(
            session.current_task("B"),
            Some(&Task {
                task_type: TaskType::DrawPicture,
                root_player: "A".to_owned(),
                previous_content: Content::new("x"),
            })
        );

        // C clears its seed and B's drawing, ending up waiting.
        submit_as(&mut session, "C", "c");
        submit_as(&mut session, "C", "drawing of b");
        assert!(session.is_waiting_for_input("C"));

        // B's drawing of "x" is handed directly to the waiting C.
        let outcome = submit_as(&mut session, "B", "y");
        let handoff = outcome.handoff.unwrap();
        assert_eq!(handoff.target, "C");
        assert!(handoff.direct);
        assert_eq!(session.backlog("C"), 0);
        assert_eq!(
            session.current_task("C"),
            Some(&Task {
                task_type: TaskType::WriteSentence,
                root_player: "A".to_owned(),
                previous_content: Content::new("y"),
            })
        );
    }

    #[test]
    fn test_busy_target_gets_the_task_queued() {
        let mut session = started(&["A", "B", "C"]);

        let outcome = submit_as(&mut session, "A", "x");

        let handoff = outcome.handoff.unwrap();
        assert_eq!(handoff.target, "B");
        assert!(!handoff.direct);
        assert_eq!(session.backlog("B"), 1);
        assert_eq!(session.current_task("B"), Some(&Task::seed("B")));
    }

    #[test]
    fn test_every_handoff_targets_the_next_player() {
        let mut session = started(&["A", "B", "C", "D"]);
        let order = session.players.clone();

        while let Some((submitter, outcome)) = play_one_step(&mut session) {
            if let Some(handoff) = outcome.handoff {
                let index = order.iter().position(|p| *p == submitter).unwrap();
                assert_eq!(handoff.target, order[(index + 1) % order.len()]);
            }
        }
    }

    #[test]
    fn test_full_game_completes_with_alternating_chains() {
        // Arrange
        let config = config();
        let mut session = started(&["A", "B", "C"]);

        // Act
        let mut steps = 0;
        while let Some((_, outcome)) = play_one_step(&mut session) {
            steps += 1;
            assert_relay_invariants(&session, &config);
            assert_eq!(outcome.completed, steps == 21);
        }

        // Assert
        assert_eq!(steps, 21);
        assert!(session.complete);
        assert_eq!(session.completed_at, Some(fixed_now()));
        for (root, chain) in &session.results {
            assert_eq!(chain.len(), 7);
            for (hop, entry) in chain.iter().enumerate() {
                let expected = if hop % 2 == 0 { "writeSentence" } else { "drawPicture" };
                assert!(entry.as_str().starts_with(&format!("{expected}:{root}:")));
            }
        }
        assert!(
            session
                .players
                .iter()
                .all(|p| session.current_task(p).is_some_and(Task::is_waiting))
        );
    }

    #[test]
    fn test_queue_drains_oldest_first() {
        // Arrange: B and C both feed A while A is still on its seed.
        let mut session = started(&["A", "B", "C"]);
        submit_as(&mut session, "C", "c");
        submit_as(&mut session, "B", "b");
        submit_as(&mut session, "C", "drawing of b");
        assert_eq!(session.backlog("A"), 2);

        // Act
        let outcome = submit_as(&mut session, "A", "a");

        // Assert
        assert_eq!(outcome.next_task.root_player, "C");
        assert_eq!(session.todo_tasks["A"][0].root_player, "B");
    }

    #[test]
    fn test_submit_rejects_mismatched_and_repeated_submissions() {
        let mut session = started(&["A", "B"]);
        let content = Content::new("x");

        let wrong_root = session.submit(
            Submission {
                player: "A",
                root_player: "B",
                task_type: TaskType::WriteSentence,
                content: &content,
            },
            fixed_now(),
            &config(),
        );
        submit_as(&mut session, "A", "x");
        let repeated = session.submit(
            Submission {
                player: "A",
                root_player: "A",
                task_type: TaskType::WriteSentence,
                content: &content,
            },
            fixed_now(),
            &config(),
        );

        assert!(matches!(wrong_root, Err(SessionError::TaskMismatch { .. })));
        assert!(matches!(repeated, Err(SessionError::TaskMismatch { .. })));
        assert_eq!(session.chain_len("A"), 1);
    }

    #[test]
    fn test_submit_enforces_session_state_and_content_limit() {
        let mut lobby_session = lobby(&["A", "B"]);
        let mut running = started(&["A", "B"]);
        let small = RelayConfig {
            max_content_bytes: 4,
            ..config()
        };
        let long = Content::new("too long");

        assert_eq!(
            lobby_session.submit(seed_of("A", &long), fixed_now(), &config()),
            Err(SessionError::NotStarted)
        );
        assert_eq!(
            running.submit(seed_of("A", &long), fixed_now(), &small),
            Err(SessionError::ContentTooLarge { size: 8, limit: 4 })
        );
        assert_eq!(
            running.submit(seed_of("Z", &long), fixed_now(), &config()),
            Err(SessionError::PlayerNotFound("Z".to_owned()))
        );
        running.cancel("A").unwrap();
        assert_eq!(
            running.submit(seed_of("A", &long), fixed_now(), &config()),
            Err(SessionError::Cancelled)
        );
    }

    #[test]
    fn test_submit_stamps_activity() {
        let mut session = started(&["A", "B"]);
        let later = fixed_now() + TimeDelta::seconds(42);

        session
            .submit(
                Submission {
                    player: "A",
                    root_player: "A",
                    task_type: TaskType::WriteSentence,
                    content: &Content::new("x"),
                },
                later,
                &config(),
            )
            .unwrap();

        assert_eq!(session.last_active_timestamps["A"], later);
        assert_eq!(session.last_active_timestamps["B"], fixed_now());
    }

    #[test]
    fn test_eviction_forwards_held_and_queued_tasks_in_order() {
        // Arrange: C holds its seed plus B's seed in its queue.
        let mut session = started(&["A", "B", "C"]);
        submit_as(&mut session, "B", "b");
        let results_before = session.results.clone();
        let later = fixed_now() + TimeDelta::seconds(301);

        // Act
        let withdrawal = session
            .evict_if_inactive("C", later, &config())
            .unwrap()
            .unwrap();

        // Assert
        assert_eq!(withdrawal.forwarded.len(), 2);
        assert!(withdrawal.forwarded.iter().all(|h| h.target == "A" && !h.direct));
        let queue: Vec<&Task> = session.todo_tasks["A"].iter().collect();
        assert_eq!(queue[0], &Task::seed("C"));
        assert_eq!(queue[1].root_player, "B");
        assert_eq!(queue[1].task_type, TaskType::DrawPicture);
        assert_eq!(session.players, vec!["A", "B"]);
        assert!(!session.current_tasks.contains_key("C"));
        assert!(!session.last_active_timestamps.contains_key("C"));
        assert!(session.any_inactive);
        assert_eq!(session.results, results_before);
    }

    #[test]
    fn test_eviction_hands_directly_to_a_waiting_successor() {
        // Arrange: A is waiting, C is stuck on its seed.
        let mut session = started(&["A", "B", "C"]);
        submit_as(&mut session, "A", "a");
        assert!(session.is_waiting_for_input("A"));
        let later = fixed_now() + TimeDelta::seconds(301);

        // Act
        let withdrawal = session.evict_if_inactive("C", later, &config()).unwrap();

        // Assert
        let withdrawal = withdrawal.unwrap();
        assert!(withdrawal.forwarded[0].direct);
        assert_eq!(session.current_task("A"), Some(&Task::seed("C")));
        assert!(!session.is_waiting_for_input("A"));
        assert_eq!(session.last_active_timestamps["A"], later);
    }

    #[test]
    fn test_eviction_skips_recent_and_waiting_players() {
        let mut session = started(&["A", "B"]);
        submit_as(&mut session, "A", "a");
        let edge = fixed_now() + TimeDelta::seconds(300);
        let later = fixed_now() + TimeDelta::seconds(400);

        assert_eq!(session.evict_if_inactive("B", edge, &config()), Ok(None));
        assert_eq!(session.evict_if_inactive("A", later, &config()), Ok(None));
        assert_eq!(session.evict_if_inactive("nobody", later, &config()), Ok(None));
        assert_eq!(session.stale_players(later, &config()), vec!["B"]);
    }

    #[test]
    fn test_evicted_game_still_completes() {
        // Arrange
        let config = config();
        let mut session = started(&["A", "B", "C"]);
        submit_as(&mut session, "A", "a");
        let later = fixed_now() + TimeDelta::seconds(301);
        session.evict_if_inactive("B", later, &config).unwrap();

        // Act
        while play_one_step(&mut session).is_some() {
            assert_relay_invariants(&session, &config);
        }

        // Assert
        assert!(session.complete);
        assert_eq!(session.results.len(), 3);
        assert!(session.results.values().all(|chain| chain.len() == 7));
    }

    #[test]
    fn test_evicting_the_last_player_cancels() {
        let mut session = started(&["A", "B"]);
        let later = fixed_now() + TimeDelta::seconds(301);

        session.evict_if_inactive("A", later, &config()).unwrap();
        let last = session
            .evict_if_inactive("B", later, &config())
            .unwrap()
            .unwrap();

        assert!(last.cancelled);
        assert!(session.cancelled);
        assert!(session.players.is_empty());
    }

    #[test]
    fn test_leave_before_start_removes_every_trace() {
        let mut session = lobby(&["host", "guest"]);

        let withdrawal = session.leave("guest", fixed_now(), &config()).unwrap();

        assert_eq!(withdrawal.dropped, 0);
        assert_eq!(session.players, vec!["host"]);
        assert!(!session.results.contains_key("guest"));
        assert!(!session.todo_tasks.contains_key("guest"));
    }

    #[test]
    fn test_leave_drops_held_work_by_default() {
        // Arrange: B holds its seed and A's seed.
        let mut session = started(&["A", "B", "C"]);
        submit_as(&mut session, "A", "a");

        // Act
        let withdrawal = session.leave("B", fixed_now(), &config()).unwrap();

        // Assert
        assert_eq!(withdrawal.dropped, 2);
        assert!(withdrawal.forwarded.is_empty());
        assert_eq!(session.backlog("C"), 0);
        assert_eq!(session.chain_len("B"), 0);
        assert!(session.results.contains_key("B"));
    }

    #[test]
    fn test_leave_with_rethread_forwards_like_eviction() {
        let mut session = started(&["A", "B", "C"]);
        submit_as(&mut session, "A", "a");
        let rethread = RelayConfig {
            leave_policy: LeavePolicy::Rethread,
            ..config()
        };

        let withdrawal = session.leave("B", fixed_now(), &rethread).unwrap();

        assert_eq!(withdrawal.forwarded.len(), 2);
        assert!(withdrawal.forwarded.iter().all(|h| h.target == "C"));
        assert_eq!(session.backlog("C"), 2);
        assert!(!session.any_inactive);
    }

    #[test]
    fn test_host_role_passes_on_when_the_host_leaves() {
        let mut session = lobby(&["host", "guest", "third"]);

        session.leave("host", fixed_now(), &config()).unwrap();

        assert_eq!(session.host_player, "guest");
        assert!(!session.cancelled);
    }

    #[test]
    fn test_refresh_waiting_only_stamps_waiting_players() {
        let mut session = started(&["A", "B"]);
        submit_as(&mut session, "A", "a");
        submit_as(&mut session, "B", "b");
        submit_as(&mut session, "A", "drawing");
        let later = fixed_now() + TimeDelta::seconds(120);

        let refreshed = session.refresh_waiting(later);

        assert_eq!(refreshed, vec!["A"]);
        assert_eq!(session.last_active_timestamps["A"], later);
        assert_eq!(session.last_active_timestamps["B"], fixed_now());
    }

    #[test]
    fn test_shorter_chains_complete_sooner() {
        // Arrange
        let short = RelayConfig {
            chain_length: 2,
            ..config()
        };
        let mut session = started(&["A", "B"]);
        let empty = Content::default();
        session.submit(seed_of("A", &empty), fixed_now(), &short).unwrap();
        session.submit(seed_of("B", &empty), fixed_now(), &short).unwrap();
        let drawing_for = |player, root| Submission {
            player,
            root_player: root,
            task_type: TaskType::DrawPicture,
            content: &empty,
        };

        // Act
        let first = session
            .submit(drawing_for("B", "A"), fixed_now(), &short)
            .unwrap();
        let second = session
            .submit(drawing_for("A", "B"), fixed_now(), &short)
            .unwrap();

        // Assert
        assert!(first.chain_finished);
        assert!(first.handoff.is_none());
        assert!(!first.completed);
        assert!(second.completed);
    }
}
