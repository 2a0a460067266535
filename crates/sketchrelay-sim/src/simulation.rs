//! Plays one game with simulated players.
//!
//! Every player runs on its own task and acts only on what its local mirror
//! shows, the way a real client would. The stalled player, if any, watches
//! but never submits, so the inactivity monitor has to evict it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sketchrelay_core::error::SessionError;
use sketchrelay_session::application::coordinator::SessionCoordinator;
use sketchrelay_session::application::mirror::{MirrorPhase, MirrorState, Story};
use sketchrelay_session::domain::pin::Pin;
use sketchrelay_session::domain::task::{Content, Task, TaskType};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::AppError;
use crate::options::SimOptions;

/// Outcome of a simulated game.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimReport {
    /// The session played.
    pub pin: Pin,
    /// Relay order fixed at start.
    pub relay_order: Vec<String>,
    /// Players removed for inactivity.
    pub evicted: Vec<String>,
    /// Submissions accepted per player, in relay order.
    pub submissions: Vec<(String, usize)>,
    /// Whether every chain finished.
    pub complete: bool,
    /// Whether the game ended without finishing.
    pub cancelled: bool,
    /// Every chain, ordered by root player.
    pub stories: Vec<Story>,
}

/// Hosts a game under `coordinator`, seats the simulated players, starts it
/// and waits until it completes or is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the player count is outside the configured
/// bounds, `AppError::Session` if the engine rejects a lifecycle step, and
/// `AppError::Player` if a player task fails.
pub async fn run_simulation(
    coordinator: Arc<SessionCoordinator>,
    options: &SimOptions,
) -> Result<SimReport, AppError> {
    let config = coordinator.config();
    if options.players < config.min_players || options.players > config.max_players {
        return Err(AppError::Config(format!(
            "SIM_PLAYERS must be between {} and {}, got {}",
            config.min_players, config.max_players, options.players
        )));
    }

    let names = options.player_names();
    let host = &names[0];
    let pin = coordinator.host_game(host).await?.pin;
    info!(%pin, players = names.len(), "game hosted");
    for name in &names[1..] {
        coordinator.join_game(&pin, name).await?;
    }

    let relay_order = coordinator.start_game(&pin, host).await?.session.players;
    let mut observer = coordinator.mirror(&pin, None).await?;
    info!(%pin, order = ?relay_order, "game started");

    let mut players = JoinSet::new();
    let mut task_owners = HashMap::new();
    for name in &relay_order {
        let stalled = options.stall_player.as_deref() == Some(name.as_str());
        let span = info_span!("player", %pin, player = %name, stalled);
        let handle = players.spawn(
            play(
                Arc::clone(&coordinator),
                pin.clone(),
                name.clone(),
                stalled,
                options.think_time,
            )
            .instrument(span),
        );
        task_owners.insert(handle.id(), name.clone());
    }

    let final_state = observer
        .wait_until(game_over)
        .await
        .unwrap_or_else(|| observer.state());

    let mut submissions = Vec::with_capacity(relay_order.len());
    while let Some(joined) = players.join_next_with_id().await {
        match joined {
            Ok((_, Ok(tally))) => submissions.push(tally),
            Ok((_, Err(err))) => return Err(err),
            Err(err) => {
                return Err(AppError::Player {
                    player: task_owners.remove(&err.id()).unwrap_or_default(),
                    reason: err.to_string(),
                });
            }
        }
    }
    submissions.sort_by_key(|(name, _)| relay_order.iter().position(|p| p == name));

    let report = build_report(pin, relay_order, submissions, &final_state, observer.stories());
    info!(
        complete = report.complete,
        evicted = report.evicted.len(),
        "simulation finished"
    );
    Ok(report)
}

fn build_report(
    pin: Pin,
    relay_order: Vec<String>,
    submissions: Vec<(String, usize)>,
    state: &MirrorState,
    stories: Vec<Story>,
) -> SimReport {
    let session = state.session.as_ref();
    let evicted = relay_order
        .iter()
        .filter(|name| session.is_some_and(|s| !s.contains(name)))
        .cloned()
        .collect();
    SimReport {
        pin,
        relay_order,
        evicted,
        submissions,
        complete: session.is_some_and(|s| s.complete),
        cancelled: session.is_some_and(|s| s.cancelled),
        stories,
    }
}

/// One simulated client. Returns the player's name and accepted
/// submissions.
async fn play(
    coordinator: Arc<SessionCoordinator>,
    pin: Pin,
    player: String,
    stalled: bool,
    think_time: Duration,
) -> Result<(String, usize), AppError> {
    let mut mirror = coordinator.mirror(&pin, Some(player.as_str())).await?;
    let mut submitted = 0;

    if stalled {
        mirror.wait_until(game_over).await;
        debug!(phase = ?mirror.phase(), "stalled player done watching");
        return Ok((player, submitted));
    }

    loop {
        let Some(state) = mirror
            .wait_until(|state| game_over(state) || actionable(state, &player).is_some())
            .await
        else {
            break;
        };
        if game_over(&state) {
            break;
        }
        let Some(task) = actionable(&state, &player) else {
            continue;
        };

        tokio::time::sleep(think_time).await;
        let hop = state
            .session
            .as_ref()
            .map_or(0, |session| session.chain_len(&task.root_player));
        let content = synthesize(&player, &task, hop);

        match coordinator
            .submit_task(&pin, &player, &task.root_player, task.task_type, content)
            .await
        {
            Ok(_) => {
                submitted += 1;
                mirror
                    .wait_until(|state| {
                        game_over(state) || actionable(state, &player).as_ref() != Some(&task)
                    })
                    .await;
            }
            Err(SessionError::TaskMismatch { detail, .. }) => {
                debug!(%detail, "mirror was behind, waiting for the next update");
                mirror.changed().await;
            }
            Err(err) if err.is_retryable() => {
                warn!(error = %err, "submission failed, retrying");
            }
            Err(
                SessionError::Cancelled
                | SessionError::NotFound(_)
                | SessionError::PlayerNotFound(_),
            ) => break,
            Err(err) => return Err(err.into()),
        }
    }

    debug!(submitted, phase = ?mirror.phase(), "player done");
    Ok((player, submitted))
}

fn game_over(state: &MirrorState) -> bool {
    matches!(state.phase, MirrorPhase::Complete) || state.phase.is_terminal()
}

/// The task `player` should work on now, if any.
fn actionable(state: &MirrorState, player: &str) -> Option<Task> {
    state
        .session
        .as_ref()
        .and_then(|session| session.current_task(player))
        .filter(|task| !task.is_waiting())
        .cloned()
}

/// Stand-in for a sentence or a drawing, naming who made it.
fn synthesize(player: &str, task: &Task, hop: usize) -> Content {
    let work = match task.task_type {
        TaskType::DrawPicture => "drew",
        _ => "wrote",
    };
    Content::new(format!("{player} {work} hop {hop} of {}", task.root_player))
}
