//! Inactivity monitor.
//!
//! While a game runs, the monitor sweeps the session every
//! `sweep_interval`. A sweep stamps waiting players as active, then evicts
//! every working player idle for longer than `inactivity_timeout`. Each
//! eviction is its own transaction and re-checks staleness against the
//! stored document, so a player who submits between the scan and the
//! eviction is spared.

use std::sync::Arc;

use sketchrelay_core::clock::Clock;
use sketchrelay_core::error::SessionError;
use sketchrelay_core::store::SessionStore;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::application::command_handlers::{handle_inactive_user, mutate_session};
use crate::config::RelayConfig;
use crate::domain::commands::EvictInactivePlayer;
use crate::domain::pin::Pin;
use crate::domain::session::Withdrawal;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Waiting players whose activity was refreshed.
    pub refreshed: Vec<String>,
    /// Evictions, in sweep order.
    pub evicted: Vec<Withdrawal>,
    /// The session is complete, cancelled or gone; no further sweeps are
    /// needed.
    pub finished: bool,
}

impl SweepReport {
    fn finished() -> Self {
        Self {
            finished: true,
            ..Self::default()
        }
    }
}

/// Sweeps one session for inactive players.
pub struct InactivityMonitor {
    pin: Pin,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    config: RelayConfig,
}

impl InactivityMonitor {
    /// Creates a monitor for the session under `pin`.
    #[must_use]
    pub fn new(
        pin: Pin,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        config: RelayConfig,
    ) -> Self {
        Self {
            pin,
            store,
            clock,
            config,
        }
    }

    /// Runs a single sweep.
    ///
    /// A failed eviction is logged and the sweep moves on to the next stale
    /// player.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` or
    /// `SessionError::PersistenceFailure` if the refresh transaction fails.
    pub async fn sweep_once(&self) -> Result<SweepReport, SessionError> {
        let now = self.clock.now();
        let config = &self.config;
        let scan = mutate_session(self.store.as_ref(), &self.pin, |session| {
            if session.cancelled || session.complete {
                return Ok(None);
            }
            if !session.is_game_started {
                return Ok(Some((Vec::new(), Vec::new())));
            }
            let refreshed = session.refresh_waiting(now);
            Ok(Some((refreshed, session.stale_players(now, config))))
        })
        .await;

        let (refreshed, stale) = match scan {
            Ok(result) => match result.outcome {
                Some(lists) => lists,
                None => return Ok(SweepReport::finished()),
            },
            Err(SessionError::NotFound(_)) => return Ok(SweepReport::finished()),
            Err(err) => return Err(err),
        };

        let mut report = SweepReport {
            refreshed,
            ..SweepReport::default()
        };
        for player in stale {
            let command = EvictInactivePlayer {
                correlation_id: Uuid::new_v4(),
                pin: self.pin.clone(),
                player_name: player,
            };
            match handle_inactive_user(&command, self.clock.as_ref(), self.store.as_ref(), config)
                .await
            {
                Ok(result) => {
                    if let Some(withdrawal) = result.outcome {
                        report.evicted.push(withdrawal);
                    }
                    if result.session.complete || result.session.cancelled {
                        report.finished = true;
                        break;
                    }
                }
                Err(SessionError::NotFound(_)) => {
                    report.finished = true;
                    break;
                }
                Err(err) => {
                    warn!(player = %command.player_name, error = %err, "eviction failed");
                }
            }
        }
        Ok(report)
    }

    /// Sweeps every `sweep_interval` on a background task until the session
    /// ends or the handle stops it. The first sweep happens one interval
    /// after spawning.
    #[must_use]
    pub fn spawn(self) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let interval = self.config.sweep_interval;
        let span = info_span!("inactivity_monitor", pin = %self.pin);

        let task = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = &mut stop_rx => {
                            debug!("monitor stopped");
                            break;
                        }
                        _ = ticker.tick() => match self.sweep_once().await {
                            Ok(report) if report.finished => {
                                info!(evicted = report.evicted.len(), "session over, monitor exiting");
                                break;
                            }
                            Ok(report) => debug!(
                                refreshed = report.refreshed.len(),
                                evicted = report.evicted.len(),
                                "sweep done"
                            ),
                            Err(err) => warn!(error = %err, "inactivity sweep failed"),
                        },
                    }
                }
            }
            .instrument(span),
        );

        MonitorHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}

/// Controls a spawned [`InactivityMonitor`]. Dropping the handle stops the
/// monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Asks the monitor to exit after any sweep in progress.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Returns `true` once the monitor task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the monitor task to exit.
    pub async fn join(self) {
        let Self { stop, task } = self;
        // Keep the sender alive so joining does not itself stop the monitor.
        let _stop = stop;
        if let Err(err) = task.await {
            warn!(error = %err, "inactivity monitor task failed");
        }
    }
}
