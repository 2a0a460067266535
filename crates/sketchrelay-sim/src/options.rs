//! Simulation options read from the environment.

use std::time::Duration;

use sketchrelay_store::DEFAULT_MAX_ATTEMPTS;

use crate::error::AppError;

/// How the simulated game is played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimOptions {
    /// Number of simulated players, host included.
    pub players: usize,
    /// A player that joins but never submits anything.
    pub stall_player: Option<String>,
    /// Pause before each submission.
    pub think_time: Duration,
    /// Transaction attempts granted to the store.
    pub tx_attempts: u32,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            players: 4,
            stall_player: None,
            think_time: Duration::from_millis(250),
            tx_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl SimOptions {
    /// Defaults overridden by `SIM_PLAYERS`, `SIM_STALL_PLAYER`,
    /// `SIM_THINK_MS` and `SKETCHRELAY_TX_ATTEMPTS`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for values that do not parse or name an
    /// unknown player.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`SimOptions::from_env`], reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for values that do not parse or name an
    /// unknown player.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut options = Self::default();
        let read = |var: &str| lookup(var).map(|raw| raw.trim().to_owned()).filter(|raw| !raw.is_empty());

        if let Some(raw) = read("SIM_PLAYERS") {
            options.players = raw
                .parse()
                .map_err(|e| AppError::Config(format!("SIM_PLAYERS must be a count: {e}")))?;
        }
        if let Some(raw) = read("SIM_THINK_MS") {
            let millis: u64 = raw
                .parse()
                .map_err(|e| AppError::Config(format!("SIM_THINK_MS must be milliseconds: {e}")))?;
            options.think_time = Duration::from_millis(millis);
        }
        if let Some(raw) = read("SKETCHRELAY_TX_ATTEMPTS") {
            options.tx_attempts = raw.parse().map_err(|e| {
                AppError::Config(format!("SKETCHRELAY_TX_ATTEMPTS must be a count: {e}"))
            })?;
        }
        options.stall_player = read("SIM_STALL_PLAYER");

        if options.tx_attempts == 0 {
            return Err(AppError::Config("SKETCHRELAY_TX_ATTEMPTS must be at least 1".into()));
        }
        if let Some(stalled) = &options.stall_player {
            if !options.player_names().contains(stalled) {
                return Err(AppError::Config(format!(
                    "SIM_STALL_PLAYER {stalled:?} is not one of the {} players",
                    options.players
                )));
            }
        }
        Ok(options)
    }

    /// Names of the simulated players; the first one hosts.
    #[must_use]
    pub fn player_names(&self) -> Vec<String> {
        (1..=self.players).map(|i| format!("player{i}")).collect()
    }
}
