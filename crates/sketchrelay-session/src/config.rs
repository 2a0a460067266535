//! Engine configuration.
//!
//! Every knob has a default matching the classic game; `from_env` applies
//! `SKETCHRELAY_*` overrides on top.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::pin::{MAX_PIN_DIGITS, MIN_PIN_DIGITS};

/// What happens to the work a player was holding when they leave a started
/// game voluntarily.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeavePolicy {
    /// Held and queued tasks are discarded with the player.
    #[default]
    Drop,
    /// Held and queued tasks are forwarded to the next player, as on
    /// eviction.
    Rethread,
}

impl FromStr for LeavePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "rethread" => Ok(Self::Rethread),
            other => Err(format!("expected `drop` or `rethread`, got {other:?}")),
        }
    }
}

impl fmt::Display for LeavePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Drop => "drop",
            Self::Rethread => "rethread",
        })
    }
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable holds a value that does not parse.
    #[error("{var}={value:?}: {reason}")]
    Unparsable {
        /// The offending variable.
        var: &'static str,
        /// Its raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Values parse but contradict each other or the game rules.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables of the relay engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Entries in a finished chain (seed included).
    pub chain_length: usize,
    /// Players required to start.
    pub min_players: usize,
    /// Session capacity.
    pub max_players: usize,
    /// Width of generated PINs.
    pub pin_digits: u8,
    /// Time between inactivity sweeps.
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,
    /// Idle time after which a working player is evicted.
    #[serde(with = "duration_secs")]
    pub inactivity_timeout: Duration,
    /// Delay between completion and deletion of the session document.
    #[serde(with = "duration_secs")]
    pub completion_grace: Duration,
    /// Largest accepted submission, in bytes.
    pub max_content_bytes: usize,
    /// Fate of a leaving player's work.
    pub leave_policy: LeavePolicy,
    /// PINs tried by `hostNewGame` before giving up.
    pub host_pin_attempts: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chain_length: 7,
            min_players: 2,
            max_players: 15,
            pin_digits: 6,
            sweep_interval: Duration::from_secs(60),
            inactivity_timeout: Duration::from_secs(300),
            completion_grace: Duration::from_secs(120),
            max_content_bytes: 1024 * 1024,
            leave_policy: LeavePolicy::Drop,
            host_pin_attempts: 8,
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by `SKETCHRELAY_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable does not parse or the result
    /// fails [`RelayConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`RelayConfig::from_env`], reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable does not parse or the result
    /// fails [`RelayConfig::validate`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let read = |var: &'static str| lookup(var).filter(|raw| !raw.trim().is_empty());

        if let Some(raw) = read("SKETCHRELAY_CHAIN_LENGTH") {
            config.chain_length = parse("SKETCHRELAY_CHAIN_LENGTH", &raw)?;
        }
        if let Some(raw) = read("SKETCHRELAY_MIN_PLAYERS") {
            config.min_players = parse("SKETCHRELAY_MIN_PLAYERS", &raw)?;
        }
        if let Some(raw) = read("SKETCHRELAY_MAX_PLAYERS") {
            config.max_players = parse("SKETCHRELAY_MAX_PLAYERS", &raw)?;
        }
        if let Some(raw) = read("SKETCHRELAY_PIN_DIGITS") {
            config.pin_digits = parse("SKETCHRELAY_PIN_DIGITS", &raw)?;
        }
        if let Some(raw) = read("SKETCHRELAY_SWEEP_INTERVAL_SECS") {
            config.sweep_interval =
                Duration::from_secs(parse("SKETCHRELAY_SWEEP_INTERVAL_SECS", &raw)?);
        }
        if let Some(raw) = read("SKETCHRELAY_INACTIVITY_TIMEOUT_SECS") {
            config.inactivity_timeout =
                Duration::from_secs(parse("SKETCHRELAY_INACTIVITY_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = read("SKETCHRELAY_COMPLETION_GRACE_SECS") {
            config.completion_grace =
                Duration::from_secs(parse("SKETCHRELAY_COMPLETION_GRACE_SECS", &raw)?);
        }
        if let Some(raw) = read("SKETCHRELAY_MAX_CONTENT_BYTES") {
            config.max_content_bytes = parse("SKETCHRELAY_MAX_CONTENT_BYTES", &raw)?;
        }
        if let Some(raw) = read("SKETCHRELAY_LEAVE_POLICY") {
            config.leave_policy = parse("SKETCHRELAY_LEAVE_POLICY", &raw)?;
        }
        if let Some(raw) = read("SKETCHRELAY_HOST_PIN_ATTEMPTS") {
            config.host_pin_attempts = parse("SKETCHRELAY_HOST_PIN_ATTEMPTS", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the values against each other and the game rules.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain_length == 0 {
            return Err(ConfigError::Invalid("chain_length must be at least 1".into()));
        }
        if self.min_players < 2 {
            return Err(ConfigError::Invalid("min_players must be at least 2".into()));
        }
        if self.max_players < self.min_players {
            return Err(ConfigError::Invalid(format!(
                "max_players ({}) is below min_players ({})",
                self.max_players, self.min_players
            )));
        }
        if !(MIN_PIN_DIGITS..=MAX_PIN_DIGITS).contains(&self.pin_digits) {
            return Err(ConfigError::Invalid(format!(
                "pin_digits must be between {MIN_PIN_DIGITS} and {MAX_PIN_DIGITS}"
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("sweep_interval must be positive".into()));
        }
        if self.host_pin_attempts == 0 {
            return Err(ConfigError::Invalid("host_pin_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Unparsable {
        var,
        value: raw.to_owned(),
        reason: e.to_string(),
    })
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
