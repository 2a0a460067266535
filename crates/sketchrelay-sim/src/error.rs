//! Simulation error types.

use sketchrelay_core::error::SessionError;
use sketchrelay_session::config::ConfigError;
use thiserror::Error;

/// Startup and runtime errors for the simulation binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// A simulation option is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The relay configuration is invalid.
    #[error(transparent)]
    RelayConfig(#[from] ConfigError),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying the schema migrations failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The session engine rejected an operation.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// A simulated player's task panicked or was cancelled.
    #[error("player {player} failed: {reason}")]
    Player {
        /// The simulated player.
        player: String,
        /// What went wrong.
        reason: String,
    },
}
