//! Sketch Relay simulation entry point.

use std::error::Error;
use std::sync::{Arc, Mutex};

use sketchrelay_core::clock::SystemClock;
use sketchrelay_core::rng::SystemRng;
use sketchrelay_core::store::SessionStore;
use sketchrelay_session::application::coordinator::SessionCoordinator;
use sketchrelay_session::config::RelayConfig;
use sketchrelay_sim::{AppError, SimOptions, run_simulation};
use sketchrelay_store::memory::MemorySessionStore;
use sketchrelay_store::postgres::PgSessionStore;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    tracing::info!("Starting Sketch Relay simulation");

    let config = RelayConfig::from_env()?;
    let options = SimOptions::from_env()?;
    let store = connect_store(&options).await?;

    let coordinator = Arc::new(SessionCoordinator::new(
        store,
        Arc::new(SystemClock),
        Arc::new(Mutex::new(SystemRng::new())),
        config,
    ));
    let report = run_simulation(Arc::clone(&coordinator), &options).await?;
    coordinator.shutdown();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Logs go to stderr so stdout carries only the report. `LOG_FORMAT=json`
/// switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// PostgreSQL when `DATABASE_URL` is set, in-memory otherwise.
async fn connect_store(options: &SimOptions) -> Result<Arc<dyn SessionStore>, AppError> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        tracing::info!("DATABASE_URL not set, using the in-memory store");
        return Ok(Arc::new(MemorySessionStore::with_max_attempts(
            options.tx_attempts,
        )));
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("connected to PostgreSQL, migrations applied");
    Ok(Arc::new(PgSessionStore::with_max_attempts(
        pool,
        options.tx_attempts,
    )))
}
