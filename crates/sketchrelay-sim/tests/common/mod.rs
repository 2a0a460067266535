//! Shared helpers for simulation tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sketchrelay_core::rng::DeterministicRng;
use sketchrelay_session::application::coordinator::SessionCoordinator;
use sketchrelay_session::config::RelayConfig;
use sketchrelay_sim::SimOptions;
use sketchrelay_store::memory::MemorySessionStore;
use sketchrelay_store::postgres::PgSessionStore;
use sqlx::PgPool;
use sketchrelay_test_support::{MaxRng, TokioClock, fixed_now};

/// A coordinator over a fresh in-memory store whose clock follows tokio's
/// (paused) timer. The RNG keeps the join order as the relay order.
pub fn coordinator(config: RelayConfig) -> (Arc<SessionCoordinator>, Arc<MemorySessionStore>) {
    let store = Arc::new(MemorySessionStore::new());
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(MaxRng));
    let coordinator = SessionCoordinator::new(
        store.clone(),
        Arc::new(TokioClock::new(fixed_now())),
        rng,
        config,
    );
    (Arc::new(coordinator), store)
}

/// A coordinator over `PostgreSQL`, on wall-clock time.
pub fn pg_coordinator(pool: PgPool, config: RelayConfig) -> Arc<SessionCoordinator> {
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(MaxRng));
    Arc::new(SessionCoordinator::new(
        Arc::new(PgSessionStore::new(pool)),
        Arc::new(TokioClock::new(fixed_now())),
        rng,
        config,
    ))
}

/// Options for `players` prompt players.
pub fn options(players: usize) -> SimOptions {
    SimOptions {
        players,
        think_time: Duration::from_secs(2),
        ..SimOptions::default()
    }
}
