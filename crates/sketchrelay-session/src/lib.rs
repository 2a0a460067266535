//! Sketch Relay: session synchronization and task-relay engine.
//!
//! Routes writing and drawing tasks around a circle of players, keeps the
//! shared session document consistent under concurrent submissions, and
//! evicts stalled players without breaking any story chain.

pub mod application;
pub mod config;
pub mod domain;
