//! Application layer: command and query handlers, plus the background work
//! that keeps started games moving.

pub mod command_handlers;
pub mod coordinator;
pub mod mirror;
pub mod monitor;
pub mod query_handlers;
