//! Domain layer: session document, relay state machine, commands.

pub mod commands;
pub mod pin;
pub mod session;
pub mod task;
