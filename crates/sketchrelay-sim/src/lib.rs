//! Sketch Relay simulation: hosts a game, seats simulated players and plays
//! it to completion against any session store.

pub mod error;
pub mod options;
pub mod simulation;

pub use error::AppError;
pub use options::SimOptions;
pub use simulation::{SimReport, run_simulation};
