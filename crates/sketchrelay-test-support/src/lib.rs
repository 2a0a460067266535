//! Shared test doubles and utilities for the Sketch Relay session engine.

mod clock;
mod rng;
mod store;

pub use clock::{FixedClock, ManualClock, TokioClock, fixed_now};
pub use rng::{MaxRng, MockRng, SequenceRng};
pub use store::{FailingSessionStore, RecordingSessionStore, StoreCall, document};
