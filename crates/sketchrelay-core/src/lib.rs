//! Sketch Relay Core: shared abstractions.
//!
//! This crate defines the traits and types that the session engine and the
//! store backends agree on. It contains no infrastructure code.

pub mod clock;
pub mod command;
pub mod document;
pub mod error;
pub mod rng;
pub mod store;
