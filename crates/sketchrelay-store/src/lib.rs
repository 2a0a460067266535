//! Session store backends.
//!
//! [`memory::MemorySessionStore`] serves single-process deployments and
//! tests. [`postgres::PgSessionStore`] keeps one JSONB row per session and
//! fans changes out through `LISTEN/NOTIFY`.

pub mod memory;
pub mod postgres;
pub mod schema;

/// Default number of times a transaction body is run before giving up with
/// a conflict.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 16;

/// Capacity of each per-key change channel.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;
