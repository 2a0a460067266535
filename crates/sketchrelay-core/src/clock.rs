//! Clock abstraction for determinism.
//!
//! Activity timestamps and the inactivity timeout are both read through this
//! trait so tests can move time without sleeping.

use chrono::{DateTime, TimeDelta, Utc};

/// Abstraction over system time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Time elapsed since `earlier`. Negative if `earlier` lies in the future.
    fn since(&self, earlier: DateTime<Utc>) -> TimeDelta {
        self.now() - earlier
    }
}

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
