//! Clock capability and month arithmetic
//!
//! The ledger never reads the wall clock directly. "Now" comes from an
//! injected [`Clock`], so tests drive time with [`ManualClock`].

use chrono::{DateTime, Duration, Months, Utc};
use parking_lot::RwLock;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Jump to an absolute instant
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.write() = instant;
    }

    /// Move forward by a fixed duration
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += by;
    }

    /// Move forward by calendar months
    pub fn advance_months(&self, months: u32) {
        let mut now = self.now.write();
        if let Some(next) = add_months(*now, months) {
            *now = next;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Add calendar months to a timestamp.
///
/// The day clamps to the last day of a shorter target month
/// (Jan 31 + 1 month = Feb 28/29). `None` only past chrono's range.
pub fn add_months(instant: DateTime<Utc>, months: u32) -> Option<DateTime<Utc>> {
    instant.checked_add_months(Months::new(months))
}
