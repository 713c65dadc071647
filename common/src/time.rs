//! Time utilities and constants for the rate feed.

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Feed timing constants.
pub mod constants {
    use super::Duration;

    /// Minimum interval between two spot refreshes (150 seconds).
    pub fn refresh_interval() -> Duration {
        Duration::seconds(150)
    }

    /// Host tick period (1 second).
    pub fn tick_interval() -> Duration {
        Duration::seconds(1)
    }

    /// Days before today for which a missing historical rate may be
    /// replaced by the spot quote.
    pub const SPOT_FALLBACK_DAYS: i64 = 2;
}

/// A timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Whole calendar days from `day` to `today` (negative for future days).
pub fn days_before(day: NaiveDate, today: NaiveDate) -> i64 {
    (today - day).num_days()
}

/// Source of the current time for refresh scheduling.
pub trait Clock: Send + Sync {
    /// Current timestamp.
    fn now(&self) -> Timestamp;

    /// Current UTC calendar day.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        now()
    }
}

/// Clock that only moves when told to.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug)]
pub struct ManualClock {
    now: parking_lot::Mutex<Timestamp>,
}

#[cfg(any(test, feature = "test-utils"))]
impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn at(start: Timestamp) -> Self {
        Self {
            now: parking_lot::Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}
