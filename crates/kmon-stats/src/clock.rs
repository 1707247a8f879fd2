//! Clock abstraction so window expiry is testable.

use parking_lot::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of "now" as a duration since the UNIX epoch.
///
/// Production code uses [`SystemClock`]; tests drive a [`MockClock`]
/// forward by hand to exercise expiry deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall-clock implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// Manually-advanced clock for tests.
#[derive(Debug, Default)]
pub struct MockClock {
    now: Mutex<Duration>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: Duration) {
        *self.now.lock() = to;
    }
}

impl Clock for MockClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}
