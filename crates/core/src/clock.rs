//! Time source seam.
//!
//! Services never call `Utc::now()` directly; they take a [`Clock`] so tests
//! can pin or advance "now" deterministically.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to an instant, advanced explicitly. Millisecond resolution.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(at.timestamp_millis()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        // An arbitrary mid-2025 instant; tests that care pin their own.
        Self::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().unwrap_or(DateTime::UNIX_EPOCH))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::default();
        let start = clock.now();
        clock.advance(Duration::hours(3));
        assert_eq!(clock.now() - start, Duration::hours(3));
    }

    #[test]
    fn fixed_clock_sets() {
        let clock = FixedClock::default();
        let at = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).single().unwrap();
        clock.set(at);
        assert_eq!(clock.now(), at);
    }
}
