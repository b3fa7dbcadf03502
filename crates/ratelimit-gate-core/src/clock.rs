//! Wall-clock abstraction and the "precise minute" bucket key.

use chrono::{DateTime, Local, Timelike};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Supplies wall time to the gate.
///
/// Abstracted behind a trait so tests can drive deterministic minute
/// boundaries without sleeping real time.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Local>;

    /// The bucket boundary string `YYYY-MM-DD-HH-MM` for the current minute.
    fn precise_minute(&self) -> String {
        format_precise_minute(self.now())
    }

    /// Seconds remaining until the next minute boundary, floored at 0.
    ///
    /// `(ceil(now, 1min) - now).seconds`, per the admission retry-after rule.
    fn seconds_to_next_minute(&self) -> f64 {
        let now = self.now();
        let remainder = 60.0 - now.second() as f64 - (now.nanosecond() as f64 / 1e9);
        remainder.max(0.0)
    }
}

fn format_precise_minute(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%d-%H-%M").to_string()
}

/// The default [`Clock`] implementation, backed by the system's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A deterministic clock for tests: holds a fixed instant that can be
/// advanced explicitly, so minute-boundary behavior is exercised without
/// relying on real wall-clock time.
#[derive(Clone)]
pub struct FakeClock {
    // milliseconds since epoch, shared so clones observe the same advances.
    millis: Arc<AtomicI64>,
}

impl FakeClock {
    /// Creates a fake clock fixed at `initial`.
    pub fn new(initial: DateTime<Local>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(initial.timestamp_millis())),
        }
    }

    /// Advances the clock by `duration`.
    pub fn advance(&self, duration: chrono::Duration) {
        self.millis
            .fetch_add(duration.num_milliseconds(), Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, at: DateTime<Local>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Local> {
        let millis = self.millis.load(Ordering::SeqCst);
        DateTime::from_timestamp_millis(millis)
            .expect("fake clock millis always in range")
            .with_timezone(&Local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn precise_minute_is_zero_padded() {
        let at = Local.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let clock = FakeClock::new(at);
        assert_eq!(clock.precise_minute(), "2026-01-02-03-04");
    }

    #[test]
    fn seconds_to_next_minute_at_boundary_start() {
        let at = Local.with_ymd_and_hms(2026, 1, 2, 3, 4, 0).unwrap();
        let clock = FakeClock::new(at);
        assert!((clock.seconds_to_next_minute() - 60.0).abs() < 1e-6);
    }

    #[test]
    fn seconds_to_next_minute_near_boundary_end() {
        let at = Local
            .with_ymd_and_hms(2026, 1, 2, 3, 4, 59)
            .unwrap()
            .with_nanosecond(500_000_000)
            .unwrap();
        let clock = FakeClock::new(at);
        let remaining = clock.seconds_to_next_minute();
        assert!(remaining >= 0.0 && remaining <= 1.0);
    }

    #[test]
    fn advancing_past_a_minute_changes_the_bucket() {
        let at = Local.with_ymd_and_hms(2026, 1, 2, 3, 4, 30).unwrap();
        let clock = FakeClock::new(at);
        let before = clock.precise_minute();
        clock.advance(chrono::Duration::seconds(40));
        let after = clock.precise_minute();
        assert_ne!(before, after);
        assert_eq!(after, "2026-01-02-03-05");
    }
}
