//! Wall-clock abstraction
//!
//! The loop reads time and sleeps through a `Clock` so that day rollover,
//! array gating windows and staleness can be driven by simulated time.

use chrono::{Local, NaiveDateTime};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::transport::lock;

pub trait Clock: Send + Sync {
    /// Current local time
    fn now(&self) -> NaiveDateTime;

    /// Block for `duration`
    fn sleep(&self, duration: Duration);
}

/// Local system time and real sleeps
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually driven clock; `sleep` advances time instantly
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = lock(&self.now);
        *now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
    }

    pub fn set(&self, time: NaiveDateTime) {
        *lock(&self.now) = time;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *lock(&self.now)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Seconds from `earlier` to `later`, negative if the clock went backwards
pub fn seconds_between(earlier: NaiveDateTime, later: NaiveDateTime) -> f64 {
    (later - earlier)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or_else(|_| -((earlier - later).num_milliseconds() as f64) / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap()
    }

    #[test]
    fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new(start());
        let shared = clock.clone();
        shared.sleep(Duration::from_millis(1500));
        assert_eq!(
            clock.now(),
            NaiveDate::from_ymd_opt(2024, 3, 2)
                .unwrap()
                .and_hms_milli_opt(0, 0, 0, 500)
                .unwrap()
        );
    }

    #[test]
    fn test_seconds_between() {
        let a = start();
        let b = a + chrono::Duration::milliseconds(2500);
        assert_eq!(seconds_between(a, b), 2.5);
        assert_eq!(seconds_between(b, a), -2.5);
    }
}
