//! Expiry countdown derived from a transaction's creation time.
//!
//! Nothing here is stored authoritatively: the remaining time is recomputed
//! from `created_at + window` against the clock on every tick.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock mutex poisoned") = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

/// Countdown to the gateway-side expiry of one transaction.
#[derive(Debug, Clone)]
pub struct Countdown {
    expires_at: DateTime<Utc>,
    last: Option<u64>,
}

impl Countdown {
    pub fn new(created_at: DateTime<Utc>, window_secs: u64) -> Self {
        let window = Duration::seconds(i64::try_from(window_secs).unwrap_or(i64::MAX / 1000));
        Self {
            expires_at: created_at + window,
            last: None,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// `max(0, floor((expires_at - now) / 1000ms))`.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.expires_at - now).num_milliseconds();
        if millis <= 0 {
            0
        } else {
            (millis / 1000) as u64
        }
    }

    /// Recompute the remaining seconds.
    ///
    /// Never increases, even if the clock steps backwards, and stays at zero
    /// once reached.
    pub fn tick(&mut self, now: DateTime<Utc>) -> u64 {
        let computed = self.remaining_at(now);
        let remaining = match self.last {
            Some(last) => computed.min(last),
            None => computed,
        };
        self.last = Some(remaining);
        remaining
    }

    pub fn is_finished(&self) -> bool {
        self.last == Some(0)
    }
}

/// Format seconds as `MM:SS`.
pub fn format_remaining(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created() -> DateTime<Utc> {
        "2024-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_starts_at_full_window() {
        let mut countdown = Countdown::new(created(), 955);
        assert_eq!(countdown.tick(created()), 955);
        assert_eq!(format_remaining(955), "15:55");
    }

    #[test]
    fn test_reaches_zero_exactly_at_expiry() {
        let mut countdown = Countdown::new(created(), 955);
        let expiry = created() + Duration::seconds(955);
        assert_eq!(countdown.tick(expiry), 0);
        assert_eq!(format_remaining(0), "00:00");
        assert!(countdown.is_finished());
    }

    #[test]
    fn test_floors_partial_seconds() {
        let countdown = Countdown::new(created(), 955);
        let now = created() + Duration::milliseconds(1500);
        assert_eq!(countdown.remaining_at(now), 953);
    }

    #[test]
    fn test_tick_is_idempotent_and_clamped() {
        let mut countdown = Countdown::new(created(), 955);
        let now = created() + Duration::seconds(10);
        assert_eq!(countdown.tick(now), 945);
        assert_eq!(countdown.tick(now), 945);

        let late = created() + Duration::seconds(2000);
        assert_eq!(countdown.tick(late), 0);
        assert_eq!(countdown.tick(late + Duration::seconds(5)), 0);
        assert_eq!(countdown.tick(late), 0);
    }

    #[test]
    fn test_never_increases_when_clock_goes_back() {
        let mut countdown = Countdown::new(created(), 955);
        assert_eq!(countdown.tick(created() + Duration::seconds(100)), 855);
        assert_eq!(countdown.tick(created() + Duration::seconds(50)), 855);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(created());
        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now(), created() + Duration::seconds(30));
        clock.set(created());
        assert_eq!(clock.now(), created());
    }
}
