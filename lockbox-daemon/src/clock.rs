//! Wall-clock source for the main loop.
//!
//! Suspension always goes through `tokio::time`; only the notion of "now"
//! is injected, which keeps scheduling deterministic under paused time.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The host's real-time clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time derived from tokio's monotonic clock, anchored at a fixed
/// instant. Under `start_paused` it only moves when tokio time advances.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    anchor: DateTime<Utc>,
    origin: Instant,
}

impl MonotonicClock {
    pub fn starting_at(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn monotonic_clock_follows_tokio_time() {
        let anchor = Utc.with_ymd_and_hms(2026, 3, 14, 5, 0, 0).unwrap();
        let clock = MonotonicClock::starting_at(anchor);
        assert_eq!(clock.now(), anchor);

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(clock.now(), anchor + chrono::Duration::seconds(90));
    }

    #[test]
    fn system_clock_is_current() {
        let before = Utc::now();
        let now = SystemClock.now();
        assert!(now >= before);
    }
}
