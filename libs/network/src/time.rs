//! Clock abstraction and safe timestamp helpers
//!
//! Components that reason about elapsed wall time (cooldowns, grace periods,
//! session boundaries, command timeouts) take a [`Clock`] so tests can drive
//! time explicitly.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let step = ChronoDuration::from_std(by).unwrap_or(ChronoDuration::zero());
        let mut now = self.now.lock();
        *now = *now + step;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Microseconds since `start`, saturating instead of truncating
pub fn elapsed_us(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}

/// Nanoseconds since the UNIX epoch, 0 if the system clock is before 1970
pub fn safe_system_timestamp_ns() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
        Err(e) => {
            tracing::warn!("System time before UNIX epoch: {}", e);
            0
        }
    }
}

/// Whether `since + window` has passed at `now`
pub fn window_elapsed(since: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> bool {
    match ChronoDuration::from_std(window) {
        Ok(window) => now >= since + window,
        Err(_) => false,
    }
}
