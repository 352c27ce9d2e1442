//! Monotonic tick counter for local version stamps.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// A source of "now" in nanoseconds. Injectable so tests get deterministic
/// ticks.
pub type TimeSource = Box<dyn Fn() -> i64 + Send + Sync>;

/// A monotonically increasing ticker.
///
/// [`tick`](Clock::tick) defaults to wall-clock nanoseconds but always
/// returns a value at least one greater than the previous invocation, across
/// every thread that shares the clock. Used exclusively as a tie-breaker for
/// device-local version stamping.
pub struct Clock {
    last: Mutex<i64>,
    source: TimeSource,
}

impl Clock {
    /// A clock backed by the system wall clock.
    pub fn new() -> Self {
        Self::with_source(Box::new(wall_clock_nanos))
    }

    /// A clock backed by an arbitrary time source.
    pub fn with_source(source: TimeSource) -> Self {
        Self {
            last: Mutex::new(0),
            source,
        }
    }

    /// The next tick: `max(last + 1, now)`.
    pub fn tick(&self) -> i64 {
        let mut last = self.last.lock();
        let cur = (self.source)();
        if cur > *last {
            *last = cur;
        } else {
            *last += 1;
        }
        *last
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock").field("last", &*self.last.lock()).finish()
    }
}

fn wall_clock_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
