//! Fixed-interval timers for tick-driven loops.

use std::time::{Duration, Instant};

/// Fires once per `interval`. The first check after construction is due
/// immediately unless the timer was started with [`Periodic::starting_at`].
#[derive(Debug, Clone)]
pub struct Periodic {
    interval: Duration,
    last: Option<Instant>,
}

impl Periodic {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// First firing one full interval after `now`.
    pub fn starting_at(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last: Some(now),
        }
    }

    /// True when the interval has elapsed; re-arms the timer.
    pub fn due(&mut self, now: Instant) -> bool {
        let ready = match self.last {
            None => true,
            Some(t) => now.saturating_duration_since(t) >= self.interval,
        };
        if ready {
            self.last = Some(now);
        }
        ready
    }

    /// Make the next [`Periodic::due`] check fire regardless of elapsed time.
    pub fn trigger(&mut self) {
        self.last = None;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
