//! Link liveness bookkeeping.
//!
//! Two timestamps are tracked: the last frame *received* (drives the
//! bridge's `connected` flag) and the last successful *exchange* in either
//! direction (decides whether a ping probe is needed at all).

use std::time::{Duration, Instant};

/// Anything exchanged within this window counts as proof of life.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(30);

/// How long a ping waits for its pong.
pub const DEFAULT_PROBE_WAIT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct LinkHealth {
    last_received: Option<Instant>,
    last_exchange: Option<Instant>,
    freshness: Duration,
}

impl LinkHealth {
    pub fn new(freshness: Duration) -> Self {
        Self {
            last_received: None,
            last_exchange: None,
            freshness,
        }
    }

    /// A complete frame arrived from the peer.
    pub fn record_received(&mut self, now: Instant) {
        self.last_received = Some(now);
        self.last_exchange = Some(now);
    }

    /// A frame was written to the peer without error.
    pub fn record_sent(&mut self, now: Instant) {
        self.last_exchange = Some(now);
    }

    pub fn last_received(&self) -> Option<Instant> {
        self.last_received
    }

    /// True when something was exchanged inside the freshness window, so no
    /// probe is needed.
    pub fn is_fresh(&self, now: Instant) -> bool {
        self.last_exchange
            .is_some_and(|t| now.saturating_duration_since(t) < self.freshness)
    }
}

impl Default for LinkHealth {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
