//! Adaptive poll interval.
//!
//! Polling snaps back to the base interval as soon as either direction sees
//! traffic and decays in steps while the session stays idle.

use std::time::{Duration, Instant};

/// Idle thresholds and the interval used below each, most aggressive first.
const TIERS: [(Duration, Option<Duration>); 3] = [
    (Duration::from_secs(5), None),
    (Duration::from_secs(30), Some(Duration::from_secs(5))),
    (Duration::from_secs(300), Some(Duration::from_secs(30))),
];

/// Interval once the session has been idle past every tier.
pub const IDLE_INTERVAL: Duration = Duration::from_secs(60);

/// Pick the next poll interval from the most recent activity in either direction.
///
/// `None` in a tier stands for the configured `base` interval.
pub fn next_interval(now: Instant, last_send: Instant, last_recv: Instant, base: Duration) -> Duration {
    let idle = now.saturating_duration_since(last_send.max(last_recv));
    for (threshold, interval) in TIERS {
        if idle < threshold {
            return interval.unwrap_or(base);
        }
    }
    IDLE_INTERVAL
}

/// Per-connection schedule state, owned by the session loop.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    base: Duration,
    last_send: Instant,
    last_recv: Instant,
}

impl PollSchedule {
    /// Session creation counts as activity in both directions.
    pub fn new(base: Duration, created: Instant) -> Self {
        Self {
            base,
            last_send: created,
            last_recv: created,
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn record_send(&mut self, at: Instant) {
        self.last_send = at;
    }

    pub fn record_recv(&mut self, at: Instant) {
        self.last_recv = at;
    }

    pub fn next_interval(&self, now: Instant) -> Duration {
        next_interval(now, self.last_send, self.last_recv, self.base)
    }
}
