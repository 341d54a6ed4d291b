//! Per-host runtime state tracked for the duration of the process.

use chrono::{DateTime, Utc};

/// Process-lifetime, per-host scheduling state (spec.md §3).
///
/// Owned by the rate limiter; the queue and fetch pipeline only read it
/// through the rate limiter's coordination hooks.
#[derive(Clone, Debug)]
pub struct DomainState {
    /// When the last fetch to this host started.
    pub last_fetch_at: Option<DateTime<Utc>>,
    /// Number of fetches to this host currently in flight.
    pub in_flight_count: u32,
    /// Earliest time the next fetch to this host may start.
    pub next_allowed_at: DateTime<Utc>,
    /// Consecutive fetch failures, reset to zero on any success.
    pub consecutive_errors: u32,
}

impl DomainState {
    /// A freshly-seen host: no history, immediately eligible.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        DomainState {
            last_fetch_at: None,
            in_flight_count: 0,
            next_allowed_at: now,
            consecutive_errors: 0,
        }
    }
}
