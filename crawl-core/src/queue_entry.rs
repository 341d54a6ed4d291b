//! Persisted request state as tracked by the queue manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::Request;

/// Lifecycle status of a [`QueueEntry`] (spec.md §3 Invariants).
///
/// Valid transitions: `Queued -> InProgress -> {Done, Error, Skipped}`, and
/// `Error -> Queued` when `attempt < max_attempts`. No other transition is
/// permitted; in particular nothing re-enters `Queued` from `Done` or
/// `Skipped` — those are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    /// Waiting to be dequeued.
    Queued,
    /// Leased by a worker; `leased_by`/`lease_expires_at` are set.
    InProgress,
    /// Fetched (or served from cache) successfully; terminal.
    Done,
    /// Failed with no further retries available; terminal.
    Error,
    /// Dropped without attempting a fetch (robots deny, policy filter); terminal.
    Skipped,
}

impl QueueStatus {
    /// Whether this status can never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, QueueStatus::Done | QueueStatus::Error | QueueStatus::Skipped)
    }
}

/// A [`Request`] plus the queue-manager bookkeeping needed to schedule and
/// lease it durably.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueEntry {
    /// The underlying unit of work.
    pub request: Request,
    /// Current lifecycle status.
    pub status: QueueStatus,
    /// Most recent error message, if any (retained across retries for diagnostics).
    pub last_error: Option<String>,
    /// Worker id holding the current lease, if `status == InProgress`.
    pub leased_by: Option<String>,
    /// When the current lease expires and becomes reclaimable.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Earliest time this entry may be dequeued again (retry backoff, or
    /// `Retry-After` honoring per spec.md §6.4).
    pub next_eligible_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Wraps a freshly-created request as a newly queued entry.
    pub fn new(request: Request) -> Self {
        QueueEntry {
            request,
            status: QueueStatus::Queued,
            last_error: None,
            leased_by: None,
            lease_expires_at: None,
            next_eligible_at: None,
        }
    }

    /// Whether this entry is eligible to be dequeued right now.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Queued
            && self.next_eligible_at.map(|t| t <= now).unwrap_or(true)
    }
}
