//! The `Store` trait itself.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crawl_core::{CachedPage, DecisionTrace, PageRecord, QueueEntry, RequestId, RobotsPolicy};

use crate::error::BackendResult;
use crate::host_gate::HostGate;

/// The new state a queue entry should move to after a worker has settled it.
///
/// Produced by the fetch pipeline's caller (the worker loop, §4.9) and
/// applied atomically by [`Store::queue_settle`].
#[derive(Debug)]
pub enum QueueSettlement {
    /// The fetch (or cache hit/fallback) succeeded.
    Done,
    /// A transient error occurred and a further attempt is allowed.
    Retry {
        /// The attempt counter to record (already incremented by the caller).
        attempt: u32,
        /// Earliest time this entry may be dequeued again.
        not_before: DateTime<Utc>,
        /// Error detail for diagnostics.
        last_error: String,
    },
    /// The error is terminal (non-retryable, or retries exhausted).
    Error {
        /// Error detail for diagnostics.
        last_error: String,
    },
    /// The request was skipped without a fetch attempt.
    Skipped {
        /// Human-readable reason.
        reason: String,
    },
    /// The orchestrator canceled this unit of work; returns to `Queued`
    /// unchanged (attempt count preserved) rather than counted as a retry.
    Canceled,
}

/// The crawl core's only persistence dependency (spec.md §6.2).
///
/// Every method is async and must be safe for concurrent callers; the
/// interface makes no assumption about whether the implementation is
/// in-memory, file-backed, or networked. Implementations may batch writes
/// internally, but after a successful `queue_settle(.., Done, ..)` returns,
/// the effect must survive a process restart (spec.md §6.2 durability
/// requirement) — this is a property of durable implementations
/// (`crawl-store-sqlite`), not of `crawl-store-memory`, which documents
/// itself as non-durable.
#[async_trait]
pub trait Store: Send + Sync {
    /// Looks up a queue entry by id, regardless of status.
    async fn queue_lookup(&self, id: &RequestId) -> BackendResult<Option<QueueEntry>>;

    /// Inserts or overwrites a queue entry. Callers are responsible for
    /// duplicate-checking via `queue_lookup` / `queue_recently_done` first —
    /// this method does not itself enforce the "at most one active entry per
    /// URL" invariant.
    async fn queue_upsert(&self, entry: QueueEntry) -> BackendResult<()>;

    /// Atomically picks the highest-priority eligible entry (primary key
    /// `priority` ascending, tie-break `enqueued_at` ascending), leases it to
    /// `worker_id` for `lease`, and marks it `InProgress`.
    ///
    /// `gate` is consulted per-candidate so a host already at its
    /// per-domain concurrency cap is skipped in favor of the next eligible
    /// entry, rather than leased and immediately blocked.
    async fn queue_pick_next(
        &self,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
        gate: &dyn HostGate,
    ) -> BackendResult<Option<QueueEntry>>;

    /// Applies the outcome of a completed lease.
    async fn queue_settle(
        &self,
        id: &RequestId,
        settlement: QueueSettlement,
        now: DateTime<Utc>,
    ) -> BackendResult<()>;

    /// Returns any `InProgress` entry whose lease has expired to `Queued`,
    /// incrementing its attempt counter, and returns how many were reclaimed.
    async fn queue_reclaim_leases(&self, now: DateTime<Utc>) -> BackendResult<u64>;

    /// Whether `id` reached a terminal state within `window` of `now` — the
    /// dedup window that keeps a just-finished URL from being re-enqueued
    /// immediately (spec.md §4.4).
    async fn queue_recently_done(
        &self,
        id: &RequestId,
        now: DateTime<Utc>,
        window: Duration,
    ) -> BackendResult<bool>;

    /// Count of entries in `Queued` or `InProgress` status.
    async fn queue_active_len(&self) -> BackendResult<usize>;

    /// The id of the lowest-priority `Queued` entry, if any — used by
    /// backpressure eviction when the queue exceeds `max_queue_size` (§5).
    async fn queue_lowest_priority_queued(&self) -> BackendResult<Option<RequestId>>;

    /// Removes a still-`Queued` entry outright (used only by overflow
    /// eviction; settled entries go through `queue_settle` instead).
    async fn queue_evict(&self, id: &RequestId) -> BackendResult<()>;

    /// Reads a cache entry for `url`, honoring `max_age_ms` (spec.md §4.5).
    async fn cache_get(
        &self,
        url: &str,
        max_age_ms: i64,
        now: DateTime<Utc>,
    ) -> BackendResult<Option<CachedPage>>;

    /// Writes (or overwrites) a cache entry.
    async fn cache_put(&self, page: CachedPage) -> BackendResult<()>;

    /// Reads a cache entry for `url` ignoring age, for fallback use.
    async fn cache_get_any(&self, url: &str) -> BackendResult<Option<CachedPage>>;

    /// Evicts cache entries older than `ttl` and, if the remaining set still
    /// exceeds `max_bytes` of body content, the oldest entries beyond that
    /// budget too (spec.md §4.5 eviction: time-based and size-based).
    /// Returns the number of entries removed.
    async fn cache_evict_expired(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
        max_bytes: u64,
    ) -> BackendResult<u64>;

    /// Reads the cached robots policy for `host`, if any.
    async fn robots_get(&self, host: &str) -> BackendResult<Option<RobotsPolicy>>;

    /// Writes (or overwrites) the robots policy for `host`.
    async fn robots_put(&self, host: &str, policy: RobotsPolicy) -> BackendResult<()>;

    /// Persists a canonical fetch result.
    async fn page_put(&self, record: PageRecord) -> BackendResult<()>;

    /// Appends a decision trace. Only called when persistence is enabled for
    /// that trace kind; in-memory-only traces never reach the store.
    async fn decision_append(&self, trace: DecisionTrace) -> BackendResult<()>;
}
