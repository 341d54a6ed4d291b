//! Durable, priority-ordered work list (spec.md §4.4).
//!
//! Thin policy layer over [`Store`]: the store owns ordering and lease
//! bookkeeping, this adds the duplicate-rejection and backpressure-eviction
//! policy spec.md assigns to the queue manager rather than the storage
//! mechanism, plus translating a pipeline [`Outcome`] into the retry/give-up
//! decision spec.md §4.4 assigns to "the worker is the sole policy
//! authority" (here: the queue manager the worker delegates to).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crawl_backend::{BackendError, HostGate, QueueSettlement, Store};
use crawl_core::{DecisionFields, DecisionKind, Outcome, QueueEntry, Request};

use crate::telemetry::TelemetrySink;

/// Backoff applied to a retried request when the fetch pipeline did not
/// already compute a more specific `not_before` (e.g. from `Retry-After`).
/// `base × 2^min(attempt, 6)`, matching the exponential shape spec.md §4.3
/// specifies for rate-limiter backoff, applied here to queue retries since
/// spec.md §4.4 only names "exponential backoff" without a separate constant.
fn default_retry_backoff(attempt: u32) -> chrono::Duration {
    let exp = attempt.min(6);
    let secs = 2u64.saturating_pow(exp).min(600);
    chrono::Duration::seconds(secs as i64)
}

/// Why [`QueueManager::enqueue`] rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Already `queued` or `in_progress`.
    Duplicate,
    /// Reached a terminal state within the dedup window.
    RecentlyDone,
    /// The queue was full and this request's priority was not good enough
    /// to evict the current worst entry.
    QueueFull,
}

/// Durable, priority-ordered work list (spec.md §4.4).
pub struct QueueManager {
    store: Arc<dyn Store>,
    telemetry: TelemetrySink,
    max_queue_size: usize,
    dedup_window: Duration,
    max_attempts: u32,
}

impl QueueManager {
    /// Builds a manager over `store`, applying `max_queue_size` backpressure
    /// and `dedup_window`/`max_attempts` retry policy.
    pub fn new(
        store: Arc<dyn Store>,
        telemetry: TelemetrySink,
        max_queue_size: usize,
        dedup_window: Duration,
        max_attempts: u32,
    ) -> Self {
        QueueManager { store, telemetry, max_queue_size, dedup_window, max_attempts }
    }

    /// Attempts to admit `request`. Rejects duplicates and, when the queue
    /// is full, anything whose priority is no better than the current
    /// worst queued entry (spec.md §5 backpressure).
    pub async fn enqueue(&self, request: Request) -> Result<Result<(), RejectReason>, BackendError> {
        let now = Utc::now();

        if let Some(existing) = self.store.queue_lookup(&request.id).await? {
            if !existing.status.is_terminal() {
                return Ok(Err(RejectReason::Duplicate));
            }
        }
        if self.store.queue_recently_done(&request.id, now, self.dedup_window).await? {
            return Ok(Err(RejectReason::RecentlyDone));
        }

        let active_len = self.store.queue_active_len().await?;
        if active_len >= self.max_queue_size {
            let Some(worst_id) = self.store.queue_lowest_priority_queued().await? else {
                return Ok(Err(RejectReason::QueueFull));
            };
            let Some(worst) = self.store.queue_lookup(&worst_id).await? else {
                return Ok(Err(RejectReason::QueueFull));
            };
            let better = request
                .priority
                .cmp(&worst.request.priority)
                .then(request.enqueued_at.cmp(&worst.request.enqueued_at))
                .is_lt();
            if !better {
                self.telemetry.decision(
                    DecisionKind::QueueOverflow,
                    Some(request.url.clone()),
                    Some(request.host.clone()),
                    DecisionFields::empty().with("reason", "queue-full"),
                );
                return Ok(Err(RejectReason::QueueFull));
            }
            self.store.queue_evict(&worst_id).await?;
            self.telemetry.decision(
                DecisionKind::QueueOverflow,
                Some(worst.request.url.clone()),
                Some(worst.request.host.clone()),
                DecisionFields::empty().with("reason", "evicted-for-higher-priority"),
            );
        }

        self.store.queue_upsert(QueueEntry::new(request)).await?;
        Ok(Ok(()))
    }

    /// Leases the next eligible entry to `worker_id`, skipping hosts `gate`
    /// reports as already at capacity.
    pub async fn dequeue(
        &self,
        worker_id: &str,
        lease: Duration,
        gate: &dyn HostGate,
    ) -> Result<Option<QueueEntry>, BackendError> {
        self.store.queue_pick_next(worker_id, lease, Utc::now(), gate).await
    }

    /// Applies the outcome of a completed lease, converting [`Outcome::Retry`]
    /// into a terminal give-up once `max_attempts` is reached.
    pub async fn settle(&self, entry: &QueueEntry, outcome: Outcome) -> Result<(), BackendError> {
        let now = Utc::now();
        let settlement = match outcome {
            Outcome::Done => QueueSettlement::Done,
            Outcome::Canceled => QueueSettlement::Canceled,
            Outcome::Skip { reason } => {
                self.telemetry.decision(
                    DecisionKind::PolicySkip,
                    Some(entry.request.url.clone()),
                    Some(entry.request.host.clone()),
                    DecisionFields::empty().with("reason", reason.clone()),
                );
                QueueSettlement::Skipped { reason }
            }
            Outcome::GiveUp { reason } => {
                self.telemetry.decision(
                    DecisionKind::GiveUp,
                    Some(entry.request.url.clone()),
                    Some(entry.request.host.clone()),
                    DecisionFields::empty().with("reason", reason.clone()),
                );
                QueueSettlement::Error { last_error: reason }
            }
            Outcome::Retry { reason, not_before } => {
                let attempt = entry.request.attempt + 1;
                if attempt >= self.max_attempts {
                    self.telemetry.decision(
                        DecisionKind::GiveUp,
                        Some(entry.request.url.clone()),
                        Some(entry.request.host.clone()),
                        DecisionFields::empty().with("reason", reason.clone()).with("attempts", attempt),
                    );
                    QueueSettlement::Error { last_error: reason }
                } else {
                    let not_before = not_before.max(now);
                    self.telemetry.decision(
                        DecisionKind::Retry,
                        Some(entry.request.url.clone()),
                        Some(entry.request.host.clone()),
                        DecisionFields::empty().with("reason", reason.clone()).with("attempt", attempt),
                    );
                    QueueSettlement::Retry { attempt, not_before, last_error: reason }
                }
            }
        };
        self.store.queue_settle(&entry.request.id, settlement, now).await
    }

    /// Returns expired leases to `queued`, returning how many were reclaimed.
    pub async fn reclaim_expired_leases(&self) -> Result<u64, BackendError> {
        self.store.queue_reclaim_leases(Utc::now()).await
    }

    /// Count of entries in `queued` or `in_progress`.
    pub async fn active_len(&self) -> Result<usize, BackendError> {
        self.store.queue_active_len().await
    }
}

/// Computes a `not_before` for a retryable outcome with no server-provided
/// hint (e.g. a connection error), using [`default_retry_backoff`].
pub fn default_not_before(now: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
    now + default_retry_backoff(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawl_core::{Origin, Request, RequestMeta};
    use crawl_store_memory::InMemoryStore;

    fn request(url: &str, host: &str, priority: i64, now: DateTime<Utc>) -> Request {
        let meta = RequestMeta::for_origin(Origin::Link, 900_000);
        Request::new(url.to_string(), host.to_string(), 0, meta, now).with_priority(priority)
    }

    fn manager(store: Arc<InMemoryStore>, max_queue_size: usize) -> QueueManager {
        let telemetry = TelemetrySink::new(store.clone(), false, 64);
        QueueManager::new(store, telemetry, max_queue_size, Duration::from_secs(3600), 3)
    }

    #[tokio::test]
    async fn rejects_duplicate_enqueue() {
        let store = Arc::new(InMemoryStore::new());
        let queue = manager(store, 100);
        let now = Utc::now();
        assert!(queue.enqueue(request("https://a.test/", "a.test", 50, now)).await.unwrap().is_ok());
        let result = queue.enqueue(request("https://a.test/", "a.test", 50, now)).await.unwrap();
        assert_eq!(result, Err(RejectReason::Duplicate));
    }

    #[tokio::test]
    async fn evicts_lowest_priority_when_full() {
        let store = Arc::new(InMemoryStore::new());
        let queue = manager(store, 1);
        let now = Utc::now();
        queue.enqueue(request("https://a.test/low", "a.test", 500, now)).await.unwrap().unwrap();
        let result = queue.enqueue(request("https://a.test/high", "a.test", 0, now)).await.unwrap();
        assert!(result.is_ok());
        assert_eq!(queue.active_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retry_becomes_give_up_after_max_attempts() {
        let store = Arc::new(InMemoryStore::new());
        let queue = manager(store.clone(), 100);
        let now = Utc::now();
        let mut req = request("https://a.test/", "a.test", 0, now);
        req.attempt = 2;
        queue.store.queue_upsert(QueueEntry::new(req.clone())).await.unwrap();
        let entry = queue.store.queue_lookup(&req.id).await.unwrap().unwrap();

        queue
            .settle(&entry, Outcome::Retry { reason: "timeout".to_string(), not_before: now })
            .await
            .unwrap();

        let entry = queue.store.queue_lookup(&req.id).await.unwrap().unwrap();
        assert_eq!(entry.status, crawl_core::QueueStatus::Error);
    }
}
