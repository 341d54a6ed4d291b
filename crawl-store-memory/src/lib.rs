//! A `Store` implementation that keeps everything in `DashMap`s.
//!
//! This generalizes `hitbox_moka::MokaBackend`'s role in the teacher repo —
//! the fast, non-durable, single-process backend used for tests and small
//! one-shot runs — but drops Moka itself: a crawl queue needs priority-order
//! dequeue and lease bookkeeping that a pure TTL cache doesn't provide, so
//! this backend is built directly on `dashmap::DashMap` instead, with each
//! operation group (queue, cache, robots, pages, decisions) as one or more
//! independent maps rather than a single `CacheKey -> CacheValue` table.
//!
//! Nothing here is persisted: a process restart loses all state. Use
//! `crawl-store-sqlite` when that matters.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crawl_backend::{BackendResult, HostGate, QueueSettlement, Store};
use crawl_core::{
    CachedPage, DecisionTrace, PageRecord, QueueEntry, QueueStatus, RequestId, RobotsPolicy,
};

/// In-memory, non-durable [`Store`].
#[derive(Default)]
pub struct InMemoryStore {
    queue: DashMap<RequestId, QueueEntry>,
    done_at: DashMap<RequestId, DateTime<Utc>>,
    cache: DashMap<String, CachedPage>,
    robots: DashMap<String, RobotsPolicy>,
    pages: DashMap<String, PageRecord>,
    decisions: Mutex<Vec<DecisionTrace>>,
}

impl InMemoryStore {
    /// Builds an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every decision trace appended so far, oldest first.
    ///
    /// Exposed for tests that assert on the decision log; production code
    /// should prefer the orchestrator's own bounded recent-milestones view
    /// rather than reading back the full unbounded history this keeps.
    pub fn decisions(&self) -> Vec<DecisionTrace> {
        self.decisions.lock().expect("decisions mutex poisoned").clone()
    }

    /// Snapshot of every persisted page record, for test assertions.
    pub fn pages(&self) -> Vec<PageRecord> {
        self.pages.iter().map(|e| e.value().clone()).collect()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn queue_lookup(&self, id: &RequestId) -> BackendResult<Option<QueueEntry>> {
        Ok(self.queue.get(id).map(|e| e.clone()))
    }

    async fn queue_upsert(&self, entry: QueueEntry) -> BackendResult<()> {
        self.queue.insert(entry.request.id.clone(), entry);
        Ok(())
    }

    async fn queue_pick_next(
        &self,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
        gate: &dyn HostGate,
    ) -> BackendResult<Option<QueueEntry>> {
        let mut candidates: Vec<QueueEntry> = self
            .queue
            .iter()
            .filter(|e| e.is_eligible(now) && gate.is_host_eligible(&e.request.host))
            .map(|e| e.value().clone())
            .collect();

        candidates.sort_by(|a, b| {
            a.request
                .priority
                .cmp(&b.request.priority)
                .then(a.request.enqueued_at.cmp(&b.request.enqueued_at))
        });

        let Some(mut chosen) = candidates.into_iter().next() else {
            return Ok(None);
        };

        chosen.status = QueueStatus::InProgress;
        chosen.leased_by = Some(worker_id.to_string());
        chosen.lease_expires_at = Some(
            now + chrono::Duration::from_std(lease)
                .unwrap_or_else(|_| chrono::Duration::seconds(0)),
        );
        self.queue.insert(chosen.request.id.clone(), chosen.clone());
        Ok(Some(chosen))
    }

    async fn queue_settle(
        &self,
        id: &RequestId,
        settlement: QueueSettlement,
        now: DateTime<Utc>,
    ) -> BackendResult<()> {
        let Some(mut entry) = self.queue.get_mut(id) else {
            return Ok(());
        };
        entry.leased_by = None;
        entry.lease_expires_at = None;
        match settlement {
            QueueSettlement::Done => {
                entry.status = QueueStatus::Done;
                entry.last_error = None;
                self.done_at.insert(id.clone(), now);
            }
            QueueSettlement::Retry {
                attempt,
                not_before,
                last_error,
            } => {
                entry.status = QueueStatus::Queued;
                entry.request.attempt = attempt;
                entry.next_eligible_at = Some(not_before);
                entry.last_error = Some(last_error);
            }
            QueueSettlement::Error { last_error } => {
                entry.status = QueueStatus::Error;
                entry.last_error = Some(last_error);
                self.done_at.insert(id.clone(), now);
            }
            QueueSettlement::Skipped { reason } => {
                entry.status = QueueStatus::Skipped;
                entry.last_error = Some(reason);
                self.done_at.insert(id.clone(), now);
            }
            QueueSettlement::Canceled => {
                entry.status = QueueStatus::Queued;
            }
        }
        Ok(())
    }

    async fn queue_reclaim_leases(&self, now: DateTime<Utc>) -> BackendResult<u64> {
        let mut reclaimed = 0u64;
        for mut entry in self.queue.iter_mut() {
            if entry.status == QueueStatus::InProgress {
                if let Some(expires) = entry.lease_expires_at {
                    if expires <= now {
                        entry.status = QueueStatus::Queued;
                        entry.leased_by = None;
                        entry.lease_expires_at = None;
                        entry.request.attempt += 1;
                        reclaimed += 1;
                    }
                }
            }
        }
        Ok(reclaimed)
    }

    async fn queue_recently_done(
        &self,
        id: &RequestId,
        now: DateTime<Utc>,
        window: Duration,
    ) -> BackendResult<bool> {
        let Some(done_at) = self.done_at.get(id) else {
            return Ok(false);
        };
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(now - *done_at <= window)
    }

    async fn queue_active_len(&self) -> BackendResult<usize> {
        Ok(self
            .queue
            .iter()
            .filter(|e| matches!(e.status, QueueStatus::Queued | QueueStatus::InProgress))
            .count())
    }

    async fn queue_lowest_priority_queued(&self) -> BackendResult<Option<RequestId>> {
        let worst = self
            .queue
            .iter()
            .filter(|e| e.status == QueueStatus::Queued)
            .max_by(|a, b| {
                a.request
                    .priority
                    .cmp(&b.request.priority)
                    .then(a.request.enqueued_at.cmp(&b.request.enqueued_at))
            })
            .map(|e| e.request.id.clone());
        Ok(worst)
    }

    async fn queue_evict(&self, id: &RequestId) -> BackendResult<()> {
        self.queue.remove(id);
        Ok(())
    }

    async fn cache_get(
        &self,
        url: &str,
        max_age_ms: i64,
        now: DateTime<Utc>,
    ) -> BackendResult<Option<CachedPage>> {
        let Some(page) = self.cache.get(url) else {
            return Ok(None);
        };
        if page.age_ms(now) <= max_age_ms {
            Ok(Some(page.clone()))
        } else {
            Ok(None)
        }
    }

    async fn cache_put(&self, page: CachedPage) -> BackendResult<()> {
        self.cache.insert(page.url.clone(), page);
        Ok(())
    }

    async fn cache_get_any(&self, url: &str) -> BackendResult<Option<CachedPage>> {
        Ok(self.cache.get(url).map(|p| p.clone()))
    }

    async fn cache_evict_expired(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
        max_bytes: u64,
    ) -> BackendResult<u64> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        let mut removed = 0u64;
        let expired: Vec<String> = self
            .cache
            .iter()
            .filter(|e| now - e.fetched_at > ttl)
            .map(|e| e.key().clone())
            .collect();
        for url in expired {
            self.cache.remove(&url);
            removed += 1;
        }

        let mut total_bytes: u64 = self.cache.iter().map(|e| e.body_bytes.len() as u64).sum();
        if total_bytes > max_bytes {
            let mut by_age: Vec<(String, DateTime<Utc>)> =
                self.cache.iter().map(|e| (e.key().clone(), e.fetched_at)).collect();
            by_age.sort_by_key(|(_, fetched_at)| *fetched_at);
            for (url, _) in by_age {
                if total_bytes <= max_bytes {
                    break;
                }
                if let Some((_, page)) = self.cache.remove(&url) {
                    total_bytes = total_bytes.saturating_sub(page.body_bytes.len() as u64);
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn robots_get(&self, host: &str) -> BackendResult<Option<RobotsPolicy>> {
        Ok(self.robots.get(host).map(|p| p.clone()))
    }

    async fn robots_put(&self, host: &str, policy: RobotsPolicy) -> BackendResult<()> {
        self.robots.insert(host.to_string(), policy);
        Ok(())
    }

    async fn page_put(&self, record: PageRecord) -> BackendResult<()> {
        self.pages.insert(record.url.clone(), record);
        Ok(())
    }

    async fn decision_append(&self, trace: DecisionTrace) -> BackendResult<()> {
        self.decisions.lock().expect("decisions mutex poisoned").push(trace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawl_backend::AlwaysEligible;
    use crawl_core::{Origin, RequestMeta};

    fn req(url: &str, host: &str, priority: i64, now: DateTime<Utc>) -> QueueEntry {
        let meta = RequestMeta::for_origin(Origin::Seed, 900_000);
        let mut request = crawl_core::Request::new(url.to_string(), host.to_string(), 0, meta, now);
        request = request.with_priority(priority);
        QueueEntry::new(request)
    }

    #[tokio::test]
    async fn picks_lowest_priority_number_first() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.queue_upsert(req("https://a.example/", "a.example", 50, now)).await.unwrap();
        store.queue_upsert(req("https://b.example/", "b.example", 10, now)).await.unwrap();

        let picked = store
            .queue_pick_next("w1", Duration::from_secs(60), now, &AlwaysEligible)
            .await
            .unwrap()
            .expect("one entry eligible");
        assert_eq!(picked.request.host, "b.example");
        assert_eq!(picked.status, QueueStatus::InProgress);
    }

    #[tokio::test]
    async fn reclaims_expired_leases() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let entry = req("https://a.example/", "a.example", 0, now);
        let id = entry.request.id.clone();
        store.queue_upsert(entry).await.unwrap();
        store
            .queue_pick_next("w1", Duration::from_secs(1), now, &AlwaysEligible)
            .await
            .unwrap();

        let later = now + chrono::Duration::seconds(5);
        let reclaimed = store.queue_reclaim_leases(later).await.unwrap();
        assert_eq!(reclaimed, 1);
        let entry = store.queue_lookup(&id).await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Queued);
        assert_eq!(entry.request.attempt, 1);
    }

    #[tokio::test]
    async fn settle_done_marks_recently_done() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let entry = req("https://a.example/", "a.example", 0, now);
        let id = entry.request.id.clone();
        store.queue_upsert(entry).await.unwrap();
        store.queue_settle(&id, QueueSettlement::Done, now).await.unwrap();

        assert!(store
            .queue_recently_done(&id, now, Duration::from_secs(3600))
            .await
            .unwrap());
    }
}
