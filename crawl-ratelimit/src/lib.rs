//! Global concurrency and per-domain politeness (spec.md §4.3).
//!
//! Two independent layers, as specified: a global token bucket sized to
//! `globalConcurrency`, and a per-domain gate enforcing a minimum delay
//! between fetches to the same host plus a per-domain in-flight cap. The
//! per-domain fairness queue (lowest priority first, FIFO tie-break) is
//! grounded in the same shape as `hitbox`'s
//! `BroadcastConcurrencyManager` — a `DashMap` keyed by identity (host,
//! rather than a `CacheKey`) guarding per-key coordination state — though
//! the mechanism differs: robots fetches dedupe identical in-flight work via
//! broadcast, while politeness here orders distinct waiters by priority via
//! a small binary heap.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crawl_backend::HostGate;
use crawl_core::DomainState;

/// Failure modes for [`RateLimiter::acquire`].
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The caller's cancellation signal fired before a slot was granted.
    #[error("rate limit wait canceled")]
    Canceled,
}

struct DomainInner {
    state: DomainState,
    pending: BinaryHeap<Reverse<WaitKey>>,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct WaitKey {
    priority: i64,
    enqueued_at: DateTime<Utc>,
    seq: u64,
}

struct DomainSlot {
    inner: Mutex<DomainInner>,
    notify: Notify,
}

impl DomainSlot {
    fn fresh(now: DateTime<Utc>) -> Self {
        DomainSlot {
            inner: Mutex::new(DomainInner {
                state: DomainState::fresh(now),
                pending: BinaryHeap::new(),
            }),
            notify: Notify::new(),
        }
    }
}

/// A held rate-limit slot. Dropping it releases both the global token and
/// the per-domain in-flight count and wakes the next waiter for that host.
pub struct RateLimitPermit {
    limiter: Arc<RateLimiterInner>,
    host: String,
    _global: OwnedSemaphorePermit,
}

impl Drop for RateLimitPermit {
    fn drop(&mut self) {
        if let Some(slot) = self.limiter.domains.get(&self.host) {
            let mut inner = slot.inner.lock().expect("domain mutex poisoned");
            inner.state.in_flight_count = inner.state.in_flight_count.saturating_sub(1);
            drop(inner);
            slot.notify.notify_waiters();
        }
    }
}

struct RateLimiterInner {
    global: Arc<Semaphore>,
    per_domain_concurrency: u32,
    base_delay: StdDuration,
    max_backoff: StdDuration,
    domains: DashMap<String, Arc<DomainSlot>>,
    seq: AtomicU64,
}

/// Enforces `globalConcurrency` and per-domain politeness.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

impl RateLimiter {
    /// Builds a limiter admitting `global_concurrency` fetches at once
    /// overall, and `per_domain_concurrency` at once per host, with `
    /// base_delay` as the minimum politeness gap and `max_backoff` as the
    /// ceiling for consecutive-error backoff.
    pub fn new(
        global_concurrency: u32,
        per_domain_concurrency: u32,
        base_delay: StdDuration,
        max_backoff: StdDuration,
    ) -> Self {
        RateLimiter {
            inner: Arc::new(RateLimiterInner {
                global: Arc::new(Semaphore::new(global_concurrency.max(1) as usize)),
                per_domain_concurrency: per_domain_concurrency.max(1),
                base_delay,
                max_backoff,
                domains: DashMap::new(),
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// Waits for a global token and a per-domain slot for `host`, honoring
    /// the priority/FIFO fairness order among waiters for the same host.
    /// Cancels with [`RateLimitError::Canceled`] if `shutdown` fires first.
    pub async fn acquire(
        &self,
        host: &str,
        priority: i64,
        enqueued_at: DateTime<Utc>,
        shutdown: &Notify,
    ) -> Result<RateLimitPermit, RateLimitError> {
        let slot = self
            .inner
            .domains
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(DomainSlot::fresh(Utc::now())))
            .clone();

        let key = WaitKey {
            priority,
            enqueued_at,
            seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
        };
        {
            let mut inner = slot.inner.lock().expect("domain mutex poisoned");
            inner.pending.push(Reverse(key));
        }

        loop {
            let now = Utc::now();
            let claimed = {
                let mut inner = slot.inner.lock().expect("domain mutex poisoned");
                let is_next = inner.pending.peek().map(|Reverse(k)| *k == key).unwrap_or(false);
                let has_capacity = inner.state.in_flight_count < self.inner.per_domain_concurrency;
                let is_due = now >= inner.state.next_allowed_at;
                if is_next && has_capacity && is_due {
                    inner.pending.pop();
                    inner.state.in_flight_count += 1;
                    true
                } else {
                    false
                }
            };

            if claimed {
                break;
            }

            let wait_for = {
                let inner = slot.inner.lock().expect("domain mutex poisoned");
                (inner.state.next_allowed_at - now)
                    .to_std()
                    .unwrap_or(StdDuration::from_millis(20))
                    .max(StdDuration::from_millis(20))
            };

            tokio::select! {
                _ = slot.notify.notified() => {}
                _ = tokio::time::sleep(wait_for) => {}
                _ = shutdown.notified() => {
                    let mut inner = slot.inner.lock().expect("domain mutex poisoned");
                    inner.pending.retain(|Reverse(k)| *k != key);
                    return Err(RateLimitError::Canceled);
                }
            }
        }

        let global = tokio::select! {
            permit = self.inner.global.clone().acquire_owned() => {
                permit.expect("global semaphore is never closed")
            }
            _ = shutdown.notified() => {
                let mut inner = slot.inner.lock().expect("domain mutex poisoned");
                inner.state.in_flight_count = inner.state.in_flight_count.saturating_sub(1);
                drop(inner);
                slot.notify.notify_waiters();
                return Err(RateLimitError::Canceled);
            }
        };

        Ok(RateLimitPermit {
            limiter: self.inner.clone(),
            host: host.to_string(),
            _global: global,
        })
    }

    /// Records the outcome of a completed fetch to `host`, updating its
    /// next-eligible time (§4.3): `max(baseDelay, crawlDelay)` on success,
    /// exponential backoff capped at `max_backoff` on failure.
    pub fn record_outcome(&self, host: &str, now: DateTime<Utc>, success: bool, crawl_delay: Option<StdDuration>) {
        let slot = self
            .inner
            .domains
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(DomainSlot::fresh(now)))
            .clone();
        let mut inner = slot.inner.lock().expect("domain mutex poisoned");

        let crawl_delay = crawl_delay.unwrap_or(StdDuration::ZERO);
        let delay = if success {
            inner.state.consecutive_errors = 0;
            self.inner.base_delay.max(crawl_delay)
        } else {
            inner.state.consecutive_errors = inner.state.consecutive_errors.saturating_add(1);
            let exp = inner.state.consecutive_errors.min(6);
            let backoff = self.inner.base_delay.saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX));
            backoff.min(self.inner.max_backoff).max(crawl_delay)
        };

        inner.state.last_fetch_at = Some(now);
        inner.state.next_allowed_at = now + Duration::from_std(delay).unwrap_or_else(|_| Duration::zero());
        drop(inner);
        slot.notify.notify_waiters();
    }
}

impl HostGate for RateLimiter {
    fn is_host_eligible(&self, host: &str) -> bool {
        match self.inner.domains.get(host) {
            Some(slot) => {
                let inner = slot.inner.lock().expect("domain mutex poisoned");
                inner.state.in_flight_count < self.inner.per_domain_concurrency
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grants_lower_priority_first() {
        let limiter = RateLimiter::new(4, 1, StdDuration::from_millis(0), StdDuration::from_secs(60));
        let shutdown = Notify::new();
        let now = Utc::now();

        let held = limiter.acquire("a.example", 50, now, &shutdown).await.unwrap();

        let limiter2 = limiter.clone();
        let waiter_low = tokio::spawn(async move {
            let shutdown = Notify::new();
            limiter2.acquire("a.example", 0, Utc::now(), &shutdown).await
        });
        let limiter3 = limiter.clone();
        let waiter_high = tokio::spawn(async move {
            let shutdown = Notify::new();
            limiter3.acquire("a.example", 100, Utc::now(), &shutdown).await
        });

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        drop(held);

        let first = tokio::time::timeout(StdDuration::from_secs(1), waiter_low).await.unwrap().unwrap();
        assert!(first.is_ok());
        waiter_high.abort();
    }

    #[tokio::test]
    async fn backoff_grows_with_consecutive_errors() {
        let limiter = RateLimiter::new(4, 1, StdDuration::from_millis(100), StdDuration::from_secs(60));
        let now = Utc::now();
        limiter.record_outcome("a.example", now, false, None);
        limiter.record_outcome("a.example", now, false, None);
        let slot = limiter.inner.domains.get("a.example").unwrap().clone();
        let next = slot.inner.lock().unwrap().state.next_allowed_at;
        assert!(next > now + Duration::milliseconds(300));
    }

    #[tokio::test]
    async fn success_resets_errors() {
        let limiter = RateLimiter::new(4, 1, StdDuration::from_millis(50), StdDuration::from_secs(60));
        let now = Utc::now();
        limiter.record_outcome("a.example", now, false, None);
        limiter.record_outcome("a.example", now, true, None);
        let slot = limiter.inner.domains.get("a.example").unwrap().clone();
        assert_eq!(slot.inner.lock().unwrap().state.consecutive_errors, 0);
    }
}
