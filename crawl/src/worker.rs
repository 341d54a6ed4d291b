//! Worker pool and scheduler state machine (spec.md §4.9).
//!
//! Workers are plain `tokio::spawn` tasks pulling from a shared
//! [`QueueManager`] handle, grounded in `hitbox`'s `OffloadManager`
//! spawn/track/cancel shape (`hitbox/src/offload/manager.rs`) but adapted to
//! long-running loops rather than one-shot background tasks: there is no
//! per-task `JoinHandle` map here, since all N workers share one lifecycle
//! rather than being individually spawned and forgotten.
//!
//! `Pausing` is folded into `Paused`: the loop checks the scheduler state
//! only at the top of each iteration, so a worker already mid-fetch always
//! runs it to completion before observing a pause, which is exactly what
//! spec.md's `Pausing` transient state exists to guarantee.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crawl_backend::HostGate;
use crawl_core::{DecisionFields, Outcome};

use crate::pipeline::FetchPipeline;
use crate::queue::QueueManager;
use crate::telemetry::TelemetrySink;

/// Scheduler lifecycle state (spec.md §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed but not yet started.
    Idle,
    /// Workers are dequeuing and fetching.
    Running,
    /// Dequeues are stopped; in-flight fetches run to completion.
    Paused,
    /// Exit criteria met or abort requested; all in-flight work is canceled.
    Draining,
    /// All worker tasks have returned.
    Stopped,
}

/// Configuration the pool needs beyond its collaborators.
pub struct WorkerPoolConfig {
    /// Number of concurrent worker tasks.
    pub worker_count: usize,
    /// Lease duration passed to each dequeue.
    pub lease_duration: Duration,
    /// Exit once this many fetches have completed with [`Outcome::Done`].
    pub max_downloads: Option<u64>,
    /// Wall-clock crawl deadline, measured from [`WorkerPool::run`].
    pub deadline: Option<Duration>,
}

/// Runs `N` worker loops against a shared queue (spec.md §4.9).
pub struct WorkerPool {
    queue: Arc<QueueManager>,
    pipeline: Arc<FetchPipeline>,
    gate: Arc<dyn HostGate>,
    telemetry: TelemetrySink,
    config: WorkerPoolConfig,
    state: Mutex<SchedulerState>,
    shutdown: Notify,
    pause_gate: Notify,
    visited: AtomicU64,
}

impl WorkerPool {
    /// Builds a pool in [`SchedulerState::Idle`].
    pub fn new(queue: Arc<QueueManager>, pipeline: Arc<FetchPipeline>, gate: Arc<dyn HostGate>, telemetry: TelemetrySink, config: WorkerPoolConfig) -> Self {
        WorkerPool {
            queue,
            pipeline,
            gate,
            telemetry,
            config,
            state: Mutex::new(SchedulerState::Idle),
            shutdown: Notify::new(),
            pause_gate: Notify::new(),
            visited: AtomicU64::new(0),
        }
    }

    /// Current scheduler state.
    pub fn state(&self) -> SchedulerState {
        *self.state.lock().expect("scheduler state mutex poisoned")
    }

    /// Count of fetches that completed with [`Outcome::Done`] so far.
    pub fn visited(&self) -> u64 {
        self.visited.load(Ordering::SeqCst)
    }

    /// Stops dequeues; fetches already in flight run to completion.
    pub fn pause(&self) {
        *self.state.lock().expect("scheduler state mutex poisoned") = SchedulerState::Paused;
    }

    /// Resumes dequeues after a [`Self::pause`].
    pub fn resume(&self) {
        *self.state.lock().expect("scheduler state mutex poisoned") = SchedulerState::Running;
        self.pause_gate.notify_waiters();
    }

    /// Requests an immediate drain: cancels all in-flight work and stops
    /// the pool once every worker has exited.
    pub fn abort(&self) {
        *self.state.lock().expect("scheduler state mutex poisoned") = SchedulerState::Draining;
        self.shutdown.notify_waiters();
    }

    /// Runs the pool to completion: spawns `worker_count` worker tasks plus
    /// an exit-criteria monitor, and returns once every worker has exited.
    pub async fn run(self: Arc<Self>) {
        *self.state.lock().expect("scheduler state mutex poisoned") = SchedulerState::Running;
        let started = Instant::now();

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.config.worker_count);
        for index in 0..self.config.worker_count {
            let pool = self.clone();
            handles.push(tokio::spawn(async move { pool.worker_loop(index).await }));
        }

        loop {
            if self.state() == SchedulerState::Draining {
                break;
            }
            if self.exit_criteria_met(started).await {
                self.telemetry.milestone("draining", DecisionFields::empty().with("visited", self.visited() as i64));
                self.abort();
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                _ = self.shutdown.notified() => break,
            }
        }

        for handle in handles {
            let _ = handle.await;
        }
        *self.state.lock().expect("scheduler state mutex poisoned") = SchedulerState::Stopped;
    }

    async fn exit_criteria_met(&self, started: Instant) -> bool {
        if let Some(max_downloads) = self.config.max_downloads {
            if self.visited() >= max_downloads {
                return true;
            }
        }
        if let Some(deadline) = self.config.deadline {
            if started.elapsed() >= deadline {
                return true;
            }
        }
        matches!(self.queue.active_len().await, Ok(0))
    }

    async fn worker_loop(&self, index: usize) {
        let worker_id = format!("worker-{index}");
        loop {
            match self.state() {
                SchedulerState::Draining | SchedulerState::Stopped => break,
                SchedulerState::Paused => {
                    tokio::select! {
                        _ = self.pause_gate.notified() => continue,
                        _ = self.shutdown.notified() => break,
                    }
                }
                SchedulerState::Idle | SchedulerState::Running => {}
            }

            match self.queue.dequeue(&worker_id, self.config.lease_duration, self.gate.as_ref()).await {
                Ok(Some(entry)) => {
                    let outcome = self.pipeline.run(&entry, &self.shutdown).await;
                    let done = matches!(outcome, Outcome::Done);
                    if let Err(error) = self.queue.settle(&entry, outcome).await {
                        tracing::warn!(%error, url = %entry.request.url, "failed to settle queue entry");
                    }
                    if done {
                        let visited = self.visited.fetch_add(1, Ordering::SeqCst) + 1;
                        if visited % 50 == 0 {
                            self.telemetry.milestone("progress", DecisionFields::empty().with("visited", visited as i64));
                        }
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                        _ = self.shutdown.notified() => break,
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, worker_id, "dequeue failed");
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawl_core::{HubFreshnessConfig, Origin, Request, RequestMeta};
    use crawl_ratelimit::RateLimiter;
    use crawl_robots::RobotsManager;
    use crawl_store_memory::InMemoryStore;
    use crawl_test::FakeTransport;
    use std::time::Duration as StdDuration;

    fn test_pool(store: Arc<InMemoryStore>, transport: Arc<FakeTransport>, max_downloads: Option<u64>) -> (Arc<WorkerPool>, Arc<QueueManager>) {
        let telemetry = TelemetrySink::new(store.clone(), false, 64);
        let robots = Arc::new(RobotsManager::new(store.clone(), transport.clone(), "bot/1.0".to_string(), StdDuration::from_secs(3600), Default::default()));
        let rate_limiter = Arc::new(RateLimiter::new(4, 1, StdDuration::from_millis(0), StdDuration::from_secs(60)));
        let cache = crate::cache::CacheManager::new(store.clone(), true, StdDuration::from_secs(3600), 1024 * 1024);
        let queue = Arc::new(QueueManager::new(store.clone(), telemetry.clone(), 1000, StdDuration::from_secs(3600), 3));
        let filter = crate::link_extractor::LinkFilter::new(false, 10, &[], 900_000);
        let pipeline = Arc::new(FetchPipeline::new(
            store,
            robots,
            rate_limiter.clone(),
            cache,
            queue.clone(),
            transport,
            telemetry.clone(),
            filter,
            HubFreshnessConfig::default(),
            Arc::new(crate::analyzer::NoopAnalyzer),
        ));
        let gate: Arc<dyn HostGate> = rate_limiter;
        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            pipeline,
            gate,
            telemetry,
            WorkerPoolConfig { worker_count: 2, lease_duration: StdDuration::from_secs(300), max_downloads, deadline: None },
        ));
        (pool, queue)
    }

    #[tokio::test]
    async fn stops_after_max_downloads_reached() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(FakeTransport::new());
        let (pool, queue) = test_pool(store, transport, Some(1));

        let meta = RequestMeta::for_origin(Origin::Seed, 900_000);
        let request = Request::new("https://a.test/".to_string(), "a.test".to_string(), 0, meta, chrono::Utc::now());
        queue.enqueue(request).await.unwrap().unwrap();

        tokio::time::timeout(StdDuration::from_secs(5), pool.clone().run()).await.unwrap();
        assert_eq!(pool.state(), SchedulerState::Stopped);
        assert_eq!(pool.visited(), 1);
    }

    #[tokio::test]
    async fn stops_when_queue_drains_with_no_seed() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(FakeTransport::new());
        let (pool, _queue) = test_pool(store, transport, None);

        tokio::time::timeout(StdDuration::from_secs(5), pool.clone().run()).await.unwrap();
        assert_eq!(pool.state(), SchedulerState::Stopped);
        assert_eq!(pool.visited(), 0);
    }
}
