//! Entry point wiring every component together (spec.md §4.11).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;

use crawl_backend::{BackendError, HostGate, Store};
use crawl_core::{Config, DecisionFields, DecisionTrace, Origin, Request, RequestMeta};
use crawl_http::NetworkTransport;
use crawl_ratelimit::RateLimiter;
use crawl_robots::{RobotsManager, RobotsTransport};

use crate::analyzer::Analyzer;
use crate::cache::CacheManager;
use crate::link_extractor::LinkFilter;
use crate::pipeline::FetchPipeline;
use crate::queue::QueueManager;
use crate::telemetry::{Milestone, TelemetrySink};
use crate::worker::{SchedulerState, WorkerPool, WorkerPoolConfig};

/// Failure modes for [`CrawlOrchestrator::start`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The store failed during startup (lease restore or seeding).
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Wires the crawl core's components and drives the crawl to completion.
pub struct CrawlOrchestrator {
    pool: Arc<WorkerPool>,
    telemetry: TelemetrySink,
    run_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    background: Vec<JoinHandle<()>>,
    shutdown_grace: Duration,
}

impl CrawlOrchestrator {
    /// Validates nothing further (the caller's [`Config`] is already
    /// validated by [`crawl_core::ConfigBuilder::build`]), wires every
    /// component, restores any leftover in-progress leases to `queued`,
    /// seeds `config.start_urls`, and returns an orchestrator ready to
    /// [`CrawlOrchestrator::run`].
    pub async fn start<T>(config: Config, store: Arc<dyn Store>, transport: Arc<T>, analyzer: Arc<dyn Analyzer>) -> Result<Self, OrchestratorError>
    where
        T: NetworkTransport + RobotsTransport + 'static,
    {
        let network_transport: Arc<dyn NetworkTransport> = transport.clone();
        let robots_transport: Arc<dyn RobotsTransport> = transport;

        // Restore any in-progress leases left by a prior crash: force every
        // lease to appear expired by reclaiming against a far-future clock,
        // rather than adding a second Store primitive for an unconditional
        // sweep (the existing TTL-based reclaim already expresses this).
        store.queue_reclaim_leases(Utc::now() + chrono::Duration::days(3650)).await?;

        let telemetry = TelemetrySink::new(store.clone(), config.hub_freshness.persist_decision_traces, 1024);
        let robots = Arc::new(RobotsManager::new(
            store.clone(),
            robots_transport,
            config.user_agent.clone(),
            config.robots_ttl,
            config.robots_on_fetch_failure,
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.global_concurrency as u32,
            config.per_domain_concurrency as u32,
            config.base_domain_delay,
            Duration::from_secs(3600),
        ));
        let cache = CacheManager::new(store.clone(), config.cache.enabled, config.cache.ttl, config.cache.max_bytes);
        let queue = Arc::new(QueueManager::new(store.clone(), telemetry.clone(), config.max_queue_size, config.dedup_window, config.max_attempts));
        let filter = LinkFilter::new(config.stay_on_host, config.max_depth, &config.link_deny_patterns, config.hub_freshness.max_cache_age.as_millis() as i64);
        let pipeline = Arc::new(FetchPipeline::new(
            store.clone(),
            robots,
            rate_limiter.clone(),
            cache.clone(),
            queue.clone(),
            network_transport,
            telemetry.clone(),
            filter,
            config.hub_freshness.clone(),
            analyzer,
        ));

        for start_url in &config.start_urls {
            match crawl_url::normalize(start_url, None) {
                Ok(normalized) => {
                    let Some(host) = crawl_url::host_of(&normalized) else { continue };
                    let meta = RequestMeta::for_origin(Origin::Seed, config.cache.ttl.as_millis() as i64);
                    let request = Request::new(normalized, host, 0, meta, Utc::now());
                    if let Err(error) = queue.enqueue(request).await {
                        tracing::warn!(%error, url = start_url, "failed to seed start url");
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, url = start_url, "failed to normalize start url, skipping");
                }
            }
        }

        let gate: Arc<dyn HostGate> = rate_limiter;
        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            pipeline,
            gate,
            telemetry.clone(),
            WorkerPoolConfig {
                worker_count: config.worker_count,
                lease_duration: config.lease_duration,
                max_downloads: config.max_downloads,
                deadline: config.deadline,
            },
        ));

        let lease_reclaimer = spawn_lease_reclaimer(queue.clone());
        let cache_evictor = spawn_cache_evictor(cache);

        Ok(CrawlOrchestrator {
            pool,
            telemetry,
            run_handle: std::sync::Mutex::new(None),
            background: vec![lease_reclaimer, cache_evictor],
            shutdown_grace: config.shutdown_grace,
        })
    }

    /// Starts the worker pool in the background. Returns immediately;
    /// await [`Self::join`] to block until the crawl finishes.
    pub fn run(&self) {
        let pool = self.pool.clone();
        let mut handle = self.run_handle.lock().expect("run handle mutex poisoned");
        if handle.is_none() {
            *handle = Some(tokio::spawn(async move { pool.run().await }));
        }
    }

    /// Blocks until the worker pool reaches [`SchedulerState::Stopped`].
    pub async fn join(&self) {
        let handle = self.run_handle.lock().expect("run handle mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Stops dequeues; in-flight fetches complete normally.
    pub fn pause(&self) {
        self.pool.pause();
    }

    /// Resumes dequeues after [`Self::pause`].
    pub fn resume(&self) {
        self.pool.resume();
    }

    /// Current scheduler state.
    pub fn state(&self) -> SchedulerState {
        self.pool.state()
    }

    /// Count of fetches completed with a successful outcome.
    pub fn visited(&self) -> u64 {
        self.pool.visited()
    }

    /// Most recent in-memory milestones (see [`crate::telemetry::TelemetrySink`]).
    pub fn recent_milestones(&self) -> Vec<Milestone> {
        self.telemetry.recent_milestones()
    }

    /// Most recent in-memory decision traces.
    pub fn recent_decisions(&self) -> Vec<DecisionTrace> {
        self.telemetry.recent_decisions()
    }

    /// Requests a drain and waits up to `shutdown_grace` for in-flight work
    /// to finish before the pool is forced to a stop; then stops the
    /// background lease-reclaimer and cache-eviction tasks.
    pub async fn shutdown(self) {
        self.pool.abort();
        let grace = self.shutdown_grace;
        let _ = tokio::time::timeout(grace, self.join()).await;
        for task in self.background {
            task.abort();
        }
        self.telemetry.milestone("shutdown", DecisionFields::empty());
    }
}

fn spawn_lease_reclaimer(queue: Arc<QueueManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(30)).await;
            if let Err(error) = queue.reclaim_expired_leases().await {
                tracing::warn!(%error, "lease reclaim sweep failed");
            }
        }
    })
}

fn spawn_cache_evictor(cache: CacheManager) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            if let Err(error) = cache.evict_expired().await {
                tracing::warn!(%error, "cache eviction sweep failed");
            }
        }
    })
}
