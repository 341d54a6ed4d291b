//! Crawl scheduling and fetch-pipeline core (spec.md §4.4-§4.11).
//!
//! This crate is the part of the crawl that decides *what* gets fetched,
//! *when*, and *how results are recorded* — URL normalization (`crawl-url`),
//! robots enforcement (`crawl-robots`), rate limiting (`crawl-ratelimit`),
//! and the network transport (`crawl-http`) are pulled in as collaborators,
//! while everything specific to scheduling policy lives here.

pub mod analyzer;
pub mod cache;
pub mod hub_freshness;
pub mod link_extractor;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod telemetry;
pub mod worker;

pub use analyzer::{Analyzer, NoopAnalyzer};
pub use cache::CacheManager;
pub use orchestrator::{CrawlOrchestrator, OrchestratorError};
pub use pipeline::FetchPipeline;
pub use queue::{QueueManager, RejectReason};
pub use telemetry::{Milestone, TelemetrySink};
pub use worker::{SchedulerState, WorkerPool, WorkerPoolConfig};
