//! Domain types shared by every crate in the crawl scheduling core.
//!
//! This crate has no I/O of its own — it is the protocol-agnostic vocabulary
//! ([`Request`], [`QueueEntry`], [`CachedPage`], [`PageRecord`],
//! [`RobotsPolicy`], [`DomainState`], [`DecisionTrace`]) that the normalizer,
//! robots manager, rate limiter, queue, cache, and fetch pipeline all speak.

mod config;
mod decision;
mod domain;
mod error;
mod id;
mod page;
mod queue_entry;
mod request;
mod robots;

pub use config::{CacheConfig, Config, ConfigBuilder, HubFreshnessConfig, RobotsFailurePolicy};
pub use decision::{DecisionFields, DecisionKind, DecisionTrace};
pub use domain::DomainState;
pub use error::{CrawlError, Outcome};
pub use id::RequestId;
pub use page::{CachedPage, PageRecord};
pub use queue_entry::{QueueEntry, QueueStatus};
pub use request::{FetchPolicy, Origin, Request, RequestMeta};
pub use robots::{RobotsPolicy, RobotsRule};
