//! A unit of scheduled crawl work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::RequestId;

/// Per-request fetch preference, stamped onto [`RequestMeta`] at enqueue time.
///
/// `CacheFirst` is the default for ordinary article pages: a fresh cache
/// entry short-circuits the network fetch entirely. `NetworkFirst` is
/// reserved for hub-like pages (§4.6) where freshness matters more than
/// avoiding a round trip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchPolicy {
    /// Prefer a cache hit within `max_cache_age_ms`; fall through to network on miss.
    CacheFirst,
    /// Always hit the network; only fall back to cache on failure, if configured.
    NetworkFirst,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        FetchPolicy::CacheFirst
    }
}

/// Where a [`Request`] came from.
///
/// Drives default priority (§4.8) and lets decision traces explain *why* a
/// URL entered the queue in the first place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// One of the crawl's configured start URLs.
    Seed,
    /// Discovered via an `<a href>`, `<link rel="canonical">`, or meta-refresh.
    Link,
    /// Discovered via a sitemap listed in a host's robots.txt.
    Sitemap,
    /// Produced by the hub guesser heuristic rather than seen as a link.
    HubGuess,
}

impl Origin {
    /// Default priority for a freshly-discovered request of this origin (§4.8).
    ///
    /// Lower values are dequeued first. Seeds come first, then sitemaps
    /// (index-like, worth discovering early), then hub guesses, then
    /// ordinary links.
    pub fn default_priority(self) -> i64 {
        match self {
            Origin::Seed => 0,
            Origin::Sitemap => 10,
            Origin::HubGuess => 20,
            Origin::Link => 100,
        }
    }
}

/// Well-known metadata carried alongside a [`Request`].
///
/// Corresponds exactly to spec.md §3's `meta` map, given a concrete shape
/// instead of an untyped map since every key is well-known.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestMeta {
    /// Whether to prefer cache or network for this request.
    pub fetch_policy: FetchPolicy,
    /// Maximum age, in milliseconds, a cached entry may have to count as a hit.
    pub max_cache_age_ms: i64,
    /// If the network fetch fails, may a stale/any cached copy be used instead?
    pub fallback_to_cache: bool,
    /// Was this URL identified as a hub (index/section) page?
    pub hub_like: bool,
    /// Where this request was discovered.
    pub origin: Origin,
}

impl RequestMeta {
    /// Metadata for an ordinary (non-hub) request discovered via `origin`.
    pub fn for_origin(origin: Origin, default_cache_age_ms: i64) -> Self {
        RequestMeta {
            fetch_policy: FetchPolicy::CacheFirst,
            max_cache_age_ms: default_cache_age_ms,
            fallback_to_cache: false,
            hub_like: false,
            origin,
        }
    }
}

/// A unit of scheduled crawl work: "fetch this URL".
///
/// Requests are created by seeding, link extraction, or the hub guesser
/// (§9 Open Questions, additive interpretation), flow through the queue as a
/// [`crate::QueueEntry`], and terminate once a fetch outcome is final.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    /// Stable identity derived from `url`.
    pub id: RequestId,
    /// Canonical absolute URL (already normalized).
    pub url: String,
    /// Registrable host, derived from `url`.
    pub host: String,
    /// Link depth from the nearest seed.
    pub depth: u32,
    /// Scheduling priority; lower values are dequeued first.
    pub priority: i64,
    /// Well-known request metadata.
    pub meta: RequestMeta,
    /// Retry counter, incremented on each requeue after a transient failure.
    pub attempt: u32,
    /// When this request was (first) enqueued.
    pub enqueued_at: DateTime<Utc>,
}

impl Request {
    /// Builds a `Request` for an already-normalized `url`.
    pub fn new(
        url: String,
        host: String,
        depth: u32,
        meta: RequestMeta,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        let id = RequestId::from_canonical_url(&url);
        let priority = meta.origin.default_priority();
        Request {
            id,
            url,
            host,
            depth,
            priority,
            meta,
            attempt: 0,
            enqueued_at,
        }
    }

    /// Builds a `Request` with an explicit priority override (e.g. meta-refresh
    /// children, which use `parent.priority + 10` rather than the origin default).
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}
