//! Cached response bodies and canonical fetch results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content-addressed identity of a response body.
///
/// Two `CachedPage`s with identical bodies share a `BodyRef`, matching
/// spec.md §3's "Content deduplicated by body hash."
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyRef(String);

impl BodyRef {
    /// Computes the content address of `body`.
    pub fn of(body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(body);
        BodyRef(hex::encode(hasher.finalize()))
    }

    /// Returns the hex-encoded sha256 digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A previously fetched response body plus the metadata needed for
/// conditional revalidation and TTL checks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedPage {
    /// Canonical URL this page was fetched from.
    pub url: String,
    /// When this entry was last (re)written — upgraded on a 304, not on reads.
    pub fetched_at: DateTime<Utc>,
    /// Original HTTP status of the response that produced this entry.
    pub http_status: u16,
    /// Response headers, lower-cased keys, first value per key.
    pub headers: BTreeMap<String, String>,
    /// Raw (decoded) response body.
    pub body_bytes: Vec<u8>,
    /// Declared content type, if any.
    pub content_type: Option<String>,
    /// `ETag` response header, if present, for conditional revalidation.
    pub etag: Option<String>,
    /// `Last-Modified` response header, if present.
    pub last_modified: Option<String>,
}

impl CachedPage {
    /// Content address of `body_bytes`, used for deduplicated storage.
    pub fn body_ref(&self) -> BodyRef {
        BodyRef::of(&self.body_bytes)
    }

    /// Age of this cache entry relative to `now`, in milliseconds.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.fetched_at).num_milliseconds().max(0)
    }
}

/// The canonical, persisted result of a fetch: what the rest of the system
/// (the out-of-scope HTML analyzer, in particular) reads back.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageRecord {
    /// Canonical URL of the page.
    pub url: String,
    /// When the page was fetched (or, for a fallback, when the cache entry
    /// it was served from was originally fetched).
    pub fetched_at: DateTime<Utc>,
    /// HTTP status of the response this record is derived from. Never
    /// fabricated — a cache fallback carries the original cached status.
    pub http_status: u16,
    /// Content address of the body (see [`BodyRef`]).
    pub body_ref: BodyRef,
    /// Declared content type, if any.
    pub content_type: Option<String>,
    /// Links discovered while parsing this page (already normalized).
    pub extracted_links: Vec<String>,
    /// Opaque reference to an analyzer result, if the analyzer populated one.
    pub analysis_ref: Option<String>,
    /// Set when this record was produced from a cache fallback after a
    /// network failure (spec.md §3 invariant: never fabricate an `http_status`).
    pub fallback_used: bool,
}
