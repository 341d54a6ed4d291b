//! Structured, optionally-persisted records of why a URL took the path it did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The kind of decision a [`DecisionTrace`] records (spec.md §3, §5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionKind {
    /// Dropped by a link filter (deny-pattern, off-host, depth) before enqueue.
    PolicySkip,
    /// Robots.txt disallowed the URL.
    RobotsDeny,
    /// A fresh cache entry satisfied the request.
    CacheHit,
    /// No usable cache entry was found.
    CacheMiss,
    /// `network-first` policy bypassed an otherwise-fresh cache entry.
    NetworkFirstOverride,
    /// A network failure was masked by serving a cached body.
    FallbackToCache,
    /// The hub freshness controller stamped hub-specific fetch policy.
    HubFreshnessDecision,
    /// A worker suspended waiting on rate tokens.
    RateLimitWait,
    /// A transient failure triggered a requeue.
    Retry,
    /// Retries were exhausted; the request is now terminal.
    GiveUp,
    /// The queue dropped a low-priority entry because it was full.
    QueueOverflow,
}

/// Kind-specific structured payload for a [`DecisionTrace`].
///
/// A thin wrapper over a JSON object so each `DecisionKind` can carry its own
/// fields (`cachedAt`/`ageMs` for `CacheHit`, `networkError` for
/// `FallbackToCache`, etc.) without a matching Rust enum variant per kind.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DecisionFields(pub Map<String, Value>);

impl DecisionFields {
    /// An empty field set.
    pub fn empty() -> Self {
        DecisionFields(Map::new())
    }

    /// Builder-style single-field insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }
}

/// A structured record of why the pipeline chose a particular action for a URL.
///
/// Always available in-process for inspection; persisted to the [`Store`]
/// only when `Config.hub_freshness.persist_decision_traces` (or the
/// equivalent per-kind setting) is enabled, per spec.md §4.10.
///
/// [`Store`]: crate placeholder, see `crawl_backend::Store`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecisionTrace {
    /// When the decision was made.
    pub ts: DateTime<Utc>,
    /// What kind of decision this is.
    pub kind: DecisionKind,
    /// The URL this decision concerns, if any.
    pub url: Option<String>,
    /// The host this decision concerns, if any.
    pub host: Option<String>,
    /// Kind-specific structured payload.
    pub fields: DecisionFields,
}

impl DecisionTrace {
    /// Builds a trace for `kind` concerning `url`/`host`, stamped with `ts`.
    pub fn new(
        ts: DateTime<Utc>,
        kind: DecisionKind,
        url: Option<String>,
        host: Option<String>,
        fields: DecisionFields,
    ) -> Self {
        DecisionTrace { ts, kind, url, host, fields }
    }
}
