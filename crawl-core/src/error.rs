//! The crawl-wide error taxonomy (spec.md §7) and queue settlement outcomes.

use thiserror::Error;

/// Semantic error kinds produced anywhere in the fetch pipeline.
///
/// This is a taxonomy of *kinds*, not a single flat error type — each
/// component (`crawl-url`, `crawl-robots`, `crawl-http`, `crawl-backend`)
/// defines its own `thiserror` enum for its failure modes and the worker
/// classifies those into one of these kinds to decide the queue outcome
/// (spec.md §7: "the worker is the sole policy authority for converting an
/// error into a queue outcome").
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The URL itself is invalid and can never be retried.
    #[error("malformed url: {0}")]
    Malformed(String),

    /// Robots.txt or a link filter forbade this URL.
    #[error("policy denied: {0}")]
    PolicyDenied(String),

    /// A network timeout, DNS failure, 5xx, 429, or 408 — retryable.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A non-retryable 4xx other than 408/429.
    #[error("terminal http status {status}: {message}")]
    Terminal4xx {
        /// The HTTP status code.
        status: u16,
        /// Human-readable detail.
        message: String,
    },

    /// Response body exceeded the configured cap.
    #[error("body too large: {size} bytes (cap {cap})")]
    BodyTooLarge {
        /// The size actually observed before the cap stopped the read.
        size: u64,
        /// The configured cap.
        cap: u64,
    },

    /// The orchestrator canceled this unit of work.
    #[error("canceled")]
    Canceled,

    /// A bug surfaced as a caught panic or invariant violation; never
    /// propagated past the worker boundary.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CrawlError {
    /// Whether a worker should requeue this error for another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CrawlError::Transient(_))
    }
}

/// The result of settling a dequeued [`crate::QueueEntry`] (spec.md §4.4).
///
/// Produced by the worker after running the fetch pipeline and consumed by
/// `QueueManager::settle` to decide the entry's next status.
#[derive(Debug)]
pub enum Outcome {
    /// The fetch succeeded (including cache hits and cache fallbacks).
    Done,
    /// A transient error occurred; retry after `not_before` if `attempt` stays
    /// under the configured cap, otherwise this becomes [`Outcome::GiveUp`].
    Retry {
        /// Error detail, retained as `QueueEntry.last_error`.
        reason: String,
        /// Earliest time the retry may be dequeued.
        not_before: chrono::DateTime<chrono::Utc>,
    },
    /// Retries are exhausted or the error is non-retryable; terminal `Error`.
    GiveUp {
        /// Error detail, retained as `QueueEntry.last_error`.
        reason: String,
    },
    /// The request was dropped without a (further) fetch attempt; terminal `Skipped`.
    Skip {
        /// Human-readable reason, mirrored into a decision trace.
        reason: String,
    },
    /// The orchestrator canceled this unit of work mid-flight; returns to
    /// `Queued` with its attempt count unchanged (spec.md §5 Cancellation).
    Canceled,
}
