//! Error type for `Store` operations.

use thiserror::Error;

/// Error type for [`crate::Store`] operations.
///
/// Mirrors `hitbox_backend::BackendError`'s split between operational
/// failures (connection/internal) and data failures (serialization) — a
/// crawl store has no compression/format layer of its own, so those two
/// teacher variants collapse into one `Serialization` variant here.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend's connection, transaction, or storage medium failed.
    #[error("store connection error: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The backend is internally inconsistent or hit a logic error.
    #[error("store internal error: {0}")]
    Internal(String),

    /// A stored value could not be encoded or decoded.
    #[error("store serialization error: {0}")]
    Serialization(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The caller asked to settle or reclaim an entry that isn't there.
    #[error("no such queue entry: {0}")]
    NotFound(String),
}

/// Result type for [`crate::Store`] operations.
pub type BackendResult<T> = Result<T, BackendError>;
