//! The seam between robots enforcement and the HTTP layer.
//!
//! `crawl-robots` never depends on `crawl-http` directly — grounded in how
//! the teacher repo keeps `hitbox-reqwest` as an interchangeable transport
//! behind `hitbox_backend::Backend` rather than a hard dependency of the
//! core crate.

use async_trait::async_trait;

/// Fetches `robots.txt` for a host. Implemented by `crawl-http`'s transport
/// in production, and by an in-memory fake in tests.
#[async_trait]
pub trait RobotsTransport: Send + Sync {
    /// Fetches `http://{host}/robots.txt`, falling back to `https` is the
    /// caller's concern, not this trait's — implementations decide their own
    /// scheme policy. Returns `(status, body)` for any HTTP response
    /// received; `Err` is reserved for transport-level failures (DNS,
    /// connect, timeout) that never produced a status at all.
    async fn fetch_robots_txt(&self, host: &str) -> Result<(u16, Vec<u8>), String>;
}
