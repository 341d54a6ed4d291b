//! In-process fakes shared across the crawl crate's integration tests.
//!
//! Grounded in `hitbox-test::mock_backend::MockBackend`'s shape: a
//! `DashMap`-backed fake with atomic call counters, substituted here for an
//! HTTP transport instead of a cache backend so scenario tests can script
//! exact responses without a real network.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crawl_http::{FetchRequest, NetworkError, NetworkResponse, NetworkTransport};
use crawl_robots::RobotsTransport;

enum Scripted {
    Response { status: u16, body: Vec<u8>, headers: BTreeMap<String, String> },
    Fail,
}

/// A scriptable [`NetworkTransport`] + [`RobotsTransport`] fake.
///
/// Each URL has its own FIFO queue of scripted outcomes; a `fetch` call
/// pops the front entry, or falls back to an empty `200` if nothing was
/// scripted. Every call is counted regardless of outcome.
#[derive(Default)]
pub struct FakeTransport {
    responses: DashMap<String, VecDeque<Scripted>>,
    robots: DashMap<String, (u16, Vec<u8>)>,
    fetch_counts: DashMap<String, AtomicUsize>,
}

impl FakeTransport {
    /// Builds an empty fake with no scripted responses.
    pub fn new() -> Self {
        FakeTransport::default()
    }

    /// Queues a successful response for `url`.
    pub fn set_response(&self, url: &str, status: u16, body: Vec<u8>, headers: BTreeMap<String, String>) {
        self.responses.entry(url.to_string()).or_default().push_back(Scripted::Response { status, body, headers });
    }

    /// Queues a connection failure for the next `fetch` to `url`.
    pub fn fail_next(&self, url: &str) {
        self.responses.entry(url.to_string()).or_default().push_back(Scripted::Fail);
    }

    /// Scripts the robots.txt response for `host`.
    pub fn set_robots(&self, host: &str, status: u16, body: Vec<u8>) {
        self.robots.insert(host.to_string(), (status, body));
    }

    /// How many times `fetch` was called for `url`.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetch_counts.get(url).map(|c| c.load(Ordering::SeqCst)).unwrap_or(0)
    }
}

#[async_trait]
impl NetworkTransport for FakeTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<NetworkResponse, NetworkError> {
        self.fetch_counts.entry(request.url.clone()).or_insert_with(|| AtomicUsize::new(0)).fetch_add(1, Ordering::SeqCst);

        let scripted = self.responses.get_mut(&request.url).and_then(|mut queue| queue.pop_front());
        match scripted {
            Some(Scripted::Fail) => Err(NetworkError::Connection("fake connection failure".to_string())),
            Some(Scripted::Response { status, body, headers }) => {
                let retry_after = headers.get("retry-after").and_then(|v| v.parse::<u64>().ok()).map(std::time::Duration::from_secs);
                Ok(NetworkResponse { status, headers, body, retry_after, final_url: request.url })
            }
            None => Ok(NetworkResponse {
                status: 200,
                headers: BTreeMap::new(),
                body: Vec::new(),
                retry_after: None,
                final_url: request.url,
            }),
        }
    }
}

#[async_trait]
impl RobotsTransport for FakeTransport {
    async fn fetch_robots_txt(&self, host: &str) -> Result<(u16, Vec<u8>), String> {
        match self.robots.get(host) {
            Some(entry) => Ok(entry.clone()),
            None => Ok((404, Vec::new())),
        }
    }
}

/// Convenience alias so test code can pass `Arc<FakeTransport>` wherever an
/// `Arc<dyn NetworkTransport>`/`Arc<dyn RobotsTransport>` is expected.
pub fn shared(transport: FakeTransport) -> Arc<FakeTransport> {
    Arc::new(transport)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_fetches_and_replays_scripted_response() {
        let transport = FakeTransport::new();
        transport.set_response("https://a.test/", 200, b"hi".to_vec(), BTreeMap::new());
        let response = transport.fetch(FetchRequest { url: "https://a.test/".to_string(), if_none_match: None, if_modified_since: None }).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.fetch_count("https://a.test/"), 1);
    }

    #[tokio::test]
    async fn fail_next_yields_connection_error() {
        let transport = FakeTransport::new();
        transport.fail_next("https://a.test/x");
        let result = transport.fetch(FetchRequest { url: "https://a.test/x".to_string(), if_none_match: None, if_modified_since: None }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unscripted_url_defaults_to_empty_200() {
        let transport = FakeTransport::new();
        let response = transport.fetch(FetchRequest { url: "https://a.test/y".to_string(), if_none_match: None, if_modified_since: None }).await.unwrap();
        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
    }
}
