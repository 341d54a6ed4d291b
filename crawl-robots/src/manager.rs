//! Per-host robots enforcement with single-flight refresh.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};
use url::Url;

use crawl_backend::{BackendError, Store};
use crawl_core::{RobotsFailurePolicy, RobotsPolicy};

use crate::parser;
use crate::transport::RobotsTransport;

/// Failure modes for [`RobotsManager`] operations.
#[derive(Debug, Error)]
pub enum RobotsError {
    /// `url` had no parseable host.
    #[error("URL has no host: {0}")]
    NoHost(String),
    /// The backing store failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Enforces robots.txt per host, caching policies in the [`Store`] with a
/// TTL and ensuring at most one concurrent robots.txt fetch per host
/// (§4.2) — other callers for the same host await the in-flight fetch's
/// result instead of issuing their own.
pub struct RobotsManager {
    store: Arc<dyn Store>,
    transport: Arc<dyn RobotsTransport>,
    user_agent: String,
    ttl: Duration,
    failure_policy: RobotsFailurePolicy,
    in_flight: DashMap<String, (broadcast::Sender<Arc<RobotsPolicy>>, Arc<Semaphore>)>,
}

impl RobotsManager {
    /// Builds a manager backed by `store` for caching and `transport` for
    /// fetching, enforcing policy as `user_agent`.
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn RobotsTransport>,
        user_agent: String,
        ttl: Duration,
        failure_policy: RobotsFailurePolicy,
    ) -> Self {
        RobotsManager {
            store,
            transport,
            user_agent,
            ttl,
            failure_policy,
            in_flight: DashMap::new(),
        }
    }

    /// Whether `url` may be fetched, and the crawl delay its matching group
    /// (if any) requests, in milliseconds.
    pub async fn is_allowed(&self, url: &str, now: DateTime<Utc>) -> Result<(bool, Option<i64>), RobotsError> {
        let host = crawl_url::host_of(url).ok_or_else(|| RobotsError::NoHost(url.to_string()))?;
        let policy = self.policy_for(&host, now).await?;
        let path = path_and_query(url);
        Ok(match policy.group_for(&self.user_agent) {
            Some(rule) => parser::path_allowed(rule, &path),
            None => (true, None),
        })
    }

    /// `Sitemap:` URLs declared for `host`.
    pub async fn sitemaps_for(&self, host: &str, now: DateTime<Utc>) -> Result<Vec<String>, RobotsError> {
        Ok(self.policy_for(host, now).await?.sitemaps)
    }

    async fn policy_for(&self, host: &str, now: DateTime<Utc>) -> Result<RobotsPolicy, RobotsError> {
        if let Some(cached) = self.store.robots_get(host).await? {
            if !cached.is_expired(now) {
                return Ok(cached);
            }
        }
        self.refresh(host, now).await
    }

    async fn refresh(&self, host: &str, now: DateTime<Utc>) -> Result<RobotsPolicy, RobotsError> {
        enum Slot {
            Lead(tokio::sync::OwnedSemaphorePermit),
            Follow(broadcast::Receiver<Arc<RobotsPolicy>>),
        }

        let slot = match self.in_flight.entry(host.to_string()) {
            Entry::Occupied(entry) => {
                let (sender, semaphore) = entry.get();
                match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => Slot::Lead(permit),
                    Err(_) => Slot::Follow(sender.subscribe()),
                }
            }
            Entry::Vacant(entry) => {
                let (sender, _rx) = broadcast::channel(8);
                let semaphore = Arc::new(Semaphore::new(1));
                let permit = semaphore
                    .clone()
                    .try_acquire_owned()
                    .expect("freshly created semaphore always yields its first permit");
                entry.insert((sender, semaphore));
                Slot::Lead(permit)
            }
        };

        match slot {
            Slot::Follow(mut rx) => match rx.recv().await {
                Ok(policy) => Ok((*policy).clone()),
                Err(_) => Box::pin(self.refresh(host, now)).await,
            },
            Slot::Lead(_permit) => {
                let policy = self.fetch_and_build(host, now).await;
                if let Some((_, (sender, _))) = self.in_flight.remove(host) {
                    let _ = sender.send(Arc::new(policy.clone()));
                }
                self.store.robots_put(host, policy.clone()).await?;
                Ok(policy)
            }
        }
    }

    async fn fetch_and_build(&self, host: &str, now: DateTime<Utc>) -> RobotsPolicy {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        match self.transport.fetch_robots_txt(host).await {
            Ok((200, body)) => {
                let text = String::from_utf8_lossy(&body);
                let (rules, sitemaps) = parser::parse(&text);
                if rules.is_empty() && sitemaps.is_empty() && !parser::is_blank(&text) {
                    tracing::warn!(host, "malformed robots.txt, treating as allow-all");
                }
                RobotsPolicy {
                    fetched_at: now,
                    expires_at: now + ttl,
                    rules,
                    sitemaps,
                }
            }
            Ok((404, _)) | Ok((410, _)) => RobotsPolicy::allow_all(now, ttl),
            Ok((status, _)) => {
                tracing::warn!(host, status, "robots.txt fetch returned a non-success status");
                self.failure_policy(now, ttl)
            }
            Err(error) => {
                tracing::warn!(host, %error, "robots.txt fetch failed");
                self.failure_policy(now, ttl)
            }
        }
    }

    fn failure_policy(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> RobotsPolicy {
        match self.failure_policy {
            RobotsFailurePolicy::Allow => RobotsPolicy::allow_all(now, ttl),
            RobotsFailurePolicy::Deny => RobotsPolicy::deny_all(now, ttl),
        }
    }
}

fn path_and_query(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(q) => format!("{}?{q}", parsed.path()),
            None => parsed.path().to_string(),
        },
        Err(_) => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawl_core::RobotsFailurePolicy;
    use crawl_store_memory::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedTransport {
        status: u16,
        body: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RobotsTransport for FixedTransport {
        async fn fetch_robots_txt(&self, _host: &str) -> Result<(u16, Vec<u8>), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((self.status, self.body.as_bytes().to_vec()))
        }
    }

    fn manager(transport: Arc<FixedTransport>) -> RobotsManager {
        RobotsManager::new(
            Arc::new(InMemoryStore::new()),
            transport,
            "NewsCrawler/1.0".to_string(),
            Duration::from_secs(86_400),
            RobotsFailurePolicy::Allow,
        )
    }

    #[tokio::test]
    async fn disallowed_path_is_blocked() {
        let transport = Arc::new(FixedTransport {
            status: 200,
            body: "User-agent: *\nDisallow: /private\n",
            calls: AtomicUsize::new(0),
        });
        let mgr = manager(transport);
        let now = Utc::now();
        let (allowed, _) = mgr.is_allowed("https://example.com/private/x", now).await.unwrap();
        assert!(!allowed);
        let (allowed, _) = mgr.is_allowed("https://example.com/public", now).await.unwrap();
        assert!(allowed);
    }

    #[tokio::test]
    async fn not_found_is_allow_all() {
        let transport = Arc::new(FixedTransport {
            status: 404,
            body: "",
            calls: AtomicUsize::new(0),
        });
        let mgr = manager(transport);
        let (allowed, _) = mgr.is_allowed("https://example.com/anything", Utc::now()).await.unwrap();
        assert!(allowed);
    }

    #[tokio::test]
    async fn second_call_uses_cache_not_transport() {
        let transport = Arc::new(FixedTransport {
            status: 200,
            body: "User-agent: *\nDisallow: /x\n",
            calls: AtomicUsize::new(0),
        });
        let mgr = manager(transport.clone());
        let now = Utc::now();
        mgr.is_allowed("https://example.com/a", now).await.unwrap();
        mgr.is_allowed("https://example.com/b", now).await.unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
