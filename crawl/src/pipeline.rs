//! The per-request fetch sequence (spec.md §4.7).
//!
//! A straight-line async function with early returns rather than a typed
//! state-machine enum: every step here is concrete (there is exactly one
//! network transport, one cache, one robots manager), so the states
//! `hitbox`'s FSM needs to stay generic over pluggable middleware collapse
//! to a single function with one outcome type.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::Notify;

use crawl_backend::Store;
use crawl_core::{CachedPage, DecisionFields, DecisionKind, FetchPolicy, Outcome, QueueEntry, Request};
use crawl_http::{FetchRequest, NetworkError, NetworkTransport};
use crawl_ratelimit::{RateLimitError, RateLimiter};
use crawl_robots::RobotsManager;

use crate::analyzer::Analyzer;
use crate::cache::CacheManager;
use crate::link_extractor::{self, LinkFilter};
use crate::queue::{default_not_before, QueueManager};
use crate::telemetry::TelemetrySink;

/// Wires together every collaborator the fetch sequence needs.
pub struct FetchPipeline {
    store: Arc<dyn Store>,
    robots: Arc<RobotsManager>,
    rate_limiter: Arc<RateLimiter>,
    cache: CacheManager,
    queue: Arc<QueueManager>,
    transport: Arc<dyn NetworkTransport>,
    telemetry: TelemetrySink,
    link_filter: LinkFilter,
    hub_config: crawl_core::HubFreshnessConfig,
    analyzer: Arc<dyn Analyzer>,
}

#[allow(clippy::too_many_arguments)]
impl FetchPipeline {
    /// Builds a pipeline from its collaborators.
    pub fn new(
        store: Arc<dyn Store>,
        robots: Arc<RobotsManager>,
        rate_limiter: Arc<RateLimiter>,
        cache: CacheManager,
        queue: Arc<QueueManager>,
        transport: Arc<dyn NetworkTransport>,
        telemetry: TelemetrySink,
        link_filter: LinkFilter,
        hub_config: crawl_core::HubFreshnessConfig,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        FetchPipeline { store, robots, rate_limiter, cache, queue, transport, telemetry, link_filter, hub_config, analyzer }
    }

    /// Runs the full fetch sequence for `entry`, returning the [`Outcome`]
    /// the worker should settle it with.
    #[tracing::instrument(skip(self, entry, shutdown), fields(url = %entry.request.url))]
    pub async fn run(&self, entry: &QueueEntry, shutdown: &Notify) -> Outcome {
        let request = &entry.request;

        // 1. Validate URL.
        let normalized = match crawl_url::normalize(&request.url, None) {
            Ok(url) => url,
            Err(error) => {
                self.telemetry.decision(
                    DecisionKind::PolicySkip,
                    Some(request.url.clone()),
                    Some(request.host.clone()),
                    DecisionFields::empty().with("reason", error.to_string()),
                );
                return Outcome::Skip { reason: format!("malformed url: {error}") };
            }
        };

        // 2. Robots check.
        let crawl_delay_ms = match self.robots.is_allowed(&normalized, Utc::now()).await {
            Ok((true, crawl_delay_ms)) => crawl_delay_ms,
            Ok((false, _)) => {
                self.telemetry.decision(
                    DecisionKind::RobotsDeny,
                    Some(normalized.clone()),
                    Some(request.host.clone()),
                    DecisionFields::empty(),
                );
                return Outcome::Skip { reason: "robots-deny".to_string() };
            }
            Err(error) => {
                return Outcome::Retry {
                    reason: format!("robots check failed: {error}"),
                    not_before: default_not_before(Utc::now(), request.attempt),
                };
            }
        };
        let crawl_delay = crawl_delay_ms.map(|ms| StdDuration::from_millis(ms.max(0) as u64));

        // 3. Acquire rate tokens.
        let permit = match self.rate_limiter.acquire(&request.host, request.priority, request.enqueued_at, shutdown).await {
            Ok(permit) => permit,
            Err(RateLimitError::Canceled) => return Outcome::Canceled,
        };

        // Any older cached entry, used both for conditional-request headers
        // and as the fallback body on a network failure.
        let existing = self.cache.get_any(&normalized).await.ok().flatten();

        // 4. Cache check.
        if request.meta.fetch_policy == FetchPolicy::CacheFirst {
            match self.cache.get(&normalized, request.meta.max_cache_age_ms).await {
                Ok(Some(page)) => {
                    self.telemetry.decision(
                        DecisionKind::CacheHit,
                        Some(normalized.clone()),
                        Some(request.host.clone()),
                        DecisionFields::empty().with("cachedAt", page.fetched_at.to_rfc3339()).with("ageMs", page.age_ms(Utc::now())),
                    );
                    let outcome = self.finish_with_page(request, &normalized, page, false).await;
                    self.rate_limiter.record_outcome(&request.host, Utc::now(), true, crawl_delay);
                    drop(permit);
                    return outcome;
                }
                Ok(None) => {
                    self.telemetry.decision(
                        DecisionKind::CacheMiss,
                        Some(normalized.clone()),
                        Some(request.host.clone()),
                        DecisionFields::empty(),
                    );
                }
                Err(error) => {
                    tracing::warn!(%error, url = %normalized, "cache lookup failed, falling through to network");
                }
            }
        } else {
            self.telemetry.decision(
                DecisionKind::NetworkFirstOverride,
                Some(normalized.clone()),
                Some(request.host.clone()),
                DecisionFields::empty(),
            );
        }

        // 5. Network fetch.
        let fetch_request = FetchRequest {
            url: normalized.clone(),
            if_none_match: existing.as_ref().and_then(|p| p.etag.clone()),
            if_modified_since: existing.as_ref().and_then(|p| p.last_modified.clone()),
        };

        let outcome = tokio::select! {
            result = self.transport.fetch(fetch_request) => {
                self.handle_response(request, &normalized, result, existing, crawl_delay).await
            }
            _ = shutdown.notified() => Outcome::Canceled,
        };

        drop(permit);
        outcome
    }

    async fn handle_response(
        &self,
        request: &Request,
        normalized: &str,
        result: Result<crawl_http::NetworkResponse, NetworkError>,
        existing: Option<CachedPage>,
        crawl_delay: Option<StdDuration>,
    ) -> Outcome {
        let now = Utc::now();
        match result {
            Ok(response) if response.status == 304 => {
                let page = match existing {
                    Some(mut page) => {
                        page.fetched_at = now;
                        page
                    }
                    None => CachedPage {
                        url: normalized.to_string(),
                        fetched_at: now,
                        http_status: 200,
                        headers: response.headers,
                        body_bytes: Vec::new(),
                        content_type: None,
                        etag: None,
                        last_modified: None,
                    },
                };
                if let Err(error) = self.cache.put(page.clone()).await {
                    tracing::warn!(%error, url = normalized, "failed to refresh cache entry after 304");
                }
                let outcome = self.finish_with_page(request, normalized, page, false).await;
                self.rate_limiter.record_outcome(&request.host, now, true, crawl_delay);
                outcome
            }
            Ok(response) if (200..300).contains(&response.status) => {
                let etag = response.headers.get("etag").cloned();
                let last_modified = response.headers.get("last-modified").cloned();
                let content_type = response.headers.get("content-type").cloned();
                let page = CachedPage {
                    url: normalized.to_string(),
                    fetched_at: now,
                    http_status: response.status,
                    headers: response.headers,
                    body_bytes: response.body,
                    content_type,
                    etag,
                    last_modified,
                };
                if let Err(error) = self.cache.put(page.clone()).await {
                    tracing::warn!(%error, url = normalized, "failed to write cache entry");
                }
                let outcome = self.finish_with_page(request, normalized, page, false).await;
                self.rate_limiter.record_outcome(&request.host, now, true, crawl_delay);
                outcome
            }
            Ok(response) if response.status == 429 || response.status == 503 => {
                let not_before = response.retry_after.map(|d| now + chrono::Duration::from_std(d).unwrap_or_default())
                    .unwrap_or_else(|| default_not_before(now, request.attempt));
                self.telemetry.decision(
                    DecisionKind::Retry,
                    Some(normalized.to_string()),
                    Some(request.host.clone()),
                    DecisionFields::empty().with("status", response.status as i64),
                );
                self.rate_limiter.record_outcome(&request.host, now, false, crawl_delay);
                Outcome::Retry { reason: format!("http {}", response.status), not_before }
            }
            Ok(response) if response.status == 408 || (500..600).contains(&response.status) => {
                self.rate_limiter.record_outcome(&request.host, now, false, crawl_delay);
                Outcome::Retry {
                    reason: format!("http {}", response.status),
                    not_before: default_not_before(now, request.attempt),
                }
            }
            Ok(response) => {
                self.rate_limiter.record_outcome(&request.host, now, false, crawl_delay);
                Outcome::GiveUp { reason: format!("terminal http status {}", response.status) }
            }
            Err(NetworkError::BodyTooLarge { cap }) => {
                self.telemetry.decision(
                    DecisionKind::GiveUp,
                    Some(normalized.to_string()),
                    Some(request.host.clone()),
                    DecisionFields::empty().with("reason", "body-too-large").with("cap", cap as i64),
                );
                self.rate_limiter.record_outcome(&request.host, now, false, crawl_delay);
                Outcome::GiveUp { reason: format!("response body exceeded {cap} bytes") }
            }
            Err(error) => {
                self.rate_limiter.record_outcome(&request.host, now, false, crawl_delay);
                if request.meta.fallback_to_cache {
                    if let Some(page) = existing {
                        self.telemetry.decision(
                            DecisionKind::FallbackToCache,
                            Some(normalized.to_string()),
                            Some(request.host.clone()),
                            DecisionFields::empty().with("networkError", error.to_string()),
                        );
                        return self.finish_with_page(request, normalized, page, true).await;
                    }
                }
                Outcome::Retry { reason: error.to_string(), not_before: default_not_before(now, request.attempt) }
            }
        }
    }

    /// Steps 6-8: parse, extract/enqueue links, persist the page, invoke the
    /// analyzer. Always yields [`Outcome::Done`] — reaching this point means
    /// the fetch (or cache hit/fallback) itself already succeeded.
    async fn finish_with_page(&self, request: &Request, normalized: &str, page: CachedPage, fallback_used: bool) -> Outcome {
        let links = link_extractor::extract_and_enqueue(
            request,
            &page.body_bytes,
            &self.link_filter,
            &self.hub_config,
            &self.queue,
            &self.telemetry,
        )
        .await;

        let record = crawl_core::PageRecord {
            url: normalized.to_string(),
            fetched_at: page.fetched_at,
            http_status: page.http_status,
            body_ref: page.body_ref(),
            content_type: page.content_type.clone(),
            extracted_links: links,
            analysis_ref: None,
            fallback_used,
        };

        if let Err(error) = self.store.page_put(record).await {
            tracing::warn!(%error, url = normalized, "failed to persist page record");
        }

        crate::analyzer::invoke_detached(self.analyzer.clone(), normalized.to_string(), page.body_bytes, page.content_type);

        Outcome::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawl_core::{Config, Origin, RequestMeta};
    use crawl_store_memory::InMemoryStore;
    use crawl_test::FakeTransport;
    use std::collections::BTreeMap;

    fn test_config() -> Config {
        Config::builder()
            .start_url("https://a.test/")
            .user_agent("test-bot/1.0")
            .build()
            .unwrap()
    }

    fn build_pipeline(store: Arc<InMemoryStore>, transport: Arc<FakeTransport>, config: &Config) -> FetchPipeline {
        let telemetry = TelemetrySink::new(store.clone(), false, 64);
        let robots = Arc::new(RobotsManager::new(
            store.clone(),
            transport.clone(),
            config.user_agent.clone(),
            config.robots_ttl,
            config.robots_on_fetch_failure,
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.global_concurrency as u32,
            config.per_domain_concurrency as u32,
            config.base_domain_delay,
            StdDuration::from_secs(60),
        ));
        let cache = CacheManager::new(store.clone(), config.cache.enabled, config.cache.ttl, config.cache.max_bytes);
        let queue = Arc::new(QueueManager::new(store.clone(), telemetry.clone(), config.max_queue_size, config.dedup_window, config.max_attempts));
        let filter = LinkFilter::new(config.stay_on_host, config.max_depth, &config.link_deny_patterns, config.hub_freshness.max_cache_age.as_millis() as i64);
        FetchPipeline::new(
            store,
            robots,
            rate_limiter,
            cache,
            queue,
            transport,
            telemetry,
            filter,
            config.hub_freshness.clone(),
            Arc::new(crate::analyzer::NoopAnalyzer),
        )
    }

    fn seed_entry(url: &str) -> QueueEntry {
        let meta = RequestMeta::for_origin(Origin::Seed, 900_000);
        QueueEntry::new(Request::new(url.to_string(), "a.test".to_string(), 0, meta, Utc::now()))
    }

    #[tokio::test]
    async fn cache_miss_then_network_success_persists_page() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(FakeTransport::new());
        transport.set_response("https://a.test/", 200, b"<html><body><a href=\"/b\">b</a></body></html>".to_vec(), BTreeMap::new());
        let config = test_config();
        let pipeline = build_pipeline(store.clone(), transport, &config);

        let entry = seed_entry("https://a.test/");
        let outcome = pipeline.run(&entry, &Notify::new()).await;
        assert!(matches!(outcome, Outcome::Done));
    }

    #[tokio::test]
    async fn robots_deny_skips_without_network_fetch() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(FakeTransport::new());
        transport.set_robots("a.test", 200, b"User-agent: *\nDisallow: /private\n".to_vec());
        let config = test_config();
        let pipeline = build_pipeline(store.clone(), transport.clone(), &config);

        let entry = seed_entry("https://a.test/private/x");
        let outcome = pipeline.run(&entry, &Notify::new()).await;
        assert!(matches!(outcome, Outcome::Skip { .. }));
        assert_eq!(transport.fetch_count("https://a.test/private/x"), 0);
    }

    #[tokio::test]
    async fn network_failure_falls_back_to_cache() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(FakeTransport::new());
        transport.fail_next("https://a.test/x");
        let config = test_config();
        let pipeline = build_pipeline(store.clone(), transport, &config);

        let mut meta = RequestMeta::for_origin(Origin::Link, 900_000);
        meta.fallback_to_cache = true;
        let request = Request::new("https://a.test/x".to_string(), "a.test".to_string(), 1, meta, Utc::now());
        store
            .cache_put(CachedPage {
                url: "https://a.test/x".to_string(),
                fetched_at: Utc::now() - chrono::Duration::hours(1),
                http_status: 200,
                headers: BTreeMap::new(),
                body_bytes: b"cached".to_vec(),
                content_type: None,
                etag: None,
                last_modified: None,
            })
            .await
            .unwrap();

        let entry = QueueEntry::new(request);
        let outcome = pipeline.run(&entry, &Notify::new()).await;
        assert!(matches!(outcome, Outcome::Done));
    }
}
