//! End-to-end scenarios against a deterministic fake transport and an
//! in-memory store, one test per named scenario.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use tokio::sync::Notify;

use crawl::link_extractor::LinkFilter;
use crawl::{CacheManager, FetchPipeline, QueueManager, TelemetrySink};
use crawl_backend::{AlwaysEligible, Store};
use crawl_core::{
    CachedPage, DecisionKind, FetchPolicy, HubFreshnessConfig, Origin, QueueEntry, Request,
    RequestMeta,
};
use crawl_ratelimit::RateLimiter;
use crawl_robots::RobotsManager;
use crawl_store_memory::InMemoryStore;
use crawl_test::FakeTransport;
use crawl_core::Outcome;

struct Harness {
    store: Arc<InMemoryStore>,
    transport: Arc<FakeTransport>,
    telemetry: TelemetrySink,
    queue: Arc<QueueManager>,
    pipeline: FetchPipeline,
}

fn build(stay_on_host: bool, base_delay: StdDuration) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let transport = Arc::new(FakeTransport::new());
    let telemetry = TelemetrySink::new(store.clone(), false, 256);
    let robots = Arc::new(RobotsManager::new(
        store.clone(),
        transport.clone(),
        "scenario-bot/1.0".to_string(),
        StdDuration::from_secs(3600),
        Default::default(),
    ));
    let rate_limiter = Arc::new(RateLimiter::new(8, 1, base_delay, StdDuration::from_secs(60)));
    let cache = CacheManager::new(store.clone(), true, StdDuration::from_secs(3600), 64 * 1024 * 1024);
    let queue = Arc::new(QueueManager::new(store.clone(), telemetry.clone(), 1000, StdDuration::from_secs(3600), 3));
    let filter = LinkFilter::new(stay_on_host, 10, &[], 900_000);
    let pipeline = FetchPipeline::new(
        store.clone(),
        robots,
        rate_limiter,
        cache,
        queue.clone(),
        transport.clone(),
        telemetry.clone(),
        filter,
        HubFreshnessConfig::default(),
        Arc::new(crawl::NoopAnalyzer),
    );
    Harness { store, transport, telemetry, queue, pipeline }
}

fn seed_request(url: &str, host: &str) -> Request {
    let meta = RequestMeta::for_origin(Origin::Seed, 900_000);
    Request::new(url.to_string(), host.to_string(), 0, meta, chrono::Utc::now())
}

// Scenario 1: seed with 1 link, stay-on-host.
#[tokio::test]
async fn seed_with_one_link_stays_on_host() {
    let h = build(true, StdDuration::from_millis(0));
    h.transport.set_response(
        "https://a.test/",
        200,
        b"<html><body><a href=\"/b\">b</a></body></html>".to_vec(),
        BTreeMap::new(),
    );
    h.transport.set_response("https://a.test/b", 200, b"<html><body>b</body></html>".to_vec(), BTreeMap::new());

    h.queue.enqueue(seed_request("https://a.test/", "a.test")).await.unwrap().unwrap();
    let lease = StdDuration::from_secs(300);
    let seed = h.queue.dequeue("w1", lease, &AlwaysEligible).await.unwrap().unwrap();

    let outcome = h.pipeline.run(&seed, &Notify::new()).await;
    assert!(matches!(outcome, Outcome::Done));
    h.queue.settle(&seed, outcome).await.unwrap();

    let next = h
        .queue
        .dequeue("w1", lease, &AlwaysEligible)
        .await
        .unwrap()
        .expect("discovered link should have been enqueued");
    assert_eq!(next.request.url, "https://a.test/b");
    assert_eq!(next.request.depth, 1);

    let outcome = h.pipeline.run(&next, &Notify::new()).await;
    assert!(matches!(outcome, Outcome::Done));
    h.queue.settle(&next, outcome).await.unwrap();

    assert_eq!(h.store.pages().len(), 2);
    let cache_misses = h.telemetry.recent_decisions().into_iter().filter(|d| d.kind == DecisionKind::CacheMiss).count();
    assert_eq!(cache_misses, 2);
}

// Scenario 2: hub freshness bypass.
#[tokio::test]
async fn hub_freshness_bypasses_fresh_cache() {
    let h = build(false, StdDuration::from_millis(0));
    h.store
        .cache_put(CachedPage {
            url: "https://a.test/news".to_string(),
            fetched_at: chrono::Utc::now(),
            http_status: 200,
            headers: BTreeMap::new(),
            body_bytes: b"stale-looking-but-fresh".to_vec(),
            content_type: None,
            etag: None,
            last_modified: None,
        })
        .await
        .unwrap();
    h.transport.set_response("https://a.test/news", 200, b"<html></html>".to_vec(), BTreeMap::new());

    let mut meta = RequestMeta::for_origin(Origin::HubGuess, 900_000);
    meta.hub_like = true;
    meta.fetch_policy = FetchPolicy::NetworkFirst;
    meta.fallback_to_cache = true;
    let request = Request::new("https://a.test/news".to_string(), "a.test".to_string(), 0, meta, chrono::Utc::now());
    let entry = QueueEntry::new(request);

    let outcome = h.pipeline.run(&entry, &Notify::new()).await;
    assert!(matches!(outcome, Outcome::Done));
    assert_eq!(h.transport.fetch_count("https://a.test/news"), 1);

    let overrides = h.telemetry.recent_decisions().into_iter().filter(|d| d.kind == DecisionKind::NetworkFirstOverride).count();
    assert_eq!(overrides, 1);
}

// Scenario 5: rate limit honored — consecutive fetches to the same host are
// spaced by at least baseDomainDelay. Uses a short delay to keep the test
// fast; the invariant under test doesn't depend on the delay's magnitude.
#[tokio::test]
async fn rate_limit_spaces_fetches_to_same_host() {
    let base_delay = StdDuration::from_millis(150);
    let h = build(false, base_delay);
    for path in ["/1", "/2", "/3"] {
        h.transport.set_response(&format!("https://a.test{path}"), 200, Vec::new(), BTreeMap::new());
    }

    let mut starts = Vec::new();
    for path in ["/1", "/2", "/3"] {
        starts.push(Instant::now());
        let entry = QueueEntry::new(seed_request(&format!("https://a.test{path}"), "a.test"));
        let outcome = h.pipeline.run(&entry, &Notify::new()).await;
        assert!(matches!(outcome, Outcome::Done));
    }

    let gap_1 = starts[1].duration_since(starts[0]);
    let gap_2 = starts[2].duration_since(starts[1]);
    let tolerance = StdDuration::from_millis(20);
    assert!(gap_1 + tolerance >= base_delay, "expected >= {base_delay:?} between fetch 1 and 2, got {gap_1:?}");
    assert!(gap_2 + tolerance >= base_delay, "expected >= {base_delay:?} between fetch 2 and 3, got {gap_2:?}");
}

// Scenario 6: retry then success.
#[tokio::test]
async fn retry_then_success_records_one_retry_and_one_page() {
    let h = build(false, StdDuration::from_millis(0));
    let mut retry_headers = BTreeMap::new();
    retry_headers.insert("retry-after".to_string(), "0".to_string());
    h.transport.set_response("https://a.test/x", 503, Vec::new(), retry_headers);
    h.transport.set_response("https://a.test/x", 200, b"<html>ok</html>".to_vec(), BTreeMap::new());

    let lease = StdDuration::from_secs(300);
    h.queue.enqueue(seed_request("https://a.test/x", "a.test")).await.unwrap().unwrap();
    let entry = h.queue.dequeue("w1", lease, &AlwaysEligible).await.unwrap().unwrap();

    let first = h.pipeline.run(&entry, &Notify::new()).await;
    assert!(matches!(first, Outcome::Retry { .. }));
    h.queue.settle(&entry, first).await.unwrap();

    let retried = h.queue.dequeue("w1", lease, &AlwaysEligible).await.unwrap().expect("retry should be requeued");
    assert_eq!(retried.request.attempt, 1);

    let second = h.pipeline.run(&retried, &Notify::new()).await;
    assert!(matches!(second, Outcome::Done));
    h.queue.settle(&retried, second).await.unwrap();

    assert_eq!(h.store.pages().len(), 1);
    assert_eq!(h.transport.fetch_count("https://a.test/x"), 2);
    let retries = h.telemetry.recent_decisions().into_iter().filter(|d| d.kind == DecisionKind::Retry).count();
    assert_eq!(retries, 1);
}
