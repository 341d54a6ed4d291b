//! Like `crawl_site`, but persists queue, cache, and robots state to a
//! SQLite file so a crash or Ctrl-C can be resumed by rerunning against the
//! same database path. Run with:
//! `cargo run --example crawl_site_durable -- ./crawl.sqlite3 https://example.com/`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};

use crawl::{Analyzer, CrawlOrchestrator, NoopAnalyzer};
use crawl_core::Config;
use crawl_http::ReqwestTransport;
use crawl_store_sqlite::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let Some(db_path) = args.next() else {
        bail!("usage: crawl_site_durable <db-path> <url> [url...]");
    };
    let start_urls: Vec<String> = args.collect();
    if start_urls.is_empty() {
        bail!("usage: crawl_site_durable <db-path> <url> [url...]");
    }

    let config = Config::builder()
        .start_urls(start_urls)
        .user_agent("crawl-demos/0.1 (+https://example.com/bot)")
        .max_depth(2)
        .worker_count(4)
        .build()?;

    let transport = Arc::new(ReqwestTransport::new(
        &config.user_agent,
        config.connect_timeout,
        config.read_timeout,
        config.max_body_bytes,
    )?);
    // Reopening the same path on a later run picks up queued and in-progress
    // work left by a prior crash; CrawlOrchestrator::start reclaims any
    // leftover leases before seeding start_urls again.
    let store = Arc::new(SqliteStore::open(&db_path)?);
    let analyzer: Arc<dyn Analyzer> = Arc::new(NoopAnalyzer);

    let orchestrator = CrawlOrchestrator::start(config, store, transport, analyzer).await?;
    orchestrator.run();

    tokio::select! {
        _ = orchestrator.join() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, draining");
        }
    }

    println!("visited {} pages, database at {db_path}", orchestrator.visited());

    orchestrator.shutdown().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    Ok(())
}
