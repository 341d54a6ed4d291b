//! Crawls one or more URLs given on the command line, using an in-memory
//! store. Run with: `cargo run --example crawl_site -- https://example.com/`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};

use crawl::{Analyzer, CrawlOrchestrator, NoopAnalyzer};
use crawl_core::Config;
use crawl_http::ReqwestTransport;
use crawl_store_memory::InMemoryStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let start_urls: Vec<String> = std::env::args().skip(1).collect();
    if start_urls.is_empty() {
        bail!("usage: crawl_site <url> [url...]");
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
    let store = Arc::new(InMemoryStore::new());
    let analyzer: Arc<dyn Analyzer> = Arc::new(NoopAnalyzer);

    let orchestrator = CrawlOrchestrator::start(config, store, transport, analyzer).await?;
    orchestrator.run();

    tokio::select! {
        _ = orchestrator.join() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, draining");
        }
    }

    for decision in orchestrator.recent_decisions() {
        println!("{:?} {:?} ({:?})", decision.kind, decision.url, decision.host);
    }
    println!("visited {} pages", orchestrator.visited());

    orchestrator.shutdown().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    Ok(())
}
