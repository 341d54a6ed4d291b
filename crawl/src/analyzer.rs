//! Out-of-scope downstream analysis hook (spec.md §6.3).
//!
//! The crawl core renders no HTML semantics beyond link discovery: anything
//! an operator wants done with a fetched body — text extraction, entity
//! tagging, indexing — goes through this trait, invoked fire-and-forget so a
//! slow or failing analyzer never holds up the fetch pipeline.

use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;

/// Receives a fetched body for out-of-band processing.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Called once per successfully fetched (or cache-fallback) page. Errors
    /// are logged and discarded; they never affect the fetch outcome.
    async fn analyze(
        &self,
        url: &str,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), Box<dyn StdError + Send + Sync>>;
}

/// An [`Analyzer`] that does nothing, for deployments with no downstream
/// consumer configured.
pub struct NoopAnalyzer;

#[async_trait]
impl Analyzer for NoopAnalyzer {
    async fn analyze(&self, _url: &str, _body: &[u8], _content_type: Option<&str>) -> Result<(), Box<dyn StdError + Send + Sync>> {
        Ok(())
    }
}

/// Spawns `analyzer.analyze(..)` detached, logging but never propagating a
/// failure. `body` is cloned so the caller can move on without waiting on
/// the spawned task to finish reading it.
pub fn invoke_detached(analyzer: Arc<dyn Analyzer>, url: String, body: Vec<u8>, content_type: Option<String>) {
    tokio::spawn(async move {
        if let Err(error) = analyzer.analyze(&url, &body, content_type.as_deref()).await {
            tracing::warn!(url, %error, "analyzer failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAnalyzer(Arc<AtomicUsize>);

    #[async_trait]
    impl Analyzer for CountingAnalyzer {
        async fn analyze(&self, _url: &str, _body: &[u8], _content_type: Option<&str>) -> Result<(), Box<dyn StdError + Send + Sync>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn detached_invocation_runs_to_completion() {
        let count = Arc::new(AtomicUsize::new(0));
        let analyzer = Arc::new(CountingAnalyzer(count.clone()));
        invoke_detached(analyzer, "https://a.test/".to_string(), b"hi".to_vec(), None);
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
