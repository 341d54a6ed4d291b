//! Link discovery and enqueueing (spec.md §4.8).
//!
//! Parsing never fails: `scraper`'s HTML5 parser tolerates malformed markup
//! the same way a browser does, so a page with broken tags still yields
//! whatever links it can find rather than aborting the fetch.

use chrono::Utc;
use regex::Regex;
use scraper::{Html, Selector};

use crawl_core::{DecisionFields, DecisionKind, HubFreshnessConfig, Origin, Request, RequestMeta};

use crate::hub_freshness;
use crate::queue::QueueManager;
use crate::telemetry::TelemetrySink;

/// Hub-like URL path segments, per spec.md §4.8's "known hub segments like
/// `/news`, `/world`" example.
const HUB_SEGMENTS: &[&str] = &[
    "news", "world", "politics", "sports", "business", "tech", "technology", "opinion",
    "section", "sections", "us", "local", "topics", "video",
];

/// Whether `url`'s path looks like a section/index page rather than an
/// article: the root path, or up to two segments where at least one is a
/// recognized hub segment.
pub fn looks_like_hub(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else { return false };
    let segments: Vec<String> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).map(|seg| seg.to_ascii_lowercase()).collect())
        .unwrap_or_default();
    if segments.is_empty() {
        return true;
    }
    if segments.len() > 2 {
        return false;
    }
    segments.iter().any(|seg| HUB_SEGMENTS.contains(&seg.as_str()))
}

/// Compiled filter configuration for [`extract_and_enqueue`].
pub struct LinkFilter {
    stay_on_host: bool,
    max_depth: u32,
    deny: Vec<Regex>,
    default_cache_age_ms: i64,
}

impl LinkFilter {
    /// Compiles `patterns` as anchored-nowhere substring regexes. A pattern
    /// that fails to compile is skipped with a warning rather than failing
    /// the whole crawl over one bad regex.
    pub fn new(stay_on_host: bool, max_depth: u32, patterns: &[String], default_cache_age_ms: i64) -> Self {
        let deny = patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(error) => {
                    tracing::warn!(pattern, %error, "invalid link deny pattern, ignoring");
                    None
                }
            })
            .collect();
        LinkFilter { stay_on_host, max_depth, deny, default_cache_age_ms }
    }

    fn passes(&self, source_host: &str, candidate_host: &str, candidate_url: &str, depth: u32) -> bool {
        if self.stay_on_host && candidate_host != source_host {
            return false;
        }
        if depth > self.max_depth {
            return false;
        }
        !self.deny.iter().any(|re| re.is_match(candidate_url))
    }
}

static ANCHOR_SELECTOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));
static CANONICAL_SELECTOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("link[rel=canonical]").expect("static selector"));
static META_SELECTOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("meta[http-equiv]").expect("static selector"));

/// Raw, unfiltered `href` candidates found in `html`, resolved against
/// `base_url` but not yet normalized: plain anchors, the canonical link, and
/// a meta-refresh target if present.
fn raw_hrefs(base_url: &str, html: &[u8]) -> (Vec<String>, Option<String>) {
    let text = String::from_utf8_lossy(html);
    let document = Html::parse_document(&text);

    let mut hrefs = Vec::new();
    for element in document.select(&ANCHOR_SELECTOR) {
        if let Some(href) = element.value().attr("href") {
            hrefs.push(href.to_string());
        }
    }
    for element in document.select(&CANONICAL_SELECTOR) {
        if let Some(href) = element.value().attr("href") {
            hrefs.push(href.to_string());
        }
    }

    let mut refresh_target = None;
    for element in document.select(&META_SELECTOR) {
        let is_refresh = element
            .value()
            .attr("http-equiv")
            .map(|v| v.eq_ignore_ascii_case("refresh"))
            .unwrap_or(false);
        if !is_refresh {
            continue;
        }
        if let Some(content) = element.value().attr("content") {
            if let Some(target) = parse_meta_refresh(content) {
                refresh_target = Some(target);
            }
        }
    }

    let _ = base_url;
    (hrefs, refresh_target)
}

/// Parses a `<meta http-equiv="refresh" content="5; url=...">` value.
fn parse_meta_refresh(content: &str) -> Option<String> {
    let (_, rest) = content.split_once(';')?;
    let rest = rest.trim();
    let rest = rest.strip_prefix("url=").or_else(|| rest.strip_prefix("URL="))?;
    let trimmed = rest.trim().trim_matches('\'').trim_matches('"');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses `html`, resolves and normalizes every discovered link, filters
/// and enqueues survivors (spec.md §4.8), and returns the full set of
/// already-normalized links discovered — including ones filtered out of
/// enqueueing — for [`crawl_core::PageRecord::extracted_links`].
pub async fn extract_and_enqueue(
    source: &Request,
    html: &[u8],
    filter: &LinkFilter,
    hub_config: &HubFreshnessConfig,
    queue: &QueueManager,
    telemetry: &TelemetrySink,
) -> Vec<String> {
    let (hrefs, refresh_target) = raw_hrefs(&source.url, html);
    let depth = source.depth + 1;

    let mut discovered = Vec::new();
    for href in hrefs {
        let Ok(normalized) = crawl_url::normalize(&href, Some(&source.url)) else { continue };
        discovered.push(normalized.clone());
        enqueue_one(source, &normalized, depth, Origin::Link, None, filter, hub_config, queue, telemetry).await;
    }

    if let Some(refresh_href) = refresh_target {
        if let Ok(normalized) = crawl_url::normalize(&refresh_href, Some(&source.url)) {
            discovered.push(normalized.clone());
            let priority = source.priority + 10;
            enqueue_one(source, &normalized, depth, Origin::Link, Some(priority), filter, hub_config, queue, telemetry).await;
        }
    }

    discovered.sort();
    discovered.dedup();
    discovered
}

#[allow(clippy::too_many_arguments)]
async fn enqueue_one(
    source: &Request,
    normalized_url: &str,
    depth: u32,
    origin: Origin,
    priority_override: Option<i64>,
    filter: &LinkFilter,
    hub_config: &HubFreshnessConfig,
    queue: &QueueManager,
    telemetry: &TelemetrySink,
) {
    let Some(host) = crawl_url::host_of(normalized_url) else { return };
    if !filter.passes(&source.host, &host, normalized_url, depth) {
        telemetry.decision(
            DecisionKind::PolicySkip,
            Some(normalized_url.to_string()),
            Some(host),
            DecisionFields::empty().with("reason", "link-filter"),
        );
        return;
    }

    let hub_like = looks_like_hub(normalized_url);
    let mut meta = RequestMeta::for_origin(origin, filter.default_cache_age_ms);
    meta.hub_like = hub_like;
    if let Some(fields) = hub_freshness::apply(&mut meta, hub_config) {
        telemetry.decision(
            DecisionKind::HubFreshnessDecision,
            Some(normalized_url.to_string()),
            Some(host.clone()),
            fields,
        );
    }

    let mut request = Request::new(normalized_url.to_string(), host, depth, meta, Utc::now());
    request.priority = priority_override.unwrap_or_else(|| if hub_like { 20 } else { origin.default_priority() });

    if let Err(error) = queue.enqueue(request).await {
        tracing::warn!(%error, url = normalized_url, "failed to enqueue discovered link");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_path_is_a_hub() {
        assert!(looks_like_hub("https://a.test/"));
    }

    #[test]
    fn news_section_is_a_hub() {
        assert!(looks_like_hub("https://a.test/news"));
        assert!(looks_like_hub("https://a.test/world/africa"));
    }

    #[test]
    fn deep_article_path_is_not_a_hub() {
        assert!(!looks_like_hub("https://a.test/2026/08/01/some-long-article-slug"));
    }

    #[test]
    fn meta_refresh_parses_url() {
        assert_eq!(parse_meta_refresh("5; url=/next"), Some("/next".to_string()));
        assert_eq!(parse_meta_refresh("0;URL='https://a.test/x'"), Some("https://a.test/x".to_string()));
        assert_eq!(parse_meta_refresh("5"), None);
    }

    #[test]
    fn finds_anchors_and_canonical() {
        let html = br#"<html><body>
            <a href="/b">b</a>
            <link rel="canonical" href="https://a.test/canon">
        </body></html>"#;
        let (hrefs, refresh) = raw_hrefs("https://a.test/", html);
        assert!(hrefs.contains(&"/b".to_string()));
        assert!(hrefs.contains(&"https://a.test/canon".to_string()));
        assert!(refresh.is_none());
    }
}
