//! Fetch-policy stamping for hub-like URLs (spec.md §4.6).
//!
//! Pure: given a request's metadata and the hub-freshness configuration it
//! returns updated metadata and, optionally, the fields for a
//! `hub-freshness-decision` trace. No I/O, no clock reads beyond what the
//! caller already has.

use std::time::Duration;

use crawl_core::{DecisionFields, FetchPolicy, HubFreshnessConfig, RequestMeta};

/// Applies hub-freshness policy to `meta` in place if `meta.hub_like` and
/// the subsystem is enabled. Returns the decision-trace fields to emit, but
/// only when `config.persist_decision_traces` is set — per spec.md §4.6,
/// "only emit a hub-freshness-decision decision trace when configuration
/// enables persistDecisionTraces".
pub fn apply(meta: &mut RequestMeta, config: &HubFreshnessConfig) -> Option<DecisionFields> {
    if !config.enabled || !meta.hub_like {
        return None;
    }

    meta.fetch_policy = FetchPolicy::NetworkFirst;
    meta.max_cache_age_ms = duration_ms(config.max_cache_age);
    meta.fallback_to_cache = true;

    if !config.persist_decision_traces {
        return None;
    }
    Some(
        DecisionFields::empty()
            .with("fetchPolicy", "network-first")
            .with("maxCacheAgeMs", meta.max_cache_age_ms),
    )
}

fn duration_ms(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawl_core::Origin;

    fn hub_meta() -> RequestMeta {
        let mut meta = RequestMeta::for_origin(Origin::Link, 900_000);
        meta.hub_like = true;
        meta
    }

    #[test]
    fn stamps_network_first_for_hub_like() {
        let mut meta = hub_meta();
        let config = HubFreshnessConfig { enabled: true, max_cache_age: Duration::from_secs(60), persist_decision_traces: false };
        let trace = apply(&mut meta, &config);
        assert_eq!(meta.fetch_policy, FetchPolicy::NetworkFirst);
        assert_eq!(meta.max_cache_age_ms, 60_000);
        assert!(meta.fallback_to_cache);
        assert!(trace.is_none());
    }

    #[test]
    fn leaves_non_hub_requests_untouched() {
        let mut meta = RequestMeta::for_origin(Origin::Link, 900_000);
        let config = HubFreshnessConfig { enabled: true, max_cache_age: Duration::from_secs(60), persist_decision_traces: true };
        apply(&mut meta, &config);
        assert_eq!(meta.fetch_policy, FetchPolicy::CacheFirst);
    }

    #[test]
    fn emits_trace_only_when_configured() {
        let mut meta = hub_meta();
        let config = HubFreshnessConfig { enabled: true, max_cache_age: Duration::from_secs(60), persist_decision_traces: true };
        assert!(apply(&mut meta, &config).is_some());
    }

    #[test]
    fn disabled_subsystem_is_a_no_op() {
        let mut meta = hub_meta();
        let config = HubFreshnessConfig { enabled: false, max_cache_age: Duration::from_secs(60), persist_decision_traces: true };
        assert!(apply(&mut meta, &config).is_none());
        assert_eq!(meta.fetch_policy, FetchPolicy::CacheFirst);
    }
}
