//! Per-host robots.txt policy, as parsed and cached by `crawl-robots`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One `User-agent:` group from a robots.txt file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RobotsRule {
    /// The `User-agent` this group applies to (`"*"` for the catch-all group).
    pub user_agent: String,
    /// `Allow:` path prefixes.
    pub allow: Vec<String>,
    /// `Disallow:` path prefixes.
    pub disallow: Vec<String>,
    /// `Crawl-delay:` in milliseconds, if specified for this group.
    pub crawl_delay_ms: Option<i64>,
}

/// Cached robots.txt policy for a single host.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RobotsPolicy {
    /// When this policy was fetched.
    pub fetched_at: DateTime<Utc>,
    /// When this policy should be refetched (§4.2: default TTL 24h).
    pub expires_at: DateTime<Utc>,
    /// Parsed `User-agent` groups, in file order.
    pub rules: Vec<RobotsRule>,
    /// `Sitemap:` URLs declared in the file.
    pub sitemaps: Vec<String>,
}

impl RobotsPolicy {
    /// An allow-all policy, used when robots.txt is missing, unreachable, or
    /// malformed (§4.2).
    pub fn allow_all(now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        RobotsPolicy {
            fetched_at: now,
            expires_at: now + ttl,
            rules: Vec::new(),
            sitemaps: Vec::new(),
        }
    }

    /// A deny-all policy, used under `RobotsFailurePolicy::Deny` when the
    /// robots.txt fetch itself fails (connection error, non-404 error
    /// status) rather than being merely absent (§4.2, §9 Open Questions).
    pub fn deny_all(now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        RobotsPolicy {
            fetched_at: now,
            expires_at: now + ttl,
            rules: vec![RobotsRule {
                user_agent: "*".to_string(),
                allow: Vec::new(),
                disallow: vec!["/".to_string()],
                crawl_delay_ms: None,
            }],
            sitemaps: Vec::new(),
        }
    }

    /// Whether this policy is past its TTL and should be refetched.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Selects the most specific matching group for `user_agent`.
    ///
    /// A group matches if its `user_agent` is a case-insensitive prefix of
    /// the crawler's user agent, or is the `*` catch-all. The longest
    /// matching (non-`*`) group wins; `*` is used only if nothing more
    /// specific matches.
    pub fn group_for<'a>(&'a self, user_agent: &str) -> Option<&'a RobotsRule> {
        let ua_lower = user_agent.to_ascii_lowercase();
        let mut best: Option<&RobotsRule> = None;
        let mut wildcard: Option<&RobotsRule> = None;
        for rule in &self.rules {
            if rule.user_agent == "*" {
                wildcard = Some(rule);
                continue;
            }
            let rule_ua = rule.user_agent.to_ascii_lowercase();
            if ua_lower.starts_with(&rule_ua) {
                best = match best {
                    Some(current) if current.user_agent.len() >= rule.user_agent.len() => Some(current),
                    _ => Some(rule),
                };
            }
        }
        best.or(wildcard)
    }
}
