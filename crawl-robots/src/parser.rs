//! A deliberately small robots.txt parser: `User-agent` groups, `Allow`,
//! `Disallow`, `Crawl-delay`, and `Sitemap`, with longest-prefix-wins
//! matching. No wildcard (`*`) or end-anchor (`$`) path patterns — the
//! overwhelming majority of news-site robots.txt files only use plain
//! prefixes, and this crate treats a parse that yields nothing usable as
//! allow-all rather than trying to out-guess a genuinely unusual file.

use crawl_core::RobotsRule;

pub(crate) fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

/// Whether `text` contains no directives at all (only blank lines/comments).
pub(crate) fn is_blank(text: &str) -> bool {
    text.lines().all(|line| strip_comment(line).trim().is_empty())
}

pub(crate) fn parse(text: &str) -> (Vec<RobotsRule>, Vec<String>) {
    let mut rules: Vec<RobotsRule> = Vec::new();
    let mut sitemaps = Vec::new();
    let mut current_agents: Vec<usize> = Vec::new();
    let mut directive_seen_since_ua = false;

    for raw_line in text.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().to_string();

        match key.as_str() {
            "user-agent" => {
                if directive_seen_since_ua {
                    current_agents.clear();
                    directive_seen_since_ua = false;
                }
                let lowered = value.to_ascii_lowercase();
                let idx = rules.iter().position(|r| r.user_agent == lowered).unwrap_or_else(|| {
                    rules.push(RobotsRule {
                        user_agent: lowered,
                        allow: Vec::new(),
                        disallow: Vec::new(),
                        crawl_delay_ms: None,
                    });
                    rules.len() - 1
                });
                current_agents.push(idx);
            }
            "disallow" => {
                directive_seen_since_ua = true;
                if !value.is_empty() {
                    for &idx in &current_agents {
                        rules[idx].disallow.push(value.clone());
                    }
                }
            }
            "allow" => {
                directive_seen_since_ua = true;
                if !value.is_empty() {
                    for &idx in &current_agents {
                        rules[idx].allow.push(value.clone());
                    }
                }
            }
            "crawl-delay" => {
                directive_seen_since_ua = true;
                if let Ok(secs) = value.parse::<f64>() {
                    let ms = (secs * 1000.0).round() as i64;
                    for &idx in &current_agents {
                        rules[idx].crawl_delay_ms = Some(ms);
                    }
                }
            }
            "sitemap" => {
                if !value.is_empty() {
                    sitemaps.push(value);
                }
            }
            _ => {}
        }
    }

    (rules, sitemaps)
}

/// Longest-prefix-wins verdict for `path` under `rule`. Ties between an
/// `Allow` and a `Disallow` of equal length favor `Allow`, matching the
/// de facto standard.
pub(crate) fn path_allowed(rule: &RobotsRule, path: &str) -> (bool, Option<i64>) {
    let mut best_len: i64 = -1;
    let mut allowed = true;
    for pattern in &rule.disallow {
        if path.starts_with(pattern.as_str()) && pattern.len() as i64 > best_len {
            best_len = pattern.len() as i64;
            allowed = false;
        }
    }
    for pattern in &rule.allow {
        if path.starts_with(pattern.as_str()) && pattern.len() as i64 >= best_len {
            best_len = pattern.len() as i64;
            allowed = true;
        }
    }
    (allowed, rule.crawl_delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_groups() {
        let text = "User-agent: *\nDisallow: /private\nAllow: /private/ok\nCrawl-delay: 2\nSitemap: https://example.com/sitemap.xml\n";
        let (rules, sitemaps) = parse(text);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].user_agent, "*");
        assert_eq!(rules[0].disallow, vec!["/private"]);
        assert_eq!(rules[0].allow, vec!["/private/ok"]);
        assert_eq!(rules[0].crawl_delay_ms, Some(2000));
        assert_eq!(sitemaps, vec!["https://example.com/sitemap.xml"]);
    }

    #[test]
    fn empty_disallow_is_allow_all() {
        let (rules, _) = parse("User-agent: *\nDisallow:\n");
        assert!(rules[0].disallow.is_empty());
        assert_eq!(path_allowed(&rules[0], "/anything"), (true, None));
    }

    #[test]
    fn longest_prefix_wins() {
        let (rules, _) = parse("User-agent: *\nDisallow: /a\nAllow: /a/b\n");
        assert_eq!(path_allowed(&rules[0], "/a/b/c"), (true, None));
        assert_eq!(path_allowed(&rules[0], "/a/x"), (false, None));
    }

    #[test]
    fn blank_file_detected() {
        assert!(is_blank("# just a comment\n\n"));
        assert!(!is_blank("User-agent: *\nDisallow: /\n"));
    }
}
