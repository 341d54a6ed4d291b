//! Canonical URL form used as identity throughout the crawl (§4.1).
//!
//! Two different textual spellings of the same resource must normalize to
//! the same string, since [`crawl_core::RequestId`] is derived from it.

use thiserror::Error;
use url::Url;

/// Failure modes for [`normalize`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// The URL (or the resolved absolute form) could not be parsed.
    #[error("malformed URL: {0}")]
    Malformed(String),
    /// Scheme other than `http`/`https`.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    /// `raw` is relative and no `base` was supplied to resolve it against.
    #[error("relative URL with no base to resolve against")]
    NonAbsolute,
}

/// Normalizes `raw` (optionally resolved against `base`) to a canonical
/// absolute URL string.
///
/// Canonicalization performed, in order: resolve against `base` if relative,
/// reject non-`http(s)` schemes, strip the fragment, strip the port when it
/// matches the scheme's default (80/443), collapse duplicate path slashes,
/// drop recognized tracking query parameters, sort remaining query pairs by
/// key then value, and uppercase any percent-encoded escape sequences.
/// Scheme and host casing is handled by the underlying URL parser, which
/// lowercases both for `http`/`https`.
pub fn normalize(raw: &str, base: Option<&str>) -> Result<String, NormalizeError> {
    let parsed = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = base.ok_or(NormalizeError::NonAbsolute)?;
            let base = Url::parse(base).map_err(|e| NormalizeError::Malformed(e.to_string()))?;
            base.join(raw).map_err(|e| NormalizeError::Malformed(e.to_string()))?
        }
        Err(e) => return Err(NormalizeError::Malformed(e.to_string())),
    };

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(NormalizeError::UnsupportedScheme(parsed.scheme().to_string()));
    }

    let mut url = parsed;
    url.set_fragment(None);

    let default_port = match url.scheme() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    if url.port() == default_port {
        let _ = url.set_port(None);
    }

    let collapsed_path = collapse_slashes(url.path());
    url.set_path(&collapsed_path);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .into_owned()
        .filter(|(key, _)| !is_tracking_param(key))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }

    Ok(uppercase_percent_escapes(url.as_str()))
}

/// Extracts the host from an already-normalized (or arbitrary) URL string.
///
/// Returns `None` when the string doesn't parse as a URL with a host
/// (non-absolute, opaque, or malformed). The returned host is the full
/// hostname as served — this crate does not consult a public suffix list,
/// so "registrable host" here means "the hostname component", which is what
/// every other component (`DomainState`, per-domain politeness, stay-on-host
/// filtering) keys on.
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string))
}

fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_") || matches!(name, "fbclid" | "gclid" | "_ga")
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// `url::Url` already serializes with uppercase-hex percent escapes for
/// anything it encodes itself, but a caller can hand in an already-encoded
/// URL (e.g. `%2f` from a lowercase link) that the parser treats as opaque
/// and passes through unchanged. This pass guarantees the final form is
/// consistent either way.
fn uppercase_percent_escapes(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() && bytes[i + 1].is_ascii_hexdigit() && bytes[i + 2].is_ascii_hexdigit()
        {
            out.push('%');
            out.push(bytes[i + 1].to_ascii_uppercase() as char);
            out.push(bytes[i + 2].to_ascii_uppercase() as char);
            i += 3;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strips_default_port_and_fragment() {
        let got = normalize("HTTP://Example.com:80/a#section", None).unwrap();
        assert_eq!(got, "http://example.com/a");
    }

    #[test]
    fn keeps_non_default_port() {
        let got = normalize("https://example.com:8443/a", None).unwrap();
        assert_eq!(got, "https://example.com:8443/a");
    }

    #[test]
    fn drops_tracking_params_and_sorts_rest() {
        let got = normalize("https://example.com/a?utm_source=x&z=1&a=2&fbclid=y", None).unwrap();
        assert_eq!(got, "https://example.com/a?a=2&z=1");
    }

    #[test]
    fn collapses_duplicate_slashes() {
        let got = normalize("https://example.com/a//b///c", None).unwrap();
        assert_eq!(got, "https://example.com/a/b/c");
    }

    #[test]
    fn resolves_relative_against_base() {
        let got = normalize("/b", Some("https://example.com/a/")).unwrap();
        assert_eq!(got, "https://example.com/b");
    }

    #[test]
    fn rejects_relative_without_base() {
        let err = normalize("/b", None).unwrap_err();
        assert_eq!(err, NormalizeError::NonAbsolute);
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let err = normalize("ftp://example.com/a", None).unwrap_err();
        assert!(matches!(err, NormalizeError::UnsupportedScheme(_)));
    }

    #[test]
    fn uppercases_percent_escapes() {
        let got = normalize("https://example.com/a%2fb", None).unwrap();
        assert_eq!(got, "https://example.com/a%2Fb");
    }

    #[test]
    fn host_of_extracts_lowercased_host() {
        assert_eq!(host_of("https://Example.COM/a"), Some("example.com".to_string()));
        assert_eq!(host_of("not a url"), None);
    }

    proptest::proptest! {
        #[test]
        fn normalize_is_idempotent(path in "[a-zA-Z0-9/_-]{0,40}", q in "[a-z]{0,5}") {
            let raw = format!("https://example.com/{path}?{q}=1");
            if let Ok(once) = normalize(&raw, None) {
                let twice = normalize(&once, None).unwrap();
                prop_assert_eq!(once, twice);
            }
        }
    }
}
