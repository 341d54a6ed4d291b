//! The network transport used by the fetch pipeline (§4.7) and, through
//! [`RobotsTransport`], the robots manager (§4.2).
//!
//! Grounded in `hitbox-reqwest`'s role as the interchangeable upstream
//! behind a trait seam — here `NetworkTransport` and `RobotsTransport` take
//! the place of `hitbox_core::Upstream`, and `ReqwestTransport` takes the
//! place of `ReqwestUpstream`, minus the tower/reqwest-middleware chain
//! wrapping: the fetch pipeline calls this transport directly rather than
//! through a `tower::Service` stack.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;

use crawl_robots::RobotsTransport;

/// A single outbound fetch, with the conditional-revalidation headers the
/// fetch pipeline derives from a prior cache entry.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Absolute URL to fetch.
    pub url: String,
    /// `If-None-Match`, from a previously cached `ETag`.
    pub if_none_match: Option<String>,
    /// `If-Modified-Since`, from a previously cached `Last-Modified`.
    pub if_modified_since: Option<String>,
}

/// A completed HTTP response, body fully buffered up to the configured cap.
#[derive(Debug, Clone)]
pub struct NetworkResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, lower-cased keys, first value per key.
    pub headers: BTreeMap<String, String>,
    /// Decoded response body (gzip/deflate/br transparently undone by the
    /// underlying client).
    pub body: Vec<u8>,
    /// Parsed `Retry-After`, accepting both the delay-seconds form and the
    /// HTTP-date form, as a duration measured from the time the response was
    /// received.
    pub retry_after: Option<Duration>,
    /// The URL the response actually came from, after following redirects.
    pub final_url: String,
}

/// Failure modes for [`NetworkTransport::fetch`].
#[derive(Debug, Error)]
pub enum NetworkError {
    /// DNS, connect, TLS, or mid-stream I/O failure.
    #[error("connection error: {0}")]
    Connection(String),
    /// The configured connect/read timeout elapsed.
    #[error("request timed out")]
    Timeout,
    /// The response body exceeded the configured cap; the fetch is aborted
    /// rather than silently truncated.
    #[error("response body exceeded {cap} bytes")]
    BodyTooLarge {
        /// The configured cap, in bytes.
        cap: u64,
    },
}

/// Parses a `Retry-After` header value, accepting both the delay-seconds
/// form (`"120"`) and the HTTP-date form (`"Wed, 21 Oct 2025 07:28:00 GMT"`),
/// per spec.md §6.4. A date already in the past resolves to a zero duration
/// rather than `None`, so the caller still treats the response as retryable.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// The fetch pipeline's only network dependency.
#[async_trait]
pub trait NetworkTransport: Send + Sync {
    /// Performs `request`, following redirects internally.
    async fn fetch(&self, request: FetchRequest) -> Result<NetworkResponse, NetworkError>;
}

/// `reqwest`-backed [`NetworkTransport`] and [`RobotsTransport`].
pub struct ReqwestTransport {
    client: reqwest::Client,
    max_body_bytes: u64,
}

impl ReqwestTransport {
    /// Builds a transport with up to 5 redirect hops, the given timeouts,
    /// and gzip/deflate/br decoding always enabled.
    pub fn new(
        user_agent: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
        max_body_bytes: u64,
    ) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .gzip(true)
            .build()
            .map_err(|e| NetworkError::Connection(e.to_string()))?;
        Ok(ReqwestTransport { client, max_body_bytes })
    }

    async fn get(&self, url: &str, conditional: Option<(&Option<String>, &Option<String>)>) -> Result<NetworkResponse, NetworkError> {
        let mut builder = self.client.get(url);
        if let Some((if_none_match, if_modified_since)) = conditional {
            if let Some(etag) = if_none_match {
                builder = builder.header(http::header::IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = if_modified_since {
                builder = builder.header(http::header::IF_MODIFIED_SINCE, last_modified);
            }
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetworkError::Timeout
            } else {
                NetworkError::Connection(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.entry(name.as_str().to_ascii_lowercase()).or_insert_with(|| v.to_string());
            }
        }
        let retry_after = headers.get("retry-after").and_then(|v| parse_retry_after(v));

        let cap = self.max_body_bytes;
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| NetworkError::Connection(e.to_string()))?;
            if body.len() as u64 + chunk.len() as u64 > cap {
                return Err(NetworkError::BodyTooLarge { cap });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(NetworkResponse {
            status,
            headers,
            body,
            retry_after,
            final_url,
        })
    }
}

#[async_trait]
impl NetworkTransport for ReqwestTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<NetworkResponse, NetworkError> {
        self.get(&request.url, Some((&request.if_none_match, &request.if_modified_since))).await
    }
}

#[async_trait]
impl RobotsTransport for ReqwestTransport {
    async fn fetch_robots_txt(&self, host: &str) -> Result<(u16, Vec<u8>), String> {
        let https = format!("https://{host}/robots.txt");
        match self.get(&https, None).await {
            Ok(response) => Ok((response.status, response.body)),
            Err(_) => {
                let http_url = format!("http://{host}/robots.txt");
                self.get(&http_url, None)
                    .await
                    .map(|r| (r.status, r.body))
                    .map_err(|e| e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delay_seconds_form() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn parses_http_date_form_in_the_future() {
        let future = chrono::Utc::now() + chrono::Duration::seconds(60);
        let header = future.to_rfc2822();
        let parsed = parse_retry_after(&header).expect("HTTP-date form should parse");
        // allow a little slack for the time elapsed between formatting above
        // and parsing here.
        assert!(parsed.as_secs() >= 55 && parsed.as_secs() <= 60);
    }

    #[test]
    fn http_date_in_the_past_resolves_to_zero() {
        let past = chrono::Utc::now() - chrono::Duration::seconds(60);
        let header = past.to_rfc2822();
        assert_eq!(parse_retry_after(&header), Some(Duration::ZERO));
    }

    #[test]
    fn parses_imf_fixdate_gmt_literal() {
        // the form actual origin servers send, per RFC 7231 §7.1.1.1.
        let header = "Wed, 21 Oct 2025 07:28:00 GMT";
        assert!(parse_retry_after(header).is_some());
    }

    #[test]
    fn garbage_value_is_none() {
        assert_eq!(parse_retry_after("not-a-retry-after-value"), None);
    }
}
