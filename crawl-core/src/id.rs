//! Stable request identity derived from a canonical URL.

use std::fmt;

use sha2::{Digest, Sha256};

/// Stable identity for a [`crate::Request`], derived from its canonical URL.
///
/// Two requests for the same canonical URL always produce the same
/// `RequestId`, which is what lets the queue enforce "at most one queued or
/// in-progress entry per URL" without a separate lookup table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Derives a `RequestId` from an already-canonicalized URL string.
    ///
    /// Does not itself canonicalize — callers must pass a URL that has
    /// already gone through `crawl_url::normalize`, otherwise two different
    /// textual forms of the same resource would hash to different ids.
    pub fn from_canonical_url(canonical_url: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical_url.as_bytes());
        RequestId(hex::encode(hasher.finalize()))
    }

    /// Returns the id as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps an already-derived id string, e.g. one read back from a store
    /// row. Does not hash `raw` — callers must already hold a value
    /// previously produced by [`RequestId::from_canonical_url`].
    pub fn from_raw(raw: String) -> Self {
        RequestId(raw)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_url_same_id() {
        let a = RequestId::from_canonical_url("https://a.test/x");
        let b = RequestId::from_canonical_url("https://a.test/x");
        assert_eq!(a, b);
    }

    #[test]
    fn different_url_different_id() {
        let a = RequestId::from_canonical_url("https://a.test/x");
        let b = RequestId::from_canonical_url("https://a.test/y");
        assert_ne!(a, b);
    }
}
