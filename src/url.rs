//! URL value type.
//!
//! Wraps the `url` crate's RFC 3986 parser with the canonicalization and
//! invariants this crate needs: lowercase host, default port elided,
//! decoded-but-normalized path, and a `dir_len` marker used by the
//! no-parent scope check (§4.10 rule 5).

use std::fmt;

use crate::error::FetchError;

/// An immutable, parsed URL.
///
/// Equality and hashing are based on the canonical string (§4.1: "A URL
/// is present in the queue at most once"), so two `Url` values that
/// differ only by fragment or by redundant `..` segments compare equal
/// once parsed.
#[derive(Debug, Clone)]
pub struct Url {
    inner: url::Url,
    dir_len: usize,
}

impl Url {
    /// Parse an absolute URL. Only `http`/`https` schemes are accepted.
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let parsed = url::Url::parse(raw).map_err(|_| FetchError::InvalidUrl {
            reason: "malformed".into(),
        })?;
        Self::from_parsed(parsed)
    }

    /// Resolve `raw` (absolute or relative) against `base`.
    pub fn resolve(base: &Url, raw: &str) -> Result<Self, FetchError> {
        let parsed = base
            .inner
            .join(raw)
            .map_err(|_| FetchError::InvalidUrl { reason: "malformed".into() })?;
        Self::from_parsed(parsed)
    }

    fn from_parsed(mut parsed: url::Url) -> Result<Self, FetchError> {
        match parsed.scheme() {
            "http" | "https" => {}
            _ => {
                return Err(FetchError::InvalidUrl {
                    reason: "unsupported scheme".into(),
                });
            }
        }
        if parsed.host_str().map(|h| h.is_ascii()).unwrap_or(false) == false
            && parsed.host_str().is_some()
        {
            return Err(FetchError::InvalidUrl {
                reason: "non-ascii host without IDN input".into(),
            });
        }
        // Canonicalize: lowercase host, drop fragment, collapse `.`/`..`.
        parsed.set_fragment(None);
        let host_lower = parsed.host_str().map(|h| h.to_ascii_lowercase());
        if let Some(h) = host_lower {
            let _ = parsed.set_host(Some(&h));
        }
        let normalized_path = normalize_path(parsed.path());
        parsed.set_path(&normalized_path);

        let dir_len = normalized_path
            .rfind('/')
            .map(|i| i + 1)
            .unwrap_or(0);

        Ok(Url {
            inner: parsed,
            dir_len,
        })
    }

    pub fn scheme(&self) -> &str {
        self.inner.scheme()
    }

    pub fn is_https(&self) -> bool {
        self.inner.scheme() == "https"
    }

    pub fn host(&self) -> &str {
        self.inner.host_str().unwrap_or("")
    }

    pub fn port(&self) -> u16 {
        self.inner
            .port_or_known_default()
            .unwrap_or(if self.is_https() { 443 } else { 80 })
    }

    pub fn path(&self) -> &str {
        self.inner.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.inner.query()
    }

    /// Index within `path()` just past the final `/`, i.e. the directory prefix.
    pub fn dir_len(&self) -> usize {
        self.dir_len
    }

    pub fn dir_prefix(&self) -> &str {
        &self.path()[..self.dir_len]
    }

    /// Canonical string used for blacklist keying and HTTP requests; the
    /// fragment has already been dropped at parse time.
    pub fn canonical(&self) -> String {
        self.inner.to_string()
    }

    /// `(scheme, host, port)` identity used for connection reuse (§4.6)
    /// and host registry keying (§4.4).
    pub fn origin(&self) -> (String, String, u16) {
        (self.scheme().to_string(), self.host().to_string(), self.port())
    }

    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }
}

impl PartialEq for Url {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}
impl Eq for Url {}

impl std::hash::Hash for Url {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

/// Collapse `.` and `..` segments, never climbing above root.
fn normalize_path(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "." => {}
            ".." => {
                if !out.is_empty() {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    let joined = out.join("/");
    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}
