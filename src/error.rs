//! Crate-wide error taxonomy and exit-code mapping.
//!
//! One enum with a variant per external error source, converted via
//! `From` so `?` works end to end, backed by `thiserror` for the
//! `Display`/`Error` impls, plus the exit-code mapping the supervisor
//! needs to aggregate across jobs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {reason}")]
    InvalidUrl { reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("dns resolution failed: {kind}")]
    Resolve { kind: String },

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("authentication required without usable credentials")]
    AuthRequired,

    #[error("malformed response framing: {0}")]
    Protocol(String),

    #[error("remote returned {status}")]
    Remote4xx { status: u16 },

    #[error("write failed: {0}")]
    IoWrite(String),

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("header to_str error: {0}")]
    HeaderToStr(#[from] reqwest::header::ToStrError),
}

impl FetchError {
    /// Exit-code mapping. The supervisor aggregates the minimum
    /// non-zero code across every job ("lower supersedes higher").
    pub fn exit_code(&self) -> u8 {
        match self {
            FetchError::InvalidUrl { .. } => 0, // dropped silently, not fatal
            FetchError::Resolve { .. } | FetchError::Connect(_) | FetchError::Http(_) => 4,
            FetchError::Tls(_) => 5,
            FetchError::AuthRequired => 6,
            FetchError::Protocol(_) => 7,
            FetchError::Remote4xx { .. } => 8,
            FetchError::IoWrite(_) | FetchError::Io(_) => 3,
            FetchError::QuotaExceeded => 0,
            FetchError::Join(_) => 1,
            FetchError::Json(_) => 2,
            FetchError::HeaderToStr(_) => 7,
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Resolve { .. } | FetchError::Connect(_) | FetchError::Http(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_mapping_covers_hard_error_variants() {
        assert_eq!(FetchError::Tls("x".into()).exit_code(), 5);
        assert_eq!(FetchError::AuthRequired.exit_code(), 6);
        assert_eq!(FetchError::Remote4xx { status: 404 }.exit_code(), 8);
    }

    #[test]
    fn network_errors_are_transient() {
        assert!(FetchError::Connect("refused".into()).is_transient());
        assert!(!FetchError::AuthRequired.is_transient());
    }
}
