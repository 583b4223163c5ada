//! Riot API Error Differentiation
//!
//! Classifies upstream responses into structured error types so the caller
//! can tell soft conditions (quota exhaustion, missing partitions) apart
//! from fatal upstream failures.

use thiserror::Error;

/// Structured Riot API error types
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Quota exceeded (429); carries the Retry-After hint when present
    #[error("quota exceeded (retry after {})", .retry_after.map(|s| format!("{}s", s)).unwrap_or_else(|| "unspecified".into()))]
    QuotaExceeded { retry_after: Option<u64> },
    /// Resource does not exist (404); soft per partition
    #[error("resource not found")]
    NotFound,
    /// API key rejected
    #[error("authentication failed")]
    AuthenticationFailed,
    /// Network/connection error (timeout, DNS, etc.)
    #[error("network error: {0}")]
    Network(String),
    /// Any other upstream failure; fatal for the run
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },
}

impl ApiError {
    /// Classify a non-success response by status, pulling the Retry-After
    /// hint out of the headers on 429.
    pub fn from_response(status: u16, headers: &reqwest::header::HeaderMap, body: &str) -> Self {
        match status {
            429 => {
                let retry_after = headers
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                ApiError::QuotaExceeded { retry_after }
            }
            404 => ApiError::NotFound,
            401 | 403 => ApiError::AuthenticationFailed,
            _ => ApiError::Upstream {
                status,
                body: body.to_string(),
            },
        }
    }

    /// Wrap a reqwest transport error
    pub fn from_network_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Network("request timed out".to_string())
        } else if err.is_connect() {
            ApiError::Network("connection failed".to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }

    /// Whether this error should be retried with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::QuotaExceeded { .. } | ApiError::Network(_))
    }

    /// The Retry-After hint in seconds, if the server sent one
    pub fn retry_after_hint(&self) -> Option<u64> {
        match self {
            ApiError::QuotaExceeded { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn test_quota_exceeded_with_hint() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("5"));
        let err = ApiError::from_response(429, &headers, "");
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_hint(), Some(5));
    }

    #[test]
    fn test_quota_exceeded_without_hint() {
        let err = ApiError::from_response(429, &HeaderMap::new(), "");
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_hint(), None);
    }

    #[test]
    fn test_not_found_is_soft_but_not_retryable() {
        let err = ApiError::from_response(404, &HeaderMap::new(), "");
        assert!(!err.is_retryable());
        assert!(matches!(err, ApiError::NotFound));
    }

    #[test]
    fn test_auth_failed() {
        let err = ApiError::from_response(403, &HeaderMap::new(), "Forbidden");
        assert!(!err.is_retryable());
        assert!(matches!(err, ApiError::AuthenticationFailed));
    }

    #[test]
    fn test_unknown_upstream() {
        let err = ApiError::from_response(500, &HeaderMap::new(), "internal error");
        assert!(!err.is_retryable());
        assert!(matches!(err, ApiError::Upstream { status: 500, .. }));
    }
}
