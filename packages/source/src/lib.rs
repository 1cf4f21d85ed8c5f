#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! HTTP plumbing shared by every remote census service.
//!
//! All live lookups (boundary resolution, ACS demographics, `TIGERweb`
//! centroids) go through [`retry::RetryPolicy`] so that every network call
//! has a bounded attempt budget, exponential backoff and a hard timeout.

pub mod retry;

use std::time::Duration;

/// Browser-like User-Agent; `TIGERweb` sits behind a WAF that rejects
/// obviously automated clients.
pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; SitePredict/1.0; +https://github.com)";

/// Errors that can occur while talking to a remote data source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered with a non-success status code.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Numeric HTTP status.
        status: u16,
        /// Request URL.
        url: String,
    },

    /// A single attempt exceeded the per-request timeout.
    #[error("{label}: timed out after {after:?}")]
    Timeout {
        /// Which call timed out.
        label: String,
        /// The timeout that was exceeded.
        after: Duration,
    },

    /// Response could not be interpreted.
    #[error("Normalization error: {message}")]
    Normalization {
        /// Description of what went wrong.
        message: String,
    },

    /// Every attempt allowed by the retry policy failed transiently.
    #[error("{label}: gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Which call was being retried.
        label: String,
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last: Box<Self>,
    },
}

impl SourceError {
    /// Returns `true` if the error is likely transient and worth retrying.
    ///
    /// Connection failures, timeouts, HTTP 429 and HTTP 5xx are transient.
    /// Other 4xx statuses and malformed payloads are permanent.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
            }
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout { .. } => true,
            Self::Json(_)
            | Self::Io(_)
            | Self::Normalization { .. }
            | Self::RetriesExhausted { .. } => false,
        }
    }
}

/// Builds a `reqwest::Client` with the shared User-Agent and a per-request
/// timeout.
///
/// # Errors
///
/// Returns [`SourceError`] if the client cannot be built.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        let url = "https://example.test".to_string();
        assert!(
            SourceError::Status {
                status: 429,
                url: url.clone()
            }
            .is_transient()
        );
        assert!(
            SourceError::Status {
                status: 503,
                url: url.clone()
            }
            .is_transient()
        );
        assert!(!SourceError::Status { status: 404, url }.is_transient());
    }

    #[test]
    fn exhausted_and_normalization_errors_are_permanent() {
        let norm = SourceError::Normalization {
            message: "bad".to_string(),
        };
        assert!(!norm.is_transient());

        let exhausted = SourceError::RetriesExhausted {
            label: "x".to_string(),
            attempts: 3,
            last: Box::new(SourceError::Timeout {
                label: "x".to_string(),
                after: Duration::from_secs(1),
            }),
        };
        assert!(!exhausted.is_transient());
    }
}
