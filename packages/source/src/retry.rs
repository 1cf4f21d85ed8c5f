//! Bounded retry with exponential backoff for remote calls.
//!
//! Every live lookup wraps its request in [`RetryPolicy::run`] instead of
//! looping by hand. The closure is invoked once per attempt so it can build
//! a fresh [`reqwest::RequestBuilder`] each time (builders are consumed by
//! `.send()`).
//!
//! ```ignore
//! let body = policy
//!     .run("ACS 12086006713", || retry::send_json(|| client.get(&url)))
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use crate::SourceError;

/// Maximum length of the response body preview included in logs.
const BODY_PREVIEW_LEN: usize = 500;

/// Attempt budget, backoff schedule and per-attempt timeout for a remote
/// call.
///
/// Backoff doubles after every failed attempt: with the defaults (3
/// attempts, 1s initial backoff) a call waits 1s then 2s before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Hard timeout for a single attempt, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl RetryPolicy {
    /// Per-attempt timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay to wait before attempt number `attempt` (1-based retry index).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }

    /// Runs `attempt_fn` until it succeeds, fails permanently, or the
    /// attempt budget is spent.
    ///
    /// Each attempt is bounded by [`Self::timeout`]; an attempt that runs
    /// over counts as a transient failure.
    ///
    /// # Errors
    ///
    /// Returns the first permanent [`SourceError`] unchanged, or
    /// [`SourceError::RetriesExhausted`] wrapping the last transient error.
    pub async fn run<T, F, Fut>(&self, label: &str, mut attempt_fn: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error: Option<SourceError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                log::warn!("{label}: retry {attempt}/{} in {delay:?}...", attempts - 1);
                tokio::time::sleep(delay).await;
            }

            let result = match tokio::time::timeout(self.timeout(), attempt_fn()).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout {
                    label: label.to_string(),
                    after: self.timeout(),
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    log::warn!("{label}: transient error: {e}");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(SourceError::RetriesExhausted {
            label: label.to_string(),
            attempts,
            last: Box::new(last_error.unwrap_or_else(|| SourceError::Normalization {
                message: "request failed after all retries".to_string(),
            })),
        })
    }
}

/// Sends one HTTP request and parses the body as JSON.
///
/// Non-2xx statuses become [`SourceError::Status`] so the retry policy can
/// tell rate limiting and server errors apart from permanent client errors.
/// `204 No Content` (the ACS answer for an unknown geography) yields
/// [`serde_json::Value::Null`].
///
/// # Errors
///
/// Returns [`SourceError`] if the request fails, the status is not a
/// success, or the body is not valid JSON.
pub async fn send_json<F>(build_request: F) -> Result<serde_json::Value, SourceError>
where
    F: FnOnce() -> reqwest::RequestBuilder,
{
    let response = build_request().send().await?;
    let url = response.url().to_string();
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        log::debug!("HTTP {status} from {url}: {}", preview(&body));
        return Err(SourceError::Status {
            status: status.as_u16(),
            url,
        });
    }

    if status == reqwest::StatusCode::NO_CONTENT {
        return Ok(serde_json::Value::Null);
    }

    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| {
        log::warn!(
            "JSON parse failed for {url} ({} bytes): {e}\n  body preview: {}",
            text.len(),
            preview(&text)
        );
        SourceError::Json(e)
    })
}

/// Truncates a body for logging, appending "..." when cut.
fn preview(body: &str) -> String {
    if body.chars().count() <= BODY_PREVIEW_LEN {
        body.to_string()
    } else {
        let cut: String = body.chars().take(BODY_PREVIEW_LEN).collect();
        format!("{cut}...")
    }
}
