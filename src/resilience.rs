//! Timeout, retry, and error classification for external capability calls.
//!
//! Every embedding, generation, and messaging request runs through [`RetryPolicy::run`]. Each
//! attempt is bounded by a timeout; transient failures (timeouts, connection errors, HTTP 429 and
//! 5xx) are retried with doubling backoff, while authentication and other client errors fail on
//! the first attempt.

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Failure of an external capability after classification.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    /// The attempt did not complete within the configured timeout.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// No connection could be established, so the request was never sent.
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    /// The remote endpoint could not be reached.
    #[error("service unavailable: {0}")]
    Unavailable(String),
    /// The remote endpoint answered with a transient error status.
    #[error("upstream returned {status}: {body}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
    /// The remote endpoint rejected the request as malformed.
    #[error("request rejected with {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
    /// Credentials were refused.
    #[error("authentication failed: {0}")]
    Unauthorized(String),
    /// The capability is missing required configuration.
    #[error("capability not configured: {0}")]
    NotConfigured(String),
    /// The response could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

const MAX_ERROR_BODY: usize = 512;

impl CapabilityError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::ConnectFailed(_)
                | Self::Unavailable(_)
                | Self::Upstream { .. }
        )
    }

    /// Whether the request failed before reaching the remote endpoint.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Self::ConnectFailed(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        let body: String = body.chars().take(MAX_ERROR_BODY).collect();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Self::Unauthorized(format!("{status}: {body}"))
            }
            StatusCode::TOO_MANY_REQUESTS => Self::Upstream {
                status: status.as_u16(),
                body,
            },
            status if status.is_server_error() => Self::Upstream {
                status: status.as_u16(),
                body,
            },
            status => Self::Rejected {
                status: status.as_u16(),
                body,
            },
        }
    }

    /// Classify a transport-level failure.
    pub fn from_transport(error: reqwest::Error) -> Self {
        if error.is_connect() {
            Self::ConnectFailed(error.to_string())
        } else if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else {
            Self::Unavailable(error.to_string())
        }
    }
}

/// Check the status of `response` and decode its JSON body.
pub(crate) async fn decode_json<T: DeserializeOwned>(
    response: Response,
) -> Result<T, CapabilityError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CapabilityError::from_status(status, body));
    }
    response
        .json()
        .await
        .map_err(|error| CapabilityError::InvalidResponse(error.to_string()))
}

/// Build the shared HTTP client used by capability adapters.
pub(crate) fn http_client(user_agent: &str) -> Result<reqwest::Client, CapabilityError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .build()
        .map_err(|error| CapabilityError::NotConfigured(format!("http client: {error}")))
}

/// Timeout and bounded exponential backoff applied to external calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Upper bound for a single attempt.
    pub timeout: Duration,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Ceiling for the doubled delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay applied after the given failed attempt (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `call` until it succeeds, fails permanently, or attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, operation: &str, call: F) -> Result<T, CapabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>>,
    {
        self.run_when(operation, CapabilityError::is_retryable, call).await
    }

    /// Like [`RetryPolicy::run`], but only failures accepted by `retry_if` are retried.
    ///
    /// Non-idempotent calls pass [`CapabilityError::is_connect_failure`] so a request that may
    /// have reached the remote side is never repeated.
    pub async fn run_when<T, F, Fut, P>(
        &self,
        operation: &str,
        retry_if: P,
        mut call: F,
    ) -> Result<T, CapabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>>,
        P: Fn(&CapabilityError) -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::Timeout(format!(
                    "{operation} exceeded {} ms",
                    self.timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(error) if retry_if(&error) && attempt < attempts => {
                    let delay = self.backoff_after(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "External call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(operation, attempt, error = %error, "External call failed");
                    return Err(error);
                }
            }
        }
    }
}
