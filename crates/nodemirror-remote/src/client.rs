//! Shared HTTP client for the remote service
//!
//! Wraps `reqwest::Client` with gzip, timeouts and bearer authentication.
//! Idempotent reads go through [`RemoteClient::send_idempotent`], which
//! retries transport failures, 429 and 5xx answers with bounded backoff.
//! Everything else is sent exactly once.
//!
//! Requests built with [`RemoteClient::request`] carry a whole-request
//! deadline. Streamed answers use [`RemoteClient::stream_request`], which
//! is bounded by the idle read timeout only, so a long but steadily
//! flowing body is never cut.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use nodemirror_core::config::RemoteConfig;
//! use nodemirror_remote::client::RemoteClient;
//! use reqwest::Method;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = RemoteClient::new(&RemoteConfig::default())?;
//! let response = client
//!     .send_idempotent("discover", || {
//!         client.request(Method::GET, "https://example.test/endpoint", "token")
//!     })
//!     .await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::debug;

use nodemirror_core::config::RemoteConfig;
use nodemirror_core::domain::MirrorError;
use nodemirror_core::ports::RemoteResponse;
use nodemirror_core::retry::{with_retry, RetryPolicy, RetryableError};

use crate::RemoteError;

/// Upper bound accepted from a `Retry-After` header
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// HTTP client shared by the auth and node adapters
#[derive(Clone)]
pub struct RemoteClient {
    client: Client,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl RemoteClient {
    /// Builds the client from the remote settings
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::NetworkError` if the TLS backend cannot be
    /// initialized.
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .gzip(true)
            .read_timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            retry: config.retry_policy(),
            request_timeout: config.request_timeout(),
        })
    }

    /// Replaces the retry policy for idempotent reads
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Deadline applied to every non-streaming request
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Underlying reqwest client, shared with the OAuth flow
    ///
    /// Requests built from it are bounded by the idle read timeout only.
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Creates a request to an absolute `url` carrying the bearer token and
    /// the whole-request deadline
    pub fn request(&self, method: Method, url: &str, access_token: &str) -> RequestBuilder {
        self.stream_request(method, url, access_token)
            .timeout(self.request_timeout)
    }

    /// Like [`request`](Self::request), but without a whole-request deadline
    ///
    /// For answers whose body is streamed: the connection is abandoned only
    /// when no data arrives for the configured request timeout.
    pub fn stream_request(&self, method: Method, url: &str, access_token: &str) -> RequestBuilder {
        self.client.request(method, url).bearer_auth(access_token)
    }

    /// Sends a request once
    ///
    /// # Errors
    ///
    /// Returns `MirrorError::Transport` on network failure or timeout.
    pub async fn send_once(&self, request: RequestBuilder) -> Result<Response, MirrorError> {
        request
            .send()
            .await
            .map_err(|e| MirrorError::from(RemoteError::NetworkError(e)))
    }

    /// Sends an idempotent request, retrying transient failures
    ///
    /// `build` produces a fresh request for every attempt. 429 answers wait
    /// for the larger of the backoff delay and the `Retry-After` header,
    /// capped at the policy's maximum delay.
    ///
    /// # Errors
    ///
    /// Returns the last transient error once the retry budget is spent.
    /// Non-transient statuses are returned as a response, not an error.
    pub async fn send_idempotent<F>(&self, operation: &str, build: F) -> Result<Response, MirrorError>
    where
        F: Fn() -> RequestBuilder,
    {
        let build = &build;
        with_retry(&self.retry, operation, move || async move {
            let response = build().send().await.map_err(RemoteError::NetworkError)?;
            match classify(&response) {
                None => Ok(response),
                Some(err) => Err(err),
            }
        })
        .await
        .map_err(MirrorError::from)
    }
}

impl RetryableError for RemoteError {
    fn is_transient(&self) -> bool {
        match self {
            RemoteError::TooManyRequests { .. } | RemoteError::NetworkError(_) => true,
            RemoteError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::TooManyRequests { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Transient error for a retryable response, `None` otherwise
fn classify(response: &Response) -> Option<RemoteError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(parse_retry_after)
            .unwrap_or(Duration::ZERO);
        return Some(RemoteError::TooManyRequests { retry_after });
    }
    if status.is_server_error() {
        return Some(RemoteError::Status {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or("server error").to_string(),
        });
    }
    None
}

/// Parses a `Retry-After` header value (delta-seconds or HTTP-date)
///
/// Unparseable or past values yield zero so the backoff curve applies.
pub fn parse_retry_after(value: &str) -> Duration {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Duration::from_secs(seconds).min(MAX_RETRY_AFTER);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let wait = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
        if let Ok(wait) = wait.to_std() {
            return wait.min(MAX_RETRY_AFTER);
        }
        return Duration::ZERO;
    }

    debug!(value, "Could not parse Retry-After header");
    Duration::ZERO
}

/// Reads a response into a [`RemoteResponse`]
///
/// An empty body becomes `null`; a non-JSON body is kept as a string so
/// error messages survive.
///
/// # Errors
///
/// Returns `MirrorError::Transport` if the body cannot be read.
pub async fn into_remote_response(response: Response) -> Result<RemoteResponse, MirrorError> {
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| MirrorError::from(RemoteError::NetworkError(e)))?;

    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };

    Ok(RemoteResponse { status, body })
}

/// Joins a discovered endpoint and a relative path
pub fn endpoint_url(base: &str, path: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}
