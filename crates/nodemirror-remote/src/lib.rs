//! nodemirror remote - client for the remote object store
//!
//! Provides:
//! - Bearer-authenticated HTTP transport with bounded retry for reads
//! - OAuth2 authorization (code flow or authorization helper)
//! - Streaming newline-delimited change-feed parsing
//! - Node mutations and byte-range content reads
//!
//! ## Modules
//!
//! - [`auth`] - `IAuthProvider` adapter
//! - [`changes`] - change-feed decoder
//! - [`client`] - shared HTTP client
//! - [`provider`] - `IRemoteService` adapter

pub mod auth;
pub mod changes;
pub mod client;
pub mod provider;

pub use auth::OAuthAdapter;
pub use changes::{parse_change_parts, ChangeFeedDecoder};
pub use client::RemoteClient;
pub use provider::RemoteNodeService;

use std::time::Duration;

use nodemirror_core::domain::MirrorError;
use thiserror::Error;

/// Errors raised while talking to the remote service
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The access token or grant was rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limit exceeded; retry after the specified duration
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests {
        /// Duration to wait before retrying
        retry_after: Duration,
    },

    /// The service answered with an error status
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Message extracted from the body
        message: String,
    },

    /// A network-level error occurred
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A configured URL is not usable
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<RemoteError> for MirrorError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Unauthorized(msg) => MirrorError::Auth(msg),
            RemoteError::TooManyRequests { .. } => MirrorError::Remote {
                status: 429,
                message: e.to_string(),
            },
            RemoteError::Status { status, message } => MirrorError::Remote { status, message },
            RemoteError::NetworkError(err) => MirrorError::Transport(err.to_string()),
            RemoteError::InvalidResponse(msg) => MirrorError::Protocol(msg),
            RemoteError::InvalidUrl(msg) => MirrorError::Precondition(msg),
        }
    }
}
