//! Domain and use-case error types
//!
//! [`DomainError`] covers validation of domain values. [`MirrorError`] is the
//! taxonomy surfaced by the use cases and the remote port:
//!
//! - `Auth`: credential or token rejected; surfaced to the user
//! - `Precondition`: a mutation was refused before touching the remote
//! - `Transport`: network failure or timeout
//! - `Protocol`: the remote sent something that cannot be parsed
//! - `Remote`: the remote answered with a non-success status
//! - `Cache`: a local cache write or read failed; fatal for the operation
//!
//! Lookup misses are not errors; they are `None` or an empty list.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid node identifier
    #[error("Invalid node ID: {0}")]
    InvalidNodeId(String),

    /// Invalid change-feed checkpoint
    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    /// Invalid identity key
    #[error("Invalid identity key: {0}")]
    InvalidIdentity(String),

    /// Node payload is missing required attributes or has wrong types
    #[error("Invalid node payload: {0}")]
    InvalidPayload(String),

    /// Token object is malformed
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Authorization callback URL could not be used
    #[error("Invalid callback URL: {0}")]
    InvalidCallback(String),

    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Errors surfaced by session, repository and synchronization operations
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Credential or token rejected by the remote
    #[error("Authorization failed: {0}")]
    Auth(String),

    /// Operation refused before any remote call was made
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Network failure, timeout or connection reset
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed response body or change-feed part
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Remote answered with a non-success status
    #[error("Remote returned HTTP {status}: {message}")]
    Remote {
        /// HTTP status code
        status: u16,
        /// Message extracted from the response, if any
        message: String,
    },

    /// Local cache operation failed
    #[error("Cache error: {0}")]
    Cache(String),

    /// Operation was cancelled before it completed
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid domain value
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl MirrorError {
    /// Wraps a cache adapter failure, keeping the full context chain
    pub fn cache(err: anyhow::Error) -> Self {
        MirrorError::Cache(format!("{err:#}"))
    }

    /// Returns true if retrying the same idempotent request may succeed
    ///
    /// Transport failures, 429 and 5xx responses are transient. Auth,
    /// protocol and cache failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            MirrorError::Transport(_) => true,
            MirrorError::Remote { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns true if this is an authorization failure
    pub fn is_auth(&self) -> bool {
        matches!(self, MirrorError::Auth(_))
    }
}
