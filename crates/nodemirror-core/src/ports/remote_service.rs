//! Remote service port
//!
//! Abstracts the remote object store: endpoint discovery, the change feed,
//! node mutations and content reads. The default adapter lives in the
//! `nodemirror-remote` crate.

use crate::domain::{Checkpoint, Endpoints, MirrorError, Node, NodeId, TokenBundle};

// ============================================================================
// Authenticated transport handle
// ============================================================================

/// Everything a remote call needs to authenticate
///
/// Handed out by the session manager; cheap to clone and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHandle {
    /// Token type, normally "bearer"
    pub token_type: String,
    /// Bearer access token
    pub access_token: String,
    /// Discovered service endpoints
    pub endpoints: Endpoints,
}

// ============================================================================
// Change feed
// ============================================================================

/// Parameters of one change-feed request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeRequest {
    /// Resume point; `None` starts from the beginning of history
    pub checkpoint: Option<Checkpoint>,
    /// Ask for purged nodes too; only meaningful when resuming
    pub include_purged: bool,
}

impl ChangeRequest {
    /// Builds the request for a given resume point
    ///
    /// Purged nodes are requested only when resuming: a full listing has
    /// nothing to delete.
    pub fn resuming_from(checkpoint: Option<Checkpoint>) -> Self {
        let include_purged = checkpoint.is_some();
        Self {
            checkpoint,
            include_purged,
        }
    }
}

/// One newline-delimited record of a change-feed response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangePart {
    /// Cursor to stage once the part's nodes are applied
    pub checkpoint: Option<Checkpoint>,
    /// Clear the cache before applying this part's nodes
    pub reset: bool,
    /// End of this page
    pub end: bool,
    /// Nodes carried by the part; `Some(empty)` means the feed is drained
    pub nodes: Option<Vec<Node>>,
}

impl ChangePart {
    /// Returns true if this part signals that no further pages exist
    pub fn is_drained(&self) -> bool {
        self.nodes.as_ref().is_some_and(|n| n.is_empty())
    }
}

// ============================================================================
// Mutations and content
// ============================================================================

/// Raw outcome of a node mutation call
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    /// HTTP status code
    pub status: u16,
    /// JSON response body; a node payload on success
    pub body: serde_json::Value,
}

impl RemoteResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Best-effort human-readable message from an error body
    pub fn message(&self) -> String {
        self.body
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.body.to_string())
    }
}

/// Inclusive byte range of a content read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte
    pub start: u64,
    /// Last byte (inclusive); `None` reads to the end
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// Value of the HTTP `Range` header for this range
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

// ============================================================================
// IRemoteService trait
// ============================================================================

/// Port trait for the remote object store
///
/// Mutations return the raw [`RemoteResponse`] so the repository can turn a
/// non-success status into a structured refusal; only transport and protocol
/// failures are errors. Mutations are never retried.
#[async_trait::async_trait]
pub trait IRemoteService: Send + Sync {
    /// Discovers the metadata and content endpoints for a token
    async fn discover_endpoints(&self, tokens: &TokenBundle) -> Result<Endpoints, MirrorError>;

    /// Fetches one page of the change feed
    ///
    /// # Errors
    /// - `MirrorError::Auth` on HTTP 401
    /// - `MirrorError::Protocol` if the body is empty or any part fails to parse
    /// - `MirrorError::Transport` / `MirrorError::Remote` otherwise
    async fn fetch_changes(
        &self,
        handle: &AuthHandle,
        request: &ChangeRequest,
    ) -> Result<Vec<ChangePart>, MirrorError>;

    /// Fetches the current metadata of one node
    async fn get_node(&self, handle: &AuthHandle, id: &NodeId) -> Result<RemoteResponse, MirrorError>;

    /// Creates a folder under `parent`
    async fn create_folder(
        &self,
        handle: &AuthHandle,
        name: &str,
        parent: &NodeId,
    ) -> Result<RemoteResponse, MirrorError>;

    /// Renames a node
    async fn rename_node(
        &self,
        handle: &AuthHandle,
        id: &NodeId,
        new_name: &str,
    ) -> Result<RemoteResponse, MirrorError>;

    /// Moves a node from one parent to another
    async fn move_node(
        &self,
        handle: &AuthHandle,
        id: &NodeId,
        from_parent: &NodeId,
        to_parent: &NodeId,
    ) -> Result<RemoteResponse, MirrorError>;

    /// Moves a node to the trash
    async fn trash_node(&self, handle: &AuthHandle, id: &NodeId) -> Result<RemoteResponse, MirrorError>;

    /// Restores a node from the trash
    async fn restore_node(&self, handle: &AuthHandle, id: &NodeId) -> Result<RemoteResponse, MirrorError>;

    /// Reads node content, optionally limited to a byte range
    async fn read_content(
        &self,
        handle: &AuthHandle,
        id: &NodeId,
        range: Option<ByteRange>,
    ) -> Result<Vec<u8>, MirrorError>;
}
