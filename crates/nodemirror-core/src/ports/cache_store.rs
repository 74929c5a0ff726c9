//! Cache store port (driven/secondary port)
//!
//! This module defines the persistence contract for the local mirror:
//! nodes, their parent/child edges, and session records. Every backend
//! (embedded relational, client-server relational, document store) must
//! implement it with identical observable behavior.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific and
//!   callers treat every cache failure as fatal for the current operation.
//! - Lookups return `Option`/`Vec`; a miss is never an error.
//! - Nodes are returned by value; callers never hold references into storage.
//! - `save_node` always reconciles edges (see [`EdgePlan`](crate::domain::EdgePlan)),
//!   so after it returns the node's edge set equals `node.parents()` exactly.

use chrono::{DateTime, Utc};

use crate::domain::{IdentityKey, Node, NodeId, NodeKind, NodeStatus, Session};

// ============================================================================
// NodeFilter
// ============================================================================

/// Filter criteria for querying cached nodes
///
/// All fields are optional; when `None`, no filtering is applied for that
/// field. Multiple filters are combined with AND logic. Results are ordered
/// by node id.
///
/// # Example
///
/// ```
/// use nodemirror_core::ports::NodeFilter;
/// use nodemirror_core::domain::{NodeKind, NodeStatus};
///
/// // Every trashed folder
/// let filter = NodeFilter::new()
///     .with_kind(NodeKind::Folder)
///     .with_status(NodeStatus::Trash);
/// ```
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Filter by node kind
    pub kind: Option<NodeKind>,
    /// Filter by node status
    pub status: Option<NodeStatus>,
    /// Filter by exact name
    pub name: Option<String>,
    /// Filter by content hash
    pub content_hash: Option<String>,
    /// Nodes modified strictly after this timestamp
    pub modified_since: Option<DateTime<Utc>>,
    /// Maximum number of results
    pub limit: Option<u32>,
}

impl NodeFilter {
    /// Creates a new empty filter (matches all nodes)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_modified_since(mut self, since: DateTime<Utc>) -> Self {
        self.modified_since = Some(since);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluates the predicate fields against one node
    ///
    /// `limit` is not part of the predicate. Backends that cannot push the
    /// filter down to storage use this to stay consistent with those that can.
    pub fn matches(&self, node: &Node) -> bool {
        if self.kind.is_some_and(|k| k != node.kind()) {
            return false;
        }
        if self.status.is_some_and(|s| s != node.status()) {
            return false;
        }
        if self.name.as_deref().is_some_and(|n| n != node.name()) {
            return false;
        }
        if let Some(hash) = &self.content_hash {
            if node.content_hash() != Some(hash.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.modified_since {
            match node.modified() {
                Some(modified) if modified > since => {}
                _ => return false,
            }
        }
        true
    }
}

// ============================================================================
// ICacheStore trait
// ============================================================================

/// Port trait for the local node/edge/session cache
///
/// Implementations must be thread-safe (`Send + Sync`) as they are shared
/// between the synchronizer and the node repository.
#[async_trait::async_trait]
pub trait ICacheStore: Send + Sync {
    // --- Nodes ---

    /// Finds a node by its id
    async fn find_node_by_id(&self, id: &NodeId) -> anyhow::Result<Option<Node>>;

    /// Finds every node with exactly this name, in any position of the tree
    async fn find_nodes_by_name(&self, name: &str) -> anyhow::Result<Vec<Node>>;

    /// Finds the node flagged as root, if one is cached
    async fn find_root_node(&self) -> anyhow::Result<Option<Node>>;

    /// Returns every node whose edge set contains `parent` as a parent
    async fn get_node_children(&self, parent: &NodeId) -> anyhow::Result<Vec<Node>>;

    /// Returns the parent ids of the edges persisted for `child`
    async fn get_parent_ids(&self, child: &NodeId) -> anyhow::Result<Vec<NodeId>>;

    /// Queries nodes with the given filter criteria
    async fn filter_nodes(&self, filter: &NodeFilter) -> anyhow::Result<Vec<Node>>;

    /// Counts cached nodes
    async fn count_nodes(&self) -> anyhow::Result<u64>;

    /// Deletes a node and the edges that list it as child
    ///
    /// Deleting an id that is not cached is not an error.
    async fn delete_node_by_id(&self, id: &NodeId) -> anyhow::Result<()>;

    /// Clears all nodes and edges together, atomically with respect to readers
    async fn delete_all_nodes(&self) -> anyhow::Result<()>;

    /// Upserts a node by id and reconciles its edges
    ///
    /// Inserts when absent; otherwise replaces every mutable column and the
    /// raw payload. The edge set is reconciled in the same write scope.
    async fn save_node(&self, node: &Node) -> anyhow::Result<()>;

    /// Reconciles the edges of `child` to exactly `parents`
    async fn save_node_parents(&self, child: &NodeId, parents: &[NodeId]) -> anyhow::Result<()>;

    // --- Sessions ---

    /// Loads the session for an identity
    async fn load_session(&self, identity: &IdentityKey) -> anyhow::Result<Option<Session>>;

    /// Upserts a session by identity key
    async fn save_session(&self, session: &Session) -> anyhow::Result<()>;
}
