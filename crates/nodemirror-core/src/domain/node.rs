//! Node domain entity
//!
//! A [`Node`] is the cached representation of one remote file, folder or
//! asset. The remote attribute payload is authoritative: it is kept verbatim
//! and every indexed field is re-derived from it whenever the node is
//! created or replaced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::DomainError;
use super::newtypes::NodeId;

/// Kind of remote object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeKind {
    /// Regular file with content
    File,
    /// Container of other nodes
    Folder,
    /// Auxiliary object attached to a file
    Asset,
}

impl NodeKind {
    /// Wire representation, also used as the cached column value
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "FILE",
            NodeKind::Folder => "FOLDER",
            NodeKind::Asset => "ASSET",
        }
    }

    /// Parses the wire representation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPayload` for an unknown kind
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "FILE" => Ok(NodeKind::File),
            "FOLDER" => Ok(NodeKind::Folder),
            "ASSET" => Ok(NodeKind::Asset),
            other => Err(DomainError::InvalidPayload(format!(
                "unknown node kind: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a remote object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    /// Live and visible
    Available,
    /// In the trash, restorable
    Trash,
    /// Upload or creation not finished
    Pending,
    /// Permanently removed; never cached
    Purged,
}

impl NodeStatus {
    /// Wire representation, also used as the cached column value
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Available => "AVAILABLE",
            NodeStatus::Trash => "TRASH",
            NodeStatus::Pending => "PENDING",
            NodeStatus::Purged => "PURGED",
        }
    }

    /// Parses the wire representation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPayload` for an unknown status
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "AVAILABLE" => Ok(NodeStatus::Available),
            "TRASH" => Ok(NodeStatus::Trash),
            "PENDING" => Ok(NodeStatus::Pending),
            "PURGED" => Ok(NodeStatus::Purged),
            other => Err(DomainError::InvalidPayload(format!(
                "unknown node status: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Remote payload shape
// ============================================================================

/// Subset of the remote attribute payload that feeds indexed fields
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeAttributes {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    kind: Option<NodeKind>,
    #[serde(default)]
    status: Option<NodeStatus>,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    is_root: bool,
    #[serde(default)]
    created_date: Option<DateTime<Utc>>,
    #[serde(default)]
    modified_date: Option<DateTime<Utc>>,
    #[serde(default)]
    content_properties: Option<ContentProperties>,
}

#[derive(Debug, Default, Deserialize)]
struct ContentProperties {
    #[serde(default)]
    md5: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

// ============================================================================
// Node entity
// ============================================================================

/// Cached view of one remote object
///
/// Nodes are plain values: the cache hands out copies, never references
/// into its storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: NodeId,
    name: String,
    kind: NodeKind,
    status: NodeStatus,
    content_hash: Option<String>,
    size: u64,
    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
    parents: Vec<NodeId>,
    is_root: bool,
    payload: Value,
}

impl Node {
    /// Builds a node from the remote attribute payload
    ///
    /// The payload is kept verbatim. A missing `kind` defaults to FOLDER for
    /// the root and FILE otherwise; a missing `status` defaults to AVAILABLE.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPayload` if the payload is not an object,
    /// lacks an `id`, or carries fields of the wrong type.
    pub fn from_payload(payload: Value) -> Result<Self, DomainError> {
        if !payload.is_object() {
            return Err(DomainError::InvalidPayload(
                "node payload must be a JSON object".to_string(),
            ));
        }

        let attrs: NodeAttributes = serde_json::from_value(payload.clone())
            .map_err(|e| DomainError::InvalidPayload(e.to_string()))?;

        let id = NodeId::new(attrs.id)?;
        let parents = attrs
            .parents
            .into_iter()
            .map(NodeId::new)
            .collect::<Result<Vec<_>, _>>()?;

        let kind = attrs.kind.unwrap_or(if attrs.is_root {
            NodeKind::Folder
        } else {
            NodeKind::File
        });
        let content = attrs.content_properties.unwrap_or_default();

        Ok(Self {
            id,
            name: attrs.name.unwrap_or_default(),
            kind,
            status: attrs.status.unwrap_or(NodeStatus::Available),
            content_hash: content.md5,
            size: content.size.unwrap_or(0),
            created: attrs.created_date,
            modified: attrs.modified_date,
            parents,
            is_root: attrs.is_root,
            payload,
        })
    }

    /// Parses a node from its serialized payload text
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPayload` if the text is not valid JSON or
    /// not a valid node payload
    pub fn from_payload_str(raw: &str) -> Result<Self, DomainError> {
        let payload: Value =
            serde_json::from_str(raw).map_err(|e| DomainError::InvalidPayload(e.to_string()))?;
        Self::from_payload(payload)
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    /// MD5 of the content, files only
    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    /// Parent ids in the order the remote lists them
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    /// The parent used for the canonical path
    pub fn first_parent(&self) -> Option<&NodeId> {
        self.parents.first()
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// The authoritative attribute payload, verbatim
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Serialized payload as stored in the cache
    pub fn payload_string(&self) -> String {
        self.payload.to_string()
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    pub fn is_trashed(&self) -> bool {
        self.status == NodeStatus::Trash
    }

    pub fn is_purged(&self) -> bool {
        self.status == NodeStatus::Purged
    }

    /// Returns true if `parent` is one of this node's parents
    pub fn has_parent(&self, parent: &NodeId) -> bool {
        self.parents.iter().any(|p| p == parent)
    }
}
