//! Structured results for operations that can be refused
//!
//! Refusals (a failed precondition or a non-success remote status) are not
//! errors: they come back as values carrying a human-readable reason, and no
//! partial mutation is applied.

use super::node::Node;

/// Result of `SessionManager::authorize`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// A valid token is in place and persisted
    Authorized,
    /// No token exists; a human must visit `url` and come back with a credential
    AuthorizationRequired {
        /// Authorization URL to present
        url: String,
    },
}

impl AuthorizeOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, AuthorizeOutcome::Authorized)
    }
}

/// Result of a node mutation through the repository
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// The remote accepted the change and the cache holds the new state
    Updated(Node),
    /// Nothing needed to change
    Unchanged {
        /// The node as currently cached
        node: Node,
        /// Why nothing was done
        note: String,
    },
    /// The operation was refused; nothing was changed
    Rejected {
        /// Human-readable reason
        reason: String,
    },
}

impl NodeOutcome {
    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        NodeOutcome::Rejected {
            reason: reason.into(),
        }
    }

    pub(crate) fn unchanged(node: Node, note: impl Into<String>) -> Self {
        NodeOutcome::Unchanged {
            node,
            note: note.into(),
        }
    }

    /// Returns true unless the operation was rejected
    pub fn is_ok(&self) -> bool {
        !matches!(self, NodeOutcome::Rejected { .. })
    }

    /// The resulting node, if the operation succeeded
    pub fn node(&self) -> Option<&Node> {
        match self {
            NodeOutcome::Updated(node) | NodeOutcome::Unchanged { node, .. } => Some(node),
            NodeOutcome::Rejected { .. } => None,
        }
    }

    /// Consumes the outcome, returning the resulting node if any
    pub fn into_node(self) -> Option<Node> {
        match self {
            NodeOutcome::Updated(node) | NodeOutcome::Unchanged { node, .. } => Some(node),
            NodeOutcome::Rejected { .. } => None,
        }
    }

    /// The note or rejection reason, if any
    pub fn detail(&self) -> Option<&str> {
        match self {
            NodeOutcome::Updated(_) => None,
            NodeOutcome::Unchanged { note, .. } => Some(note),
            NodeOutcome::Rejected { reason } => Some(reason),
        }
    }
}
