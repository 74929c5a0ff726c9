//! Parent-child edge reconciliation
//!
//! After any node save the persisted edge set for that node must equal its
//! parent list exactly. [`EdgePlan`] computes the minimal set of writes that
//! takes a persisted edge set to a new parent list; every cache backend
//! applies the plan inside its own write scope.

use super::newtypes::NodeId;

/// Writes needed to bring one node's edges in line with its parents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgePlan {
    /// Parent ids whose edge must be removed
    pub to_delete: Vec<NodeId>,
    /// Parent ids whose edge must be created
    pub to_insert: Vec<NodeId>,
}

impl EdgePlan {
    /// Computes the plan for one node
    ///
    /// Every persisted edge whose parent is absent from `parents` is deleted;
    /// persisted edges that are still wanted are left alone. Whatever remains
    /// pending after the scan is inserted. Duplicate parent ids collapse into
    /// a single edge and insertion order follows `parents`.
    ///
    /// # Arguments
    /// * `persisted` - Parent ids of the edges currently stored for the node
    /// * `parents` - The authoritative parent list
    pub fn compute(persisted: &[NodeId], parents: &[NodeId]) -> Self {
        let mut pending: Vec<NodeId> = Vec::with_capacity(parents.len());
        for parent in parents {
            if !pending.contains(parent) {
                pending.push(parent.clone());
            }
        }

        let mut to_delete = Vec::new();
        for edge_parent in persisted {
            if let Some(pos) = pending.iter().position(|p| p == edge_parent) {
                pending.remove(pos);
            } else if !to_delete.contains(edge_parent) {
                to_delete.push(edge_parent.clone());
            }
        }

        Self {
            to_delete,
            to_insert: pending,
        }
    }

    /// Returns true if the persisted edges already match
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_insert.is_empty()
    }

    /// Number of write statements the plan needs
    pub fn write_count(&self) -> usize {
        self.to_delete.len() + self.to_insert.len()
    }
}
