//! sled implementation of ICacheStore
//!
//! ## Trees
//!
//! | Tree       | Key                 | Value                  |
//! |------------|---------------------|------------------------|
//! | `nodes`    | id                  | raw payload JSON       |
//! | `edges`    | child `\0` parent   | empty                  |
//! | `children` | parent `\0` child   | empty                  |
//! | `names`    | name `\0` id        | empty                  |
//! | `roots`    | id                  | empty                  |
//! | `sessions` | identity key        | session JSON           |
//!
//! A node write touches several trees. It is applied as one sled
//! transaction over them, so a crash never leaves an index entry without
//! its node or the other way round. Reads scan trees outside transactions,
//! so writes also hold the write half of an async `RwLock` and reads the
//! read half. `delete_all_nodes` clears the trees one by one under the
//! lock.

use std::path::Path;

use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree,
    UnabortableTransactionError,
};
use sled::{Transactional, Tree};
use tokio::sync::RwLock;

use nodemirror_core::domain::{EdgePlan, IdentityKey, Node, NodeId, Session};
use nodemirror_core::ports::{ICacheStore, NodeFilter};

use crate::sql::node_from_raw;
use crate::CacheError;

const SEP: u8 = 0;
const EMPTY: &[u8] = &[];

fn pair_key(a: &str, b: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(a.len() + b.len() + 1);
    key.extend_from_slice(a.as_bytes());
    key.push(SEP);
    key.extend_from_slice(b.as_bytes());
    key
}

fn prefix_key(a: &str) -> Vec<u8> {
    let mut key = a.as_bytes().to_vec();
    key.push(SEP);
    key
}

/// Second half of a `pair_key`
fn pair_suffix(key: &[u8], prefix_len: usize) -> Result<NodeId, CacheError> {
    let raw = std::str::from_utf8(&key[prefix_len..])
        .map_err(|e| CacheError::SerializationError(format!("Invalid index key: {}", e)))?;
    NodeId::new(raw).map_err(|e| CacheError::SerializationError(format!("Invalid node id: {}", e)))
}

fn tx_error(err: TransactionError<CacheError>) -> CacheError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => e.into(),
    }
}

/// Writes `plan` to both edge indices of a transaction
fn apply_edge_plan(
    edges: &TransactionalTree,
    children: &TransactionalTree,
    child: &NodeId,
    plan: &EdgePlan,
) -> Result<(), UnabortableTransactionError> {
    for parent in &plan.to_delete {
        edges.remove(pair_key(child.as_str(), parent.as_str()))?;
        children.remove(pair_key(parent.as_str(), child.as_str()))?;
    }
    for parent in &plan.to_insert {
        edges.insert(pair_key(child.as_str(), parent.as_str()), EMPTY)?;
        children.insert(pair_key(parent.as_str(), child.as_str()), EMPTY)?;
    }
    Ok(())
}

fn decode_node(bytes: &[u8]) -> Result<Node, CacheError> {
    let raw = std::str::from_utf8(bytes)
        .map_err(|e| CacheError::SerializationError(format!("Invalid node payload: {}", e)))?;
    node_from_raw(raw)
}

/// Embedded document-store node cache
pub struct DocumentCacheStore {
    db: sled::Db,
    nodes: sled::Tree,
    edges: sled::Tree,
    children: sled::Tree,
    names: sled::Tree,
    roots: sled::Tree,
    sessions: sled::Tree,
    gate: RwLock<()>,
}

impl DocumentCacheStore {
    /// Opens (creating if needed) the store in `dir`
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the directory cannot be
    /// created or sled refuses to open it (for example, another process
    /// holds its lock).
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir).map_err(|e| {
            CacheError::ConnectionFailed(format!(
                "Failed to create store directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let db = sled::open(dir).map_err(|e| {
            CacheError::ConnectionFailed(format!(
                "Failed to open document store at {}: {}",
                dir.display(),
                e
            ))
        })?;

        let store = Self {
            nodes: db.open_tree("nodes")?,
            edges: db.open_tree("edges")?,
            children: db.open_tree("children")?,
            names: db.open_tree("names")?,
            roots: db.open_tree("roots")?,
            sessions: db.open_tree("sessions")?,
            db,
            gate: RwLock::new(()),
        };

        tracing::info!(path = %dir.display(), "Document node cache opened");
        Ok(store)
    }

    fn load_node(&self, id: &[u8]) -> Result<Option<Node>, CacheError> {
        self.nodes
            .get(id)?
            .map(|bytes| decode_node(&bytes))
            .transpose()
    }

    fn parents_of(&self, child: &NodeId) -> Result<Vec<NodeId>, CacheError> {
        let prefix = prefix_key(child.as_str());
        self.edges
            .scan_prefix(&prefix)
            .keys()
            .map(|key| pair_suffix(&key?, prefix.len()))
            .collect()
    }

    /// Trees written together by a node save or delete
    fn node_trees(&self) -> (&Tree, &Tree, &Tree, &Tree, &Tree) {
        (&self.nodes, &self.edges, &self.children, &self.names, &self.roots)
    }

    fn remove_node_locked(&self, id: &NodeId) -> Result<(), CacheError> {
        let old_name = self
            .load_node(id.as_str().as_bytes())?
            .map(|old| old.name().to_string());
        let plan = EdgePlan::compute(&self.parents_of(id)?, &[]);

        self.node_trees()
            .transaction(|(nodes, edges, children, names, roots)| {
                if let Some(name) = &old_name {
                    names.remove(pair_key(name, id.as_str()))?;
                }
                roots.remove(id.as_str())?;
                apply_edge_plan(edges, children, id, &plan)?;
                nodes.remove(id.as_str())?;
                Ok::<_, ConflictableTransactionError<CacheError>>(())
            })
            .map_err(tx_error)
    }
}

#[async_trait::async_trait]
impl ICacheStore for DocumentCacheStore {
    async fn find_node_by_id(&self, id: &NodeId) -> anyhow::Result<Option<Node>> {
        let _read = self.gate.read().await;
        Ok(self.load_node(id.as_str().as_bytes())?)
    }

    async fn find_nodes_by_name(&self, name: &str) -> anyhow::Result<Vec<Node>> {
        let _read = self.gate.read().await;
        let prefix = prefix_key(name);
        let mut found = Vec::new();
        for key in self.names.scan_prefix(&prefix).keys() {
            let id = pair_suffix(&key?, prefix.len())?;
            if let Some(node) = self.load_node(id.as_str().as_bytes())? {
                found.push(node);
            }
        }
        Ok(found)
    }

    async fn find_root_node(&self) -> anyhow::Result<Option<Node>> {
        let _read = self.gate.read().await;
        match self.roots.iter().keys().next() {
            Some(key) => Ok(self.load_node(&key?)?),
            None => Ok(None),
        }
    }

    async fn get_node_children(&self, parent: &NodeId) -> anyhow::Result<Vec<Node>> {
        let _read = self.gate.read().await;
        let prefix = prefix_key(parent.as_str());
        let mut children = Vec::new();
        for key in self.children.scan_prefix(&prefix).keys() {
            let id = pair_suffix(&key?, prefix.len())?;
            if let Some(node) = self.load_node(id.as_str().as_bytes())? {
                children.push(node);
            }
        }
        Ok(children)
    }

    async fn get_parent_ids(&self, child: &NodeId) -> anyhow::Result<Vec<NodeId>> {
        let _read = self.gate.read().await;
        Ok(self.parents_of(child)?)
    }

    async fn filter_nodes(&self, filter: &NodeFilter) -> anyhow::Result<Vec<Node>> {
        let _read = self.gate.read().await;
        let limit = filter.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let mut matched = Vec::new();
        for entry in self.nodes.iter().values() {
            if matched.len() >= limit {
                break;
            }
            let node = decode_node(&entry?)?;
            if filter.matches(&node) {
                matched.push(node);
            }
        }
        Ok(matched)
    }

    async fn count_nodes(&self) -> anyhow::Result<u64> {
        let _read = self.gate.read().await;
        Ok(self.nodes.len() as u64)
    }

    async fn delete_node_by_id(&self, id: &NodeId) -> anyhow::Result<()> {
        let _write = self.gate.write().await;
        self.remove_node_locked(id)?;
        tracing::trace!(node_id = %id, "Deleted node");
        Ok(())
    }

    async fn delete_all_nodes(&self) -> anyhow::Result<()> {
        let _write = self.gate.write().await;
        let removed = self.nodes.len();
        for tree in [&self.edges, &self.children, &self.names, &self.roots, &self.nodes] {
            tree.clear()?;
        }
        tracing::info!(removed, "Cleared node cache");
        Ok(())
    }

    async fn save_node(&self, node: &Node) -> anyhow::Result<()> {
        let _write = self.gate.write().await;
        let id = node.id().as_str();

        let stale_name = self
            .load_node(id.as_bytes())?
            .map(|old| old.name().to_string())
            .filter(|old| old != node.name());
        let plan = EdgePlan::compute(&self.parents_of(node.id())?, node.parents());
        let payload = node.payload_string();

        self.node_trees()
            .transaction(|(nodes, edges, children, names, roots)| {
                if let Some(old) = &stale_name {
                    names.remove(pair_key(old, id))?;
                }
                nodes.insert(id, payload.as_bytes())?;
                names.insert(pair_key(node.name(), id), EMPTY)?;
                if node.is_root() {
                    roots.insert(id, EMPTY)?;
                } else {
                    roots.remove(id)?;
                }
                apply_edge_plan(edges, children, node.id(), &plan)?;
                Ok::<_, ConflictableTransactionError<CacheError>>(())
            })
            .map_err(tx_error)?;

        tracing::trace!(node_id = %id, edge_writes = plan.write_count(), "Saved node");
        Ok(())
    }

    async fn save_node_parents(&self, child: &NodeId, parents: &[NodeId]) -> anyhow::Result<()> {
        let _write = self.gate.write().await;
        let plan = EdgePlan::compute(&self.parents_of(child)?, parents);

        (&self.edges, &self.children)
            .transaction(|(edges, children)| {
                apply_edge_plan(edges, children, child, &plan)?;
                Ok::<_, ConflictableTransactionError<CacheError>>(())
            })
            .map_err(tx_error)?;
        Ok(())
    }

    async fn load_session(&self, identity: &IdentityKey) -> anyhow::Result<Option<Session>> {
        let _read = self.gate.read().await;
        match self.sessions.get(identity.as_str())? {
            Some(bytes) => {
                let session = serde_json::from_slice(&bytes).map_err(|e| {
                    CacheError::SerializationError(format!("Invalid stored session: {}", e))
                })?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn save_session(&self, session: &Session) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(session)
            .map_err(|e| CacheError::SerializationError(format!("Failed to encode session: {}", e)))?;
        {
            let _write = self.gate.write().await;
            self.sessions.insert(session.identity().as_str(), bytes)?;
        }
        // Checkpoints must survive a crash
        self.db.flush_async().await.map_err(CacheError::from)?;

        tracing::debug!(identity = %session.identity(), "Saved session");
        Ok(())
    }
}
