//! Node repository use case
//!
//! Typed view over the cached nodes with the tree algorithms built on top of
//! them (path resolution, canonical and full path enumeration, "mkdir -p")
//! and the remote mutations that write their result through to the cache.
//!
//! Paths use `/` as separator. Leading and trailing separators are ignored,
//! so `"Docs/a.txt"`, `"/Docs/a.txt"` and `"/Docs/a.txt/"` are the same path.
//! The root node has the path `/`.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    domain::{MirrorError, Node, NodeId, NodeOutcome},
    ports::{AuthHandle, ByteRange, ICacheStore, IRemoteService, RemoteResponse},
    usecases::{node_locks::NodeLocks, session_manager::SessionManager},
};

/// What applying a remote node did to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedChange {
    /// The node was inserted or replaced
    Saved,
    /// The node was purged remotely and removed locally
    Purged,
}

/// Splits a path into its non-empty segments
fn path_segments(path: &str) -> Vec<&str> {
    path.trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

fn join_path(names: &[String]) -> String {
    format!("/{}", names.join("/"))
}

fn check_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("name cannot be empty".to_string());
    }
    if name.contains('/') {
        return Err(format!("name `{name}` contains a path separator"));
    }
    Ok(())
}

/// Use case for reading and mutating nodes
pub struct NodeRepository {
    cache: Arc<dyn ICacheStore + Send + Sync>,
    remote: Arc<dyn IRemoteService + Send + Sync>,
    sessions: Arc<SessionManager>,
    locks: NodeLocks,
}

impl NodeRepository {
    /// Creates a new NodeRepository with the required dependencies
    ///
    /// # Arguments
    ///
    /// * `cache` - Local node store
    /// * `remote` - Remote service for mutations and content
    /// * `sessions` - Source of authenticated transport handles
    pub fn new(
        cache: Arc<dyn ICacheStore + Send + Sync>,
        remote: Arc<dyn IRemoteService + Send + Sync>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            cache,
            remote,
            sessions,
            locks: NodeLocks::new(),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Exact lookup by id; `None` when not cached
    pub async fn load_by_id(&self, id: &NodeId) -> Result<Option<Node>, MirrorError> {
        self.cache
            .find_node_by_id(id)
            .await
            .map_err(MirrorError::cache)
    }

    /// The unique root node, if cached
    pub async fn root(&self) -> Result<Option<Node>, MirrorError> {
        self.cache.find_root_node().await.map_err(MirrorError::cache)
    }

    /// Every node listing `node` as a parent
    pub async fn get_children(&self, node: &Node) -> Result<Vec<Node>, MirrorError> {
        self.cache
            .get_node_children(node.id())
            .await
            .map_err(MirrorError::cache)
    }

    /// Resolves a path to a node
    ///
    /// An empty or root path resolves to the root node. Otherwise every node
    /// named like the final segment is a candidate, and a candidate matches
    /// if any of its parent chains spells out the remaining segments and ends
    /// at the root. Available candidates are tried before trashed ones;
    /// beyond that, the first match in cache order wins.
    pub async fn load_by_path(&self, path: &str) -> Result<Option<Node>, MirrorError> {
        let segments = path_segments(path);
        let Some((last, ancestors)) = segments.split_last() else {
            return self.root().await;
        };

        let mut candidates = self
            .cache
            .find_nodes_by_name(last)
            .await
            .map_err(MirrorError::cache)?;
        candidates.sort_by_key(Node::is_trashed);

        for candidate in candidates {
            if candidate.is_root() {
                continue;
            }
            if self.reaches_root_via(&candidate, ancestors).await? {
                debug!(path, node_id = %candidate.id(), "Resolved path");
                return Ok(Some(candidate));
            }
        }

        debug!(path, "Path not found in cache");
        Ok(None)
    }

    /// Returns true if some parent chain of `node` reads `ancestors` from the
    /// root down
    async fn reaches_root_via(&self, node: &Node, ancestors: &[&str]) -> Result<bool, MirrorError> {
        // (parent to inspect, how many ancestor segments are still unmatched)
        let mut frontier: Vec<(NodeId, usize)> = node
            .parents()
            .iter()
            .map(|p| (p.clone(), ancestors.len()))
            .collect();

        while let Some((id, remaining)) = frontier.pop() {
            let Some(parent) = self.load_by_id(&id).await? else {
                continue;
            };
            if remaining == 0 {
                if parent.is_root() {
                    return Ok(true);
                }
                continue;
            }
            if parent.is_root() || parent.name() != ancestors[remaining - 1] {
                continue;
            }
            frontier.extend(parent.parents().iter().map(|p| (p.clone(), remaining - 1)));
        }

        Ok(false)
    }

    /// Canonical path of a node, following its first listed parent only
    ///
    /// A node with several parents has several valid paths; this returns the
    /// one through the first parent. Use [`get_all_paths`](Self::get_all_paths)
    /// to enumerate every path. Returns `None` when the chain does not reach
    /// a cached root (orphaned or cyclic).
    pub async fn get_path(&self, node: &Node) -> Result<Option<String>, MirrorError> {
        let mut names = Vec::new();
        let mut seen = HashSet::new();
        let mut current = node.clone();

        while !current.is_root() {
            if !seen.insert(current.id().clone()) {
                warn!(node_id = %node.id(), "Parent cycle while building path");
                return Ok(None);
            }
            names.push(current.name().to_string());

            let Some(parent_id) = current.first_parent() else {
                return Ok(None);
            };
            let Some(parent) = self.load_by_id(parent_id).await? else {
                return Ok(None);
            };
            current = parent;
        }

        names.reverse();
        Ok(Some(join_path(&names)))
    }

    /// Every path from the root to `node`, through every parent, sorted
    pub async fn get_all_paths(&self, node: &Node) -> Result<Vec<String>, MirrorError> {
        let mut paths = Vec::new();
        // (node to expand, names collected below it, ids on this chain)
        let mut stack: Vec<(Node, Vec<String>, Vec<NodeId>)> =
            vec![(node.clone(), Vec::new(), Vec::new())];

        while let Some((current, suffix, chain)) = stack.pop() {
            if current.is_root() {
                let mut names = suffix;
                names.reverse();
                paths.push(join_path(&names));
                continue;
            }
            if chain.contains(current.id()) {
                continue;
            }

            let mut suffix = suffix;
            suffix.push(current.name().to_string());
            let mut chain = chain;
            chain.push(current.id().clone());

            for parent_id in current.parents() {
                if let Some(parent) = self.load_by_id(parent_id).await? {
                    stack.push((parent, suffix.clone(), chain.clone()));
                }
            }
        }

        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    // ========================================================================
    // Directory creation
    // ========================================================================

    /// Idempotent "mkdir -p"
    ///
    /// If the whole path already resolves to a folder, nothing is done.
    /// Otherwise segments are walked from the root, reusing existing folders
    /// and creating missing ones remotely; the deepest folder is returned.
    pub async fn create_directory_path(&self, path: &str) -> Result<NodeOutcome, MirrorError> {
        if let Some(existing) = self.load_by_path(path).await? {
            if existing.is_folder() {
                return Ok(NodeOutcome::unchanged(existing, format!("`{path}` already exists")));
            }
            return Ok(NodeOutcome::rejected(format!(
                "`{path}` exists and is not a folder"
            )));
        }

        let Some(mut current) = self.root().await? else {
            return Ok(NodeOutcome::rejected(
                "root node is not cached; run a sync first",
            ));
        };

        for segment in path_segments(path) {
            let children = self.get_children(&current).await?;
            let existing = children
                .into_iter()
                .filter(|c| c.name() == segment && !c.is_trashed())
                .min_by_key(|c| !c.is_folder());

            current = match existing {
                Some(folder) if folder.is_folder() => folder,
                Some(_) => {
                    return Ok(NodeOutcome::rejected(format!(
                        "`{segment}` exists and is not a folder"
                    )))
                }
                None => match self.create_folder(&current, segment).await? {
                    NodeOutcome::Updated(folder) | NodeOutcome::Unchanged { node: folder, .. } => {
                        folder
                    }
                    rejected @ NodeOutcome::Rejected { .. } => return Ok(rejected),
                },
            };
        }

        info!(path, node_id = %current.id(), "Directory path ready");
        Ok(NodeOutcome::Updated(current))
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Creates a folder named `name` under `parent`
    pub async fn create_folder(&self, parent: &Node, name: &str) -> Result<NodeOutcome, MirrorError> {
        if let Err(reason) = check_name(name) {
            return Ok(NodeOutcome::rejected(reason));
        }
        if !parent.is_folder() {
            return Ok(NodeOutcome::rejected(format!(
                "parent `{}` is not a folder",
                parent.name()
            )));
        }

        let parent_id = parent.id();
        self.mutate(None, "create folder", move |handle| async move {
            self.remote.create_folder(&handle, name, parent_id).await
        })
        .await
    }

    /// Renames a node
    pub async fn rename(&self, node: &Node, new_name: &str) -> Result<NodeOutcome, MirrorError> {
        if let Err(reason) = check_name(new_name) {
            return Ok(NodeOutcome::rejected(reason));
        }
        if node.name() == new_name {
            return Ok(NodeOutcome::unchanged(node.clone(), "name is unchanged"));
        }

        let id = node.id();
        self.mutate(Some(id), "rename", move |handle| async move {
            self.remote.rename_node(&handle, id, new_name).await
        })
        .await
    }

    /// Moves a node from its first parent to `new_parent`
    pub async fn move_node(&self, node: &Node, new_parent: &Node) -> Result<NodeOutcome, MirrorError> {
        if !new_parent.is_folder() {
            return Ok(NodeOutcome::rejected(format!(
                "destination `{}` is not a folder",
                new_parent.name()
            )));
        }
        if node.id() == new_parent.id() {
            return Ok(NodeOutcome::rejected("cannot move a node into itself"));
        }
        if node.has_parent(new_parent.id()) {
            return Ok(NodeOutcome::unchanged(
                node.clone(),
                "node is already in the destination",
            ));
        }
        let Some(from_parent) = node.first_parent() else {
            return Ok(NodeOutcome::rejected("the root node cannot be moved"));
        };

        let id = node.id();
        let to_parent = new_parent.id();
        self.mutate(Some(id), "move", move |handle| async move {
            self.remote.move_node(&handle, id, from_parent, to_parent).await
        })
        .await
    }

    /// Moves a node to the trash; no-op if already trashed
    pub async fn trash(&self, node: &Node) -> Result<NodeOutcome, MirrorError> {
        if node.is_trashed() {
            return Ok(NodeOutcome::unchanged(node.clone(), "node is already trashed"));
        }
        if node.is_root() {
            return Ok(NodeOutcome::rejected("the root node cannot be trashed"));
        }

        let id = node.id();
        self.mutate(Some(id), "trash", move |handle| async move {
            self.remote.trash_node(&handle, id).await
        })
        .await
    }

    /// Restores a node from the trash; no-op if not trashed
    pub async fn restore(&self, node: &Node) -> Result<NodeOutcome, MirrorError> {
        if !node.is_trashed() {
            return Ok(NodeOutcome::unchanged(node.clone(), "node is not trashed"));
        }

        let id = node.id();
        self.mutate(Some(id), "restore", move |handle| async move {
            self.remote.restore_node(&handle, id).await
        })
        .await
    }

    /// Issues one remote mutation and writes the returned payload through
    ///
    /// `lock_id` is the node whose writes must be serialized; a create has no
    /// id until the remote answers, so its save is locked afterwards.
    async fn mutate<F, Fut>(
        &self,
        lock_id: Option<&NodeId>,
        operation: &str,
        call: F,
    ) -> Result<NodeOutcome, MirrorError>
    where
        F: FnOnce(AuthHandle) -> Fut,
        Fut: Future<Output = Result<RemoteResponse, MirrorError>>,
    {
        let _guard = match lock_id {
            Some(id) => Some(self.locks.acquire(id).await),
            None => None,
        };

        let handle = match self.sessions.handle().await {
            Ok(handle) => handle,
            Err(MirrorError::Auth(reason)) => {
                return Ok(NodeOutcome::rejected(format!("{operation}: {reason}")));
            }
            Err(e) => return Err(e),
        };

        let response = call(handle).await?;
        if !response.is_success() {
            warn!(
                operation,
                status = response.status,
                message = %response.message(),
                "Remote refused mutation"
            );
            return Ok(NodeOutcome::rejected(format!(
                "{operation} failed: HTTP {}: {}",
                response.status,
                response.message()
            )));
        }

        let node = Node::from_payload(response.body).map_err(|e| {
            MirrorError::Protocol(format!("{operation} returned an invalid node: {e}"))
        })?;

        let _create_guard = match lock_id {
            Some(_) => None,
            None => Some(self.locks.acquire(node.id()).await),
        };
        self.cache
            .save_node(&node)
            .await
            .map_err(MirrorError::cache)?;

        info!(operation, node_id = %node.id(), name = node.name(), "Mutation applied");
        Ok(NodeOutcome::Updated(node))
    }

    // ========================================================================
    // Change application and refresh
    // ========================================================================

    /// Applies a node received from the change feed
    ///
    /// PURGED nodes are deleted by id; anything else is upserted.
    pub async fn apply_remote_node(&self, node: &Node) -> Result<AppliedChange, MirrorError> {
        let _guard = self.locks.acquire(node.id()).await;

        if node.is_purged() {
            self.cache
                .delete_node_by_id(node.id())
                .await
                .map_err(MirrorError::cache)?;
            tracing::trace!(node_id = %node.id(), "Purged node");
            return Ok(AppliedChange::Purged);
        }

        self.cache
            .save_node(node)
            .await
            .map_err(MirrorError::cache)?;
        tracing::trace!(node_id = %node.id(), status = %node.status(), "Saved node");
        Ok(AppliedChange::Saved)
    }

    /// Drops every cached node and edge; sessions are kept
    pub async fn clear_cache(&self) -> Result<(), MirrorError> {
        let before = self.cache.count_nodes().await.map_err(MirrorError::cache)?;
        self.cache
            .delete_all_nodes()
            .await
            .map_err(MirrorError::cache)?;
        info!(removed = before, "Cleared node cache");
        Ok(())
    }

    /// Re-fetches one node from the remote and updates the cache
    ///
    /// A 404 removes the node from the cache and returns `None`.
    pub async fn refresh(&self, id: &NodeId) -> Result<Option<Node>, MirrorError> {
        let _guard = self.locks.acquire(id).await;
        let handle = self.sessions.handle().await?;
        let response = self.remote.get_node(&handle, id).await?;

        match response.status {
            404 => {
                self.cache
                    .delete_node_by_id(id)
                    .await
                    .map_err(MirrorError::cache)?;
                Ok(None)
            }
            status if response.is_success() => {
                let node = Node::from_payload(response.body).map_err(|e| {
                    MirrorError::Protocol(format!("node {id} returned an invalid payload: {e}"))
                })?;
                self.cache
                    .save_node(&node)
                    .await
                    .map_err(MirrorError::cache)?;
                debug!(node_id = %id, status, "Refreshed node");
                Ok(Some(node))
            }
            status => Err(MirrorError::Remote {
                status,
                message: response.message(),
            }),
        }
    }

    /// Reads a node's content, optionally a byte range of it
    pub async fn read_content(
        &self,
        node: &Node,
        range: Option<ByteRange>,
    ) -> Result<Vec<u8>, MirrorError> {
        if node.is_folder() {
            return Err(MirrorError::Precondition(format!(
                "`{}` is a folder and has no content",
                node.name()
            )));
        }
        let handle = self.sessions.handle().await?;
        self.remote.read_content(&handle, node.id(), range).await
    }
}
