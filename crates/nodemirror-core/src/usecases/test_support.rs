//! In-memory port fakes shared by the use-case tests

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{json, Value};

use crate::domain::{
    EdgePlan, Endpoints, IdentityKey, MirrorError, Node, NodeId, Session, TokenBundle,
};
use crate::ports::{
    AuthHandle, ByteRange, ChangePart, ChangeRequest, IAuthProvider, ICacheStore, IRemoteService,
    NodeFilter, RemoteResponse,
};

// ============================================================================
// FakeAuth
// ============================================================================

#[derive(Default)]
pub struct FakeAuth {
    pub exchanged_codes: Mutex<Vec<String>>,
    pub refresh_calls: AtomicU32,
    reject_refresh: bool,
}

impl FakeAuth {
    pub fn rejecting_refresh() -> Self {
        Self {
            reject_refresh: true,
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
impl IAuthProvider for FakeAuth {
    fn authorization_url(&self) -> Result<String, MirrorError> {
        Ok("https://auth.test/authorize".to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenBundle, MirrorError> {
        self.exchanged_codes.lock().unwrap().push(code.to_string());
        Ok(TokenBundle::new(
            "bearer",
            "exchanged-access",
            Some("exchanged-refresh".to_string()),
            3600,
            Utc::now(),
        ))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenBundle, MirrorError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_refresh {
            return Err(MirrorError::Auth("invalid_grant".to_string()));
        }
        Ok(TokenBundle::new("bearer", "renewed-access", None, 3600, Utc::now()))
    }
}

// ============================================================================
// FakeRemote
// ============================================================================

#[derive(Default)]
pub struct FakeRemote {
    pub discover_calls: AtomicU32,
    pub calls: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<RemoteResponse>>,
}

impl FakeRemote {
    /// Queues the response for the next mutation call
    pub fn respond(&self, status: u16, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .push_back(RemoteResponse { status, body });
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn next(&self, call: String) -> Result<RemoteResponse, MirrorError> {
        self.calls.lock().unwrap().push(call);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| MirrorError::Transport("no scripted response".to_string()))
    }
}

#[async_trait::async_trait]
impl IRemoteService for FakeRemote {
    async fn discover_endpoints(&self, _tokens: &TokenBundle) -> Result<Endpoints, MirrorError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Endpoints::new("https://meta.test/", "https://content.test/"))
    }

    async fn fetch_changes(
        &self,
        _handle: &AuthHandle,
        _request: &ChangeRequest,
    ) -> Result<Vec<ChangePart>, MirrorError> {
        Err(MirrorError::Transport("change feed not scripted".to_string()))
    }

    async fn get_node(&self, _handle: &AuthHandle, id: &NodeId) -> Result<RemoteResponse, MirrorError> {
        self.next(format!("get {id}"))
    }

    async fn create_folder(
        &self,
        _handle: &AuthHandle,
        name: &str,
        parent: &NodeId,
    ) -> Result<RemoteResponse, MirrorError> {
        let scripted = self.responses.lock().unwrap().pop_front();
        self.calls
            .lock()
            .unwrap()
            .push(format!("create {name} in {parent}"));
        Ok(scripted.unwrap_or_else(|| RemoteResponse {
            status: 201,
            body: json!({
                "id": format!("new-{name}"),
                "name": name,
                "kind": "FOLDER",
                "status": "AVAILABLE",
                "parents": [parent.as_str()],
            }),
        }))
    }

    async fn rename_node(
        &self,
        _handle: &AuthHandle,
        id: &NodeId,
        new_name: &str,
    ) -> Result<RemoteResponse, MirrorError> {
        self.next(format!("rename {id} to {new_name}"))
    }

    async fn move_node(
        &self,
        _handle: &AuthHandle,
        id: &NodeId,
        from_parent: &NodeId,
        to_parent: &NodeId,
    ) -> Result<RemoteResponse, MirrorError> {
        self.next(format!("move {id} from {from_parent} to {to_parent}"))
    }

    async fn trash_node(&self, _handle: &AuthHandle, id: &NodeId) -> Result<RemoteResponse, MirrorError> {
        self.next(format!("trash {id}"))
    }

    async fn restore_node(&self, _handle: &AuthHandle, id: &NodeId) -> Result<RemoteResponse, MirrorError> {
        self.next(format!("restore {id}"))
    }

    async fn read_content(
        &self,
        _handle: &AuthHandle,
        id: &NodeId,
        range: Option<ByteRange>,
    ) -> Result<Vec<u8>, MirrorError> {
        self.calls.lock().unwrap().push(format!(
            "read {id} {}",
            range.map(|r| r.header_value()).unwrap_or_default()
        ));
        Ok(b"0123456789".to_vec())
    }
}

// ============================================================================
// FakeCache
// ============================================================================

#[derive(Default)]
struct CacheState {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeSet<(NodeId, NodeId)>,
    sessions: HashMap<IdentityKey, Session>,
}

#[derive(Default)]
pub struct FakeCache {
    state: Mutex<CacheState>,
    fail_writes: AtomicBool,
}

impl FakeCache {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn session(&self, identity: &IdentityKey) -> Option<Session> {
        self.state.lock().unwrap().sessions.get(identity).cloned()
    }

    pub fn put_session(&self, session: Session) {
        self.state
            .lock()
            .unwrap()
            .sessions
            .insert(session.identity().clone(), session);
    }

    /// Saves a node built from `payload`, reconciling its edges
    pub fn put(&self, payload: Value) -> Node {
        let node = Node::from_payload(payload).unwrap();
        let mut state = self.state.lock().unwrap();
        Self::save_locked(&mut state, &node);
        node
    }

    pub fn edges_of(&self, child: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .edges
            .iter()
            .filter(|(c, _)| c.as_str() == child)
            .map(|(_, p)| p.to_string())
            .collect()
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("disk I/O error");
        }
        Ok(())
    }

    fn reconcile_locked(state: &mut CacheState, child: &NodeId, parents: &[NodeId]) {
        let persisted: Vec<NodeId> = state
            .edges
            .iter()
            .filter(|(c, _)| c == child)
            .map(|(_, p)| p.clone())
            .collect();
        let plan = EdgePlan::compute(&persisted, parents);
        for parent in plan.to_delete {
            state.edges.remove(&(child.clone(), parent));
        }
        for parent in plan.to_insert {
            state.edges.insert((child.clone(), parent));
        }
    }

    fn save_locked(state: &mut CacheState, node: &Node) {
        state.nodes.insert(node.id().clone(), node.clone());
        Self::reconcile_locked(state, node.id(), node.parents());
    }
}

#[async_trait::async_trait]
impl ICacheStore for FakeCache {
    async fn find_node_by_id(&self, id: &NodeId) -> anyhow::Result<Option<Node>> {
        Ok(self.state.lock().unwrap().nodes.get(id).cloned())
    }

    async fn find_nodes_by_name(&self, name: &str) -> anyhow::Result<Vec<Node>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .nodes
            .values()
            .filter(|n| n.name() == name)
            .cloned()
            .collect())
    }

    async fn find_root_node(&self) -> anyhow::Result<Option<Node>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .nodes
            .values()
            .find(|n| n.is_root())
            .cloned())
    }

    async fn get_node_children(&self, parent: &NodeId) -> anyhow::Result<Vec<Node>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .edges
            .iter()
            .filter(|(_, p)| p == parent)
            .filter_map(|(c, _)| state.nodes.get(c).cloned())
            .collect())
    }

    async fn get_parent_ids(&self, child: &NodeId) -> anyhow::Result<Vec<NodeId>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .edges
            .iter()
            .filter(|(c, _)| c == child)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn filter_nodes(&self, filter: &NodeFilter) -> anyhow::Result<Vec<Node>> {
        let limit = filter.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(self
            .state
            .lock()
            .unwrap()
            .nodes
            .values()
            .filter(|n| filter.matches(n))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_nodes(&self) -> anyhow::Result<u64> {
        Ok(self.state.lock().unwrap().nodes.len() as u64)
    }

    async fn delete_node_by_id(&self, id: &NodeId) -> anyhow::Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock().unwrap();
        state.nodes.remove(id);
        state.edges.retain(|(c, _)| c != id);
        Ok(())
    }

    async fn delete_all_nodes(&self) -> anyhow::Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock().unwrap();
        state.nodes.clear();
        state.edges.clear();
        Ok(())
    }

    async fn save_node(&self, node: &Node) -> anyhow::Result<()> {
        self.check_writable()?;
        Self::save_locked(&mut self.state.lock().unwrap(), node);
        Ok(())
    }

    async fn save_node_parents(&self, child: &NodeId, parents: &[NodeId]) -> anyhow::Result<()> {
        self.check_writable()?;
        Self::reconcile_locked(&mut self.state.lock().unwrap(), child, parents);
        Ok(())
    }

    async fn load_session(&self, identity: &IdentityKey) -> anyhow::Result<Option<Session>> {
        Ok(self.session(identity))
    }

    async fn save_session(&self, session: &Session) -> anyhow::Result<()> {
        self.check_writable()?;
        self.put_session(session.clone());
        Ok(())
    }
}
