//! Scripted remote and auth fakes over a real in-memory SQLite cache

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use nodemirror_cache::{DatabasePool, SqliteCacheStore};
use nodemirror_core::domain::{
    Checkpoint, Endpoints, IdentityKey, MirrorError, Node, NodeId, Session, TokenBundle,
};
use nodemirror_core::ports::{
    AuthHandle, ByteRange, ChangePart, ChangeRequest, IAuthProvider, ICacheStore, IRemoteService,
    RemoteResponse,
};
use nodemirror_core::retry::RetryPolicy;
use nodemirror_core::usecases::{NodeRepository, SessionManager};
use nodemirror_remote::parse_change_parts;
use nodemirror_sync::ChangeSynchronizer;

pub const IDENTITY: &str = "me@example.com";

/// One scripted answer to a change request
pub enum Page {
    Body(&'static str),
    Fail(MirrorError),
    Hang,
}

/// Change feed that replays scripted pages and records every request
#[derive(Default)]
pub struct ScriptedRemote {
    pages: Mutex<VecDeque<Page>>,
    repeat_last: Mutex<Option<&'static str>>,
    requests: Mutex<Vec<(ChangeRequest, String)>>,
    fetches: AtomicU32,
}

impl ScriptedRemote {
    pub fn new(pages: Vec<Page>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            ..Self::default()
        }
    }

    /// Once the script is exhausted, answer every request with `body`
    pub fn then_always(self, body: &'static str) -> Self {
        *self.repeat_last.lock().unwrap() = Some(body);
        self
    }

    pub fn push(&self, page: Page) {
        self.pages.lock().unwrap().push_back(page);
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// (checkpoint, include_purged, access token) of every request
    pub fn requests(&self) -> Vec<(Option<String>, bool, String)> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(r, token)| {
                (
                    r.checkpoint.as_ref().map(|c| c.as_str().to_string()),
                    r.include_purged,
                    token.clone(),
                )
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl IRemoteService for ScriptedRemote {
    async fn discover_endpoints(&self, _tokens: &TokenBundle) -> Result<Endpoints, MirrorError> {
        Ok(endpoints())
    }

    async fn fetch_changes(
        &self,
        handle: &AuthHandle,
        request: &ChangeRequest,
    ) -> Result<Vec<ChangePart>, MirrorError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((request.clone(), handle.access_token.clone()));

        let next = self.pages.lock().unwrap().pop_front();
        match next {
            Some(Page::Body(body)) => parse_change_parts(body),
            Some(Page::Fail(err)) => Err(err),
            Some(Page::Hang) => std::future::pending().await,
            None => match *self.repeat_last.lock().unwrap() {
                Some(body) => parse_change_parts(body),
                None => parse_change_parts(r#"{"nodes":[]}"#),
            },
        }
    }

    async fn get_node(&self, _handle: &AuthHandle, _id: &NodeId) -> Result<RemoteResponse, MirrorError> {
        Err(MirrorError::Transport("not scripted".to_string()))
    }

    async fn create_folder(
        &self,
        _handle: &AuthHandle,
        _name: &str,
        _parent: &NodeId,
    ) -> Result<RemoteResponse, MirrorError> {
        Err(MirrorError::Transport("not scripted".to_string()))
    }

    async fn rename_node(
        &self,
        _handle: &AuthHandle,
        _id: &NodeId,
        _new_name: &str,
    ) -> Result<RemoteResponse, MirrorError> {
        Err(MirrorError::Transport("not scripted".to_string()))
    }

    async fn move_node(
        &self,
        _handle: &AuthHandle,
        _id: &NodeId,
        _from_parent: &NodeId,
        _to_parent: &NodeId,
    ) -> Result<RemoteResponse, MirrorError> {
        Err(MirrorError::Transport("not scripted".to_string()))
    }

    async fn trash_node(&self, _handle: &AuthHandle, _id: &NodeId) -> Result<RemoteResponse, MirrorError> {
        Err(MirrorError::Transport("not scripted".to_string()))
    }

    async fn restore_node(&self, _handle: &AuthHandle, _id: &NodeId) -> Result<RemoteResponse, MirrorError> {
        Err(MirrorError::Transport("not scripted".to_string()))
    }

    async fn read_content(
        &self,
        _handle: &AuthHandle,
        _id: &NodeId,
        _range: Option<ByteRange>,
    ) -> Result<Vec<u8>, MirrorError> {
        Err(MirrorError::Transport("not scripted".to_string()))
    }
}

/// Token endpoint that hands out `renewed-N` access tokens
#[derive(Default)]
pub struct StubAuth {
    refreshes: AtomicU32,
    reject: bool,
}

impl StubAuth {
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IAuthProvider for StubAuth {
    fn authorization_url(&self) -> Result<String, MirrorError> {
        Ok("https://auth.test/authorize".to_string())
    }

    async fn exchange_code(&self, _code: &str) -> Result<TokenBundle, MirrorError> {
        Err(MirrorError::Auth("not scripted".to_string()))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenBundle, MirrorError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject {
            return Err(MirrorError::Auth("invalid_grant".to_string()));
        }
        Ok(TokenBundle::new("bearer", format!("renewed-{n}"), None, 3600, Utc::now()))
    }
}

pub fn endpoints() -> Endpoints {
    Endpoints::new("https://meta.test/", "https://content.test/")
}

pub fn identity() -> IdentityKey {
    IdentityKey::new(IDENTITY).unwrap()
}

pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

/// Everything a synchronizer test touches
pub struct Harness {
    pub cache: Arc<SqliteCacheStore>,
    pub remote: Arc<ScriptedRemote>,
    pub auth: Arc<StubAuth>,
    pub sessions: Arc<SessionManager>,
    pub nodes: Arc<NodeRepository>,
    pub sync: Arc<ChangeSynchronizer>,
}

impl Harness {
    pub async fn persisted_checkpoint(&self) -> Option<String> {
        self.cache
            .load_session(&identity())
            .await
            .unwrap()
            .and_then(|s| s.checkpoint().map(|c| c.as_str().to_string()))
    }

    pub async fn cached(&self, id: &str) -> Option<Node> {
        self.cache
            .find_node_by_id(&NodeId::new(id).unwrap())
            .await
            .unwrap()
    }

    pub async fn seed(&self, payload: serde_json::Value) {
        self.cache
            .save_node(&Node::from_payload(payload).unwrap())
            .await
            .unwrap();
    }
}

pub struct HarnessBuilder {
    remote: ScriptedRemote,
    auth: StubAuth,
    checkpoint: Option<&'static str>,
    authorized: bool,
    auth_retry: RetryPolicy,
    transport_retry: RetryPolicy,
}

pub fn harness(remote: ScriptedRemote) -> HarnessBuilder {
    HarnessBuilder {
        remote,
        auth: StubAuth::default(),
        checkpoint: None,
        authorized: true,
        auth_retry: fast_retry(2),
        transport_retry: fast_retry(2),
    }
}

impl HarnessBuilder {
    pub fn auth(mut self, auth: StubAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn checkpoint(mut self, checkpoint: &'static str) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn unauthorized(mut self) -> Self {
        self.authorized = false;
        self
    }

    pub fn retries(mut self, auth: u32, transport: u32) -> Self {
        self.auth_retry = fast_retry(auth);
        self.transport_retry = fast_retry(transport);
        self
    }

    pub async fn build(self) -> Harness {
        let pool = DatabasePool::in_memory().await.unwrap();
        let cache = Arc::new(SqliteCacheStore::new(pool.pool().clone()));

        if self.authorized {
            let mut session = Session::new(identity());
            session.set_tokens(TokenBundle::new(
                "bearer",
                "initial-access",
                Some("refresh-1".to_string()),
                3600,
                Utc::now(),
            ));
            session.set_endpoints(endpoints());
            session.set_checkpoint(self.checkpoint.map(|c| Checkpoint::new(c).unwrap()));
            cache.save_session(&session).await.unwrap();
        }

        let remote = Arc::new(self.remote);
        let auth = Arc::new(self.auth);
        let sessions = Arc::new(
            SessionManager::load(identity(), auth.clone(), remote.clone(), cache.clone())
                .await
                .unwrap(),
        );
        let nodes = Arc::new(NodeRepository::new(
            cache.clone(),
            remote.clone(),
            sessions.clone(),
        ));
        let sync = Arc::new(
            ChangeSynchronizer::new(
                sessions.clone(),
                nodes.clone(),
                remote.clone(),
                &Default::default(),
            )
            .with_retry_policies(self.auth_retry, self.transport_retry),
        );

        Harness {
            cache,
            remote,
            auth,
            sessions,
            nodes,
            sync,
        }
    }
}
