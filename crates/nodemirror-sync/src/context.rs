//! Runtime context
//!
//! [`MirrorContext`] is built once at startup and owns every component. Each
//! component receives its collaborators explicitly, so there is no global
//! "initialized" state to consult.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use nodemirror_cache::open_cache_store;
use nodemirror_core::config::Config;
use nodemirror_core::domain::{IdentityKey, MirrorError};
use nodemirror_core::ports::{IAuthProvider, ICacheStore, IRemoteService};
use nodemirror_core::usecases::{NodeRepository, SessionManager};
use nodemirror_remote::{OAuthAdapter, RemoteClient, RemoteNodeService};

use crate::engine::ChangeSynchronizer;
use crate::scheduler::SyncScheduler;
use crate::SyncError;

/// Every long-lived component, wired together
pub struct MirrorContext {
    config: Config,
    cache: Arc<dyn ICacheStore + Send + Sync>,
    sessions: Arc<SessionManager>,
    nodes: Arc<NodeRepository>,
    synchronizer: Arc<ChangeSynchronizer>,
}

impl MirrorContext {
    /// Validates `config`, opens the cache and builds the remote adapters
    ///
    /// # Errors
    ///
    /// - `SyncError::InvalidConfig` listing every validation failure
    /// - `SyncError::Cache` if the cache backend cannot be opened
    /// - `SyncError::Remote` if the HTTP client or OAuth client cannot be built
    /// - `SyncError::Mirror` if the persisted session cannot be read
    pub async fn open(config: Config) -> Result<Self, SyncError> {
        let errors = config.validate();
        if !errors.is_empty() {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SyncError::InvalidConfig(joined));
        }

        let cache = open_cache_store(&config.cache).await?;
        let client = RemoteClient::new(&config.remote)?;
        let auth = Arc::new(OAuthAdapter::new(&config.auth, client.clone())?);
        let remote = Arc::new(RemoteNodeService::new(
            client,
            config.remote.endpoint_url.clone(),
        ));

        Self::with_adapters(config, cache, auth, remote).await
    }

    /// Wires the use cases over already-built adapters
    pub async fn with_adapters(
        config: Config,
        cache: Arc<dyn ICacheStore + Send + Sync>,
        auth: Arc<dyn IAuthProvider + Send + Sync>,
        remote: Arc<dyn IRemoteService + Send + Sync>,
    ) -> Result<Self, SyncError> {
        let identity = IdentityKey::new(config.auth.identity.clone()).map_err(MirrorError::from)?;

        let sessions = Arc::new(
            SessionManager::load(identity.clone(), auth, remote.clone(), cache.clone()).await?,
        );
        let nodes = Arc::new(NodeRepository::new(
            cache.clone(),
            remote.clone(),
            sessions.clone(),
        ));
        let synchronizer = Arc::new(ChangeSynchronizer::new(
            sessions.clone(),
            nodes.clone(),
            remote,
            &config.sync,
        ));

        info!(identity = %identity, backend = ?config.cache.backend, "Mirror context ready");
        Ok(Self {
            config,
            cache,
            sessions,
            nodes,
            synchronizer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn ICacheStore + Send + Sync> {
        &self.cache
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn nodes(&self) -> &Arc<NodeRepository> {
        &self.nodes
    }

    pub fn synchronizer(&self) -> &Arc<ChangeSynchronizer> {
        &self.synchronizer
    }

    /// A scheduler polling at the configured interval
    pub fn scheduler(&self, cancel: CancellationToken) -> SyncScheduler {
        SyncScheduler::new(
            self.synchronizer.clone(),
            self.config.sync.poll_interval(),
            cancel,
        )
    }
}
