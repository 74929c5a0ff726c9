//! Change-feed synchronizer
//!
//! The [`ChangeSynchronizer`] pulls the remote change feed page by page and
//! applies it to the local cache.
//!
//! ## Sync Flow
//!
//! 1. **Request**: resume from the session checkpoint, if any
//! 2. **Apply**: process the page's parts strictly in order (reset, nodes,
//!    staged checkpoint, end marker)
//! 3. **Persist**: write the session with the staged checkpoint after every
//!    page, so a crash between pages keeps the progress already made
//! 4. **Loop**: request the next page until a part reports the feed drained
//!
//! ## Retry Logic
//!
//! - An HTTP 401 renews the access token and repeats the same request, at
//!   most `max_auth_retries` times with exponential backoff between renewals.
//! - Transport failures, 429 and 5xx are retried with bounded backoff.
//! - Malformed pages are fatal for the invocation and never retried.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use nodemirror_core::config::SyncConfig;
use nodemirror_core::domain::{Checkpoint, MirrorError};
use nodemirror_core::ports::{ChangePart, ChangeRequest, IRemoteService};
use nodemirror_core::retry::{with_retry, RetryPolicy};
use nodemirror_core::usecases::{AppliedChange, NodeRepository, SessionManager};

/// Summary of one synchronization invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Pages requested and applied
    pub pages: u32,
    /// Nodes inserted or replaced
    pub nodes_applied: u64,
    /// Nodes removed because the remote purged them
    pub nodes_purged: u64,
    /// Reset parts honoured
    pub resets: u32,
    /// Checkpoint persisted when the invocation ended
    pub checkpoint: Option<Checkpoint>,
}

/// How a page left the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageEnd {
    /// A part carried an empty node list: nothing more to fetch
    Drained,
    /// The page advanced the checkpoint; request the next one
    Advanced,
    /// Neither drained nor advanced; asking again would repeat the page
    Stalled,
}

/// Applies the remote change feed to the cache
pub struct ChangeSynchronizer {
    sessions: Arc<SessionManager>,
    nodes: Arc<NodeRepository>,
    remote: Arc<dyn IRemoteService + Send + Sync>,
    auth_retry: RetryPolicy,
    transport_retry: RetryPolicy,
}

impl ChangeSynchronizer {
    /// Creates a synchronizer with the retry budgets from `config`
    ///
    /// # Arguments
    ///
    /// * `sessions` - Source of transport handles and checkpoint owner
    /// * `nodes` - Applies nodes and resets to the cache under per-id locks
    /// * `remote` - Change feed endpoint
    /// * `config` - Retry budgets and backoff curve
    pub fn new(
        sessions: Arc<SessionManager>,
        nodes: Arc<NodeRepository>,
        remote: Arc<dyn IRemoteService + Send + Sync>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            sessions,
            nodes,
            remote,
            auth_retry: config.auth_retry_policy(),
            transport_retry: config.transport_retry_policy(),
        }
    }

    /// Overrides both retry budgets
    pub fn with_retry_policies(mut self, auth: RetryPolicy, transport: RetryPolicy) -> Self {
        self.auth_retry = auth;
        self.transport_retry = transport;
        self
    }

    /// Runs one synchronization invocation to completion
    ///
    /// # Errors
    ///
    /// - `MirrorError::Auth` if no session is authorized or the remote keeps
    ///   rejecting renewed tokens
    /// - `MirrorError::Protocol` if a page is malformed
    /// - `MirrorError::Cache` if the cache cannot be written
    /// - `MirrorError::Transport` / `MirrorError::Remote` once retries are spent
    pub async fn sync(&self) -> Result<SyncSummary, MirrorError> {
        self.sync_until_cancelled(&CancellationToken::new()).await
    }

    /// Like [`sync`](Self::sync), but stops at the next page boundary once
    /// `cancel` fires
    ///
    /// A pending change request is abandoned on cancellation. A page that is
    /// already being applied is finished and persisted first.
    #[tracing::instrument(skip_all)]
    pub async fn sync_until_cancelled(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary, MirrorError> {
        let started = Instant::now();
        let mut summary = SyncSummary {
            checkpoint: self.sessions.checkpoint().await,
            ..SyncSummary::default()
        };

        info!(
            checkpoint = summary.checkpoint.as_ref().map(Checkpoint::as_str),
            "Starting change sync"
        );

        loop {
            if cancel.is_cancelled() {
                info!(pages = summary.pages, "Change sync cancelled between pages");
                return Err(MirrorError::Cancelled);
            }

            let request = ChangeRequest::resuming_from(summary.checkpoint.clone());
            let parts = tokio::select! {
                parts = self.fetch_page(&request) => parts,
                _ = cancel.cancelled() => {
                    warn!(pages = summary.pages, "Change request abandoned on cancellation");
                    return Err(MirrorError::Cancelled);
                }
            };
            let parts = match parts {
                Ok(parts) => parts,
                Err(err) => {
                    error!(pages = summary.pages, error = %err, "Change request failed");
                    return Err(err);
                }
            };

            summary.pages += 1;
            let (staged, end) = self.apply_page(parts, &mut summary).await?;

            self.sessions.record_page(staged.clone()).await?;
            if staged.is_some() {
                summary.checkpoint = staged;
            }
            debug!(
                page = summary.pages,
                checkpoint = summary.checkpoint.as_ref().map(Checkpoint::as_str),
                end = ?end,
                "Page persisted"
            );

            match end {
                PageEnd::Advanced => continue,
                PageEnd::Drained => break,
                PageEnd::Stalled => {
                    warn!(
                        page = summary.pages,
                        "Page neither drained the feed nor advanced the checkpoint, stopping"
                    );
                    break;
                }
            }
        }

        info!(
            pages = summary.pages,
            applied = summary.nodes_applied,
            purged = summary.nodes_purged,
            resets = summary.resets,
            duration_ms = started.elapsed().as_millis() as u64,
            "Change sync completed"
        );
        Ok(summary)
    }

    /// Forgets the checkpoint and the cached tree, then syncs the full feed
    pub async fn resync_from_scratch(&self) -> Result<SyncSummary, MirrorError> {
        warn!("Discarding checkpoint and cache for a full resync");
        self.sessions.reset_checkpoint().await?;
        self.nodes.clear_cache().await?;
        self.sync().await
    }

    /// Issues one change request, renewing on 401 and retrying transient
    /// failures within their budgets
    ///
    /// Transient failures are retried with the handle in use; each renewal
    /// starts a fresh transient budget.
    async fn fetch_page(&self, request: &ChangeRequest) -> Result<Vec<ChangePart>, MirrorError> {
        let mut renewals = 0;

        loop {
            let handle = self.sessions.handle().await?;
            let remote = &self.remote;
            let handle = &handle;
            let fetched = with_retry(&self.transport_retry, "fetch_changes", move || async move {
                remote.fetch_changes(handle, request).await
            })
            .await;

            match fetched {
                Ok(parts) => return Ok(parts),
                Err(err) if err.is_auth() => {
                    if renewals >= self.auth_retry.max_retries {
                        error!(renewals, "Change request rejected after every renewal");
                        return Err(MirrorError::Auth(format!(
                            "change request still rejected after {renewals} token renewals: {err}"
                        )));
                    }
                    if renewals > 0 {
                        let delay = self.auth_retry.delay_for(renewals - 1);
                        debug!(delay_ms = delay.as_millis() as u64, "Backing off before renewal");
                        tokio::time::sleep(delay).await;
                    }
                    warn!(attempt = renewals + 1, "Change request unauthorized, renewing token");
                    self.sessions.force_renew().await?;
                    renewals += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Applies the parts of one page in order
    ///
    /// Returns the checkpoint staged by the page and how the page ended.
    async fn apply_page(
        &self,
        parts: Vec<ChangePart>,
        summary: &mut SyncSummary,
    ) -> Result<(Option<Checkpoint>, PageEnd), MirrorError> {
        let mut staged: Option<Checkpoint> = None;
        let mut drained = false;

        for part in parts {
            if part.reset {
                info!("Reset part received, clearing cache");
                self.nodes.clear_cache().await?;
                summary.resets += 1;
            }

            match part.nodes.as_deref() {
                Some([]) => drained = true,
                Some(nodes) => {
                    for node in nodes {
                        match self.nodes.apply_remote_node(node).await? {
                            AppliedChange::Saved => summary.nodes_applied += 1,
                            AppliedChange::Purged => summary.nodes_purged += 1,
                        }
                    }
                }
                None => {}
            }

            if let Some(checkpoint) = part.checkpoint {
                staged = Some(checkpoint);
            }

            if part.end {
                debug!("End of page marker");
                break;
            }
        }

        let end = if drained {
            PageEnd::Drained
        } else if staged.is_some() && staged != summary.checkpoint {
            PageEnd::Advanced
        } else {
            PageEnd::Stalled
        };
        Ok((staged, end))
    }
}
