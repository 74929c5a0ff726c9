//! Session manager use case
//!
//! Owns the authenticated-session lifecycle for one remote identity: code
//! exchange, adoption of pre-formed tokens, transparent renewal on expiry,
//! and endpoint discovery. Every successful state change is persisted
//! through the cache store before it becomes visible to callers, so an
//! authorized-but-unpersisted state is never reported as success.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{
    domain::{
        authorization_code_from_callback, validate_expires_in, AuthorizeOutcome, Checkpoint,
        IdentityKey, MirrorError, Session, TokenBundle,
    },
    ports::{AuthHandle, IAuthProvider, ICacheStore, IRemoteService},
};

/// Credential supplied by a human after visiting the authorization URL
#[derive(Debug, Clone)]
pub enum Credential {
    /// The full redirect URL, carrying an authorization code
    CallbackUrl(String),
    /// A ready token object, adopted as-is
    Tokens(TokenBundle),
}

/// Use case for session authorization and persistence
///
/// The in-memory session sits behind an async mutex: concurrent callers
/// wait for an in-flight renewal instead of issuing their own.
pub struct SessionManager {
    auth: Arc<dyn IAuthProvider + Send + Sync>,
    remote: Arc<dyn IRemoteService + Send + Sync>,
    cache: Arc<dyn ICacheStore + Send + Sync>,
    session: Mutex<Session>,
}

impl SessionManager {
    /// Loads the session for `identity` from the cache, or starts a fresh one
    ///
    /// # Arguments
    ///
    /// * `identity` - Key of the remote identity
    /// * `auth` - Token endpoints
    /// * `remote` - Remote service, used for endpoint discovery
    /// * `cache` - Where sessions are persisted
    ///
    /// # Errors
    ///
    /// Returns `MirrorError::Cache` if the session cannot be read
    pub async fn load(
        identity: IdentityKey,
        auth: Arc<dyn IAuthProvider + Send + Sync>,
        remote: Arc<dyn IRemoteService + Send + Sync>,
        cache: Arc<dyn ICacheStore + Send + Sync>,
    ) -> Result<Self, MirrorError> {
        let session = cache
            .load_session(&identity)
            .await
            .map_err(MirrorError::cache)?;

        let session = match session {
            Some(session) => {
                debug!(
                    identity = %identity,
                    has_tokens = session.tokens().is_some(),
                    has_checkpoint = session.checkpoint().is_some(),
                    "Loaded persisted session"
                );
                session
            }
            None => {
                debug!(identity = %identity, "No persisted session, starting fresh");
                Session::new(identity)
            }
        };

        Ok(Self {
            auth,
            remote,
            cache,
            session: Mutex::new(session),
        })
    }

    /// Ensures the session holds a valid, persisted token
    ///
    /// - With a callback URL, exchanges the embedded authorization code.
    /// - With a token object, adopts it directly.
    ///
    /// Both paths then discover endpoints and persist the session.
    ///
    /// Without a credential:
    /// - An expired token is renewed once and the result is persisted.
    /// - A missing token yields [`AuthorizeOutcome::AuthorizationRequired`]
    ///   with the URL a human must visit.
    ///
    /// # Errors
    ///
    /// - `MirrorError::Domain` if the callback URL carries no code
    /// - `MirrorError::Auth` if the code or refresh token is rejected
    /// - `MirrorError::Cache` if the session cannot be persisted
    pub async fn authorize(
        &self,
        credential: Option<Credential>,
    ) -> Result<AuthorizeOutcome, MirrorError> {
        let mut session = self.session.lock().await;

        match credential {
            Some(Credential::CallbackUrl(url)) => {
                let code = authorization_code_from_callback(&url)?;
                info!(identity = %session.identity(), "Exchanging authorization code");
                let tokens = self.auth.exchange_code(&code).await?;
                self.adopt_locked(&mut session, tokens).await?;
                return Ok(AuthorizeOutcome::Authorized);
            }
            Some(Credential::Tokens(tokens)) => {
                info!(identity = %session.identity(), "Adopting supplied token object");
                validate_expires_in(tokens.expires_in)?;
                self.adopt_locked(&mut session, tokens).await?;
                return Ok(AuthorizeOutcome::Authorized);
            }
            None => {}
        }

        let Some(tokens) = session.tokens().cloned() else {
            let url = self.auth.authorization_url()?;
            debug!(identity = %session.identity(), "No token, authorization required");
            return Ok(AuthorizeOutcome::AuthorizationRequired { url });
        };

        if tokens.is_expired_at(Utc::now()) {
            debug!(identity = %session.identity(), "Token expired, renewing");
            self.renew_locked(&mut session).await?;
        }

        if session.endpoints().is_none() {
            let tokens = session
                .tokens()
                .cloned()
                .ok_or_else(|| MirrorError::Auth("token vanished during renewal".to_string()))?;
            let endpoints = self.remote.discover_endpoints(&tokens).await?;
            let mut next = session.clone();
            next.set_endpoints(endpoints);
            self.persist_locked(&mut session, next).await?;
        }

        Ok(AuthorizeOutcome::Authorized)
    }

    /// Exchanges the refresh token for a new access token
    ///
    /// # Errors
    ///
    /// - `MirrorError::Auth` if there is no refresh token or it is rejected
    /// - `MirrorError::Cache` if the renewed session cannot be persisted
    pub async fn renew(&self) -> Result<(), MirrorError> {
        let mut session = self.session.lock().await;
        self.renew_locked(&mut session).await
    }

    /// Renews regardless of the recorded expiry
    ///
    /// Used when the remote rejects a token that still looks valid locally.
    pub async fn force_renew(&self) -> Result<(), MirrorError> {
        info!("Remote rejected access token, forcing renewal");
        self.renew().await
    }

    /// Returns an authenticated transport handle, authorizing transparently
    ///
    /// # Errors
    ///
    /// Returns `MirrorError::Auth` if no token is available and a human must
    /// authorize first
    pub async fn handle(&self) -> Result<AuthHandle, MirrorError> {
        if let AuthorizeOutcome::AuthorizationRequired { url } = self.authorize(None).await? {
            return Err(MirrorError::Auth(format!(
                "not authorized; visit {url} to obtain a credential"
            )));
        }

        let session = self.session.lock().await;
        match (session.tokens(), session.endpoints()) {
            (Some(tokens), Some(endpoints)) => Ok(AuthHandle {
                token_type: tokens.token_type.clone(),
                access_token: tokens.access_token.clone(),
                endpoints: endpoints.clone(),
            }),
            _ => Err(MirrorError::Auth("session is not authorized".to_string())),
        }
    }

    /// The checkpoint the next change request should resume from
    pub async fn checkpoint(&self) -> Option<Checkpoint> {
        self.session.lock().await.checkpoint().cloned()
    }

    /// Persists the session after a change-feed page
    ///
    /// The staged checkpoint, if any, replaces the current one. The session
    /// is written even without a new checkpoint.
    pub async fn record_page(&self, checkpoint: Option<Checkpoint>) -> Result<(), MirrorError> {
        let mut session = self.session.lock().await;
        let mut next = session.clone();
        if let Some(checkpoint) = checkpoint {
            next.set_checkpoint(Some(checkpoint));
        }
        self.persist_locked(&mut session, next).await
    }

    /// Forgets the checkpoint so the next sync starts from scratch
    pub async fn reset_checkpoint(&self) -> Result<(), MirrorError> {
        let mut session = self.session.lock().await;
        let mut next = session.clone();
        next.set_checkpoint(None);
        warn!(identity = %session.identity(), "Checkpoint reset");
        self.persist_locked(&mut session, next).await
    }

    /// A copy of the current session
    pub async fn snapshot(&self) -> Session {
        self.session.lock().await.clone()
    }

    // ------------------------------------------------------------------
    // Internals; callers hold the session lock
    // ------------------------------------------------------------------

    async fn adopt_locked(
        &self,
        session: &mut MutexGuard<'_, Session>,
        tokens: TokenBundle,
    ) -> Result<(), MirrorError> {
        let endpoints = self.remote.discover_endpoints(&tokens).await?;
        debug!(
            metadata_url = %endpoints.metadata_url,
            content_url = %endpoints.content_url,
            "Discovered endpoints"
        );

        let mut next = (**session).clone();
        next.set_tokens(tokens);
        next.set_endpoints(endpoints);
        self.persist_locked(session, next).await?;

        info!(identity = %session.identity(), "Session authorized");
        Ok(())
    }

    async fn renew_locked(&self, session: &mut MutexGuard<'_, Session>) -> Result<(), MirrorError> {
        let current = session
            .tokens()
            .cloned()
            .ok_or_else(|| MirrorError::Auth("no token to renew".to_string()))?;
        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or_else(|| MirrorError::Auth("no refresh token available".to_string()))?;

        let fresh = self.auth.refresh(&refresh_token).await?;

        let mut next = (**session).clone();
        next.set_tokens(current.renewed_with(fresh));
        self.persist_locked(session, next).await?;

        info!(identity = %session.identity(), "Access token renewed");
        Ok(())
    }

    /// Writes `next` to the cache, then publishes it in memory
    async fn persist_locked(
        &self,
        session: &mut MutexGuard<'_, Session>,
        next: Session,
    ) -> Result<(), MirrorError> {
        self.cache
            .save_session(&next)
            .await
            .map_err(MirrorError::cache)?;
        **session = next;
        Ok(())
    }
}
