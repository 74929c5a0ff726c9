//! OAuth2 authorization for the remote service
//!
//! Two modes, selected by configuration:
//!
//! - **Code flow**: with a client ID configured, the `oauth2` crate builds
//!   the authorization URL, exchanges the code found in the callback URL and
//!   refreshes tokens against the token endpoint.
//! - **Authorization helper**: without client credentials, the user visits a
//!   helper page that hands out a ready token object, and refreshes go to
//!   the helper's refresh endpoint (`POST {"refresh_token": ..}`).

use async_trait::async_trait;
use chrono::Utc;
use oauth2::basic::{BasicClient, BasicErrorResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, info, warn};

use nodemirror_core::config::AuthConfig;
use nodemirror_core::domain::{
    validate_expires_in, MirrorError, TokenBundle, DEFAULT_EXPIRES_IN_SECS,
};
use nodemirror_core::ports::IAuthProvider;

use crate::client::{into_remote_response, RemoteClient};
use crate::RemoteError;

type CodeFlowClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// `IAuthProvider` over OAuth2 or the authorization helper
pub struct OAuthAdapter {
    config: AuthConfig,
    client: RemoteClient,
    code_flow: Option<CodeFlowClient>,
}

impl OAuthAdapter {
    /// Creates the adapter; the code flow is enabled when a client ID is set
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::InvalidUrl` if an authorization, token or
    /// redirect URL cannot be parsed.
    pub fn new(config: &AuthConfig, client: RemoteClient) -> Result<Self, RemoteError> {
        let code_flow = match config.client_id.as_deref() {
            Some(id) if config.has_client_credentials() => {
                let mut flow = BasicClient::new(ClientId::new(id.to_string()))
                    .set_auth_uri(
                        AuthUrl::new(config.authorize_url.clone())
                            .map_err(|e| RemoteError::InvalidUrl(format!("authorize_url: {}", e)))?,
                    )
                    .set_token_uri(
                        TokenUrl::new(config.token_url.clone())
                            .map_err(|e| RemoteError::InvalidUrl(format!("token_url: {}", e)))?,
                    )
                    .set_redirect_uri(
                        RedirectUrl::new(config.redirect_uri.clone())
                            .map_err(|e| RemoteError::InvalidUrl(format!("redirect_uri: {}", e)))?,
                    );
                if let Some(secret) = config.client_secret.as_deref() {
                    flow = flow.set_client_secret(ClientSecret::new(secret.to_string()));
                }
                Some(flow)
            }
            _ => None,
        };

        debug!(code_flow = code_flow.is_some(), "Authorization provider configured");
        Ok(Self {
            config: config.clone(),
            client,
            code_flow,
        })
    }

    /// True when the standard code flow is in use
    pub fn uses_code_flow(&self) -> bool {
        self.code_flow.is_some()
    }

    /// Refresh through the authorization helper
    async fn refresh_via_helper(&self, refresh_token: &str) -> Result<TokenBundle, MirrorError> {
        let request = self
            .client
            .http()
            .post(&self.config.helper_refresh_url)
            .timeout(self.client.request_timeout())
            .json(&json!({ "refresh_token": refresh_token }));
        let response = into_remote_response(self.client.send_once(request).await?).await?;

        match StatusCode::from_u16(response.status) {
            Ok(status) if status.is_success() => {
                TokenBundle::from_token_object(response.body, Utc::now()).map_err(|e| {
                    MirrorError::Protocol(format!("helper returned an unusable token: {}", e))
                })
            }
            Ok(StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                warn!(status = response.status, "Refresh token rejected by helper");
                Err(MirrorError::Auth(format!(
                    "refresh token rejected: {}",
                    response.message()
                )))
            }
            _ => Err(MirrorError::Remote {
                status: response.status,
                message: response.message(),
            }),
        }
    }
}

/// Maps an oauth2 token-endpoint failure onto the error taxonomy
fn token_error<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> MirrorError
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(resp) => {
            MirrorError::Auth(format!("token endpoint rejected the grant: {}", resp.error()))
        }
        RequestTokenError::Request(e) => MirrorError::Transport(e.to_string()),
        RequestTokenError::Parse(e, _) => {
            MirrorError::Protocol(format!("unreadable token response: {}", e))
        }
        RequestTokenError::Other(msg) => MirrorError::Protocol(msg),
    }
}

/// Converts a token-endpoint answer, refusing an out-of-range lifetime
fn bundle_from<T: TokenResponse>(token: &T) -> Result<TokenBundle, RemoteError> {
    let expires_in = match token.expires_in() {
        Some(lifetime) => i64::try_from(lifetime.as_secs())
            .map_err(|_| RemoteError::InvalidResponse("expires_in overflows".to_string()))
            .and_then(|secs| {
                validate_expires_in(secs).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
            })?,
        None => DEFAULT_EXPIRES_IN_SECS,
    };

    Ok(TokenBundle::new(
        "bearer",
        token.access_token().secret().to_string(),
        token.refresh_token().map(|t| t.secret().to_string()),
        expires_in,
        Utc::now(),
    ))
}

#[async_trait]
impl IAuthProvider for OAuthAdapter {
    fn authorization_url(&self) -> Result<String, MirrorError> {
        match &self.code_flow {
            Some(flow) => {
                let mut request = flow.authorize_url(CsrfToken::new_random);
                for scope in &self.config.scopes {
                    request = request.add_scope(Scope::new(scope.clone()));
                }
                let (url, _csrf) = request.url();
                Ok(url.to_string())
            }
            None => url::Url::parse(&self.config.helper_url)
                .map(|u| u.to_string())
                .map_err(|e| MirrorError::Auth(format!("invalid helper_url: {}", e))),
        }
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenBundle, MirrorError> {
        let Some(flow) = &self.code_flow else {
            return Err(MirrorError::Auth(
                "no client credentials configured; paste the token object from the helper page"
                    .to_string(),
            ));
        };

        info!("Exchanging authorization code for tokens");
        let token = flow
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(self.client.http())
            .await
            .map_err(token_error)?;

        let bundle = bundle_from(&token)?;
        info!("Obtained OAuth tokens");
        Ok(bundle)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenBundle, MirrorError> {
        info!(code_flow = self.uses_code_flow(), "Refreshing access token");

        let bundle = match &self.code_flow {
            Some(flow) => {
                let token = flow
                    .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
                    .request_async(self.client.http())
                    .await
                    .map_err(token_error)?;
                bundle_from(&token)?
            }
            None => self.refresh_via_helper(refresh_token).await?,
        };

        info!("Access token refreshed");
        Ok(bundle)
    }
}
