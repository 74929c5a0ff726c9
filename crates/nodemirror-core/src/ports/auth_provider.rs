//! Authorization provider port
//!
//! Token acquisition is split from the remote service because it talks to a
//! different host (the identity provider) and has a different failure model:
//! a rejected code or refresh token is always `MirrorError::Auth`.

use crate::domain::{MirrorError, TokenBundle};

/// Port trait for the OAuth token endpoints
#[async_trait::async_trait]
pub trait IAuthProvider: Send + Sync {
    /// Builds the URL a human must visit to authorize this application
    ///
    /// # Errors
    /// Returns `MirrorError::Auth` if the configured URLs are unusable
    fn authorization_url(&self) -> Result<String, MirrorError>;

    /// Exchanges an authorization code for a token bundle
    async fn exchange_code(&self, code: &str) -> Result<TokenBundle, MirrorError>;

    /// Exchanges a refresh token for a fresh token bundle
    ///
    /// The returned bundle may lack a refresh token if the provider did not
    /// rotate it; the caller keeps the old one in that case.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenBundle, MirrorError>;
}
