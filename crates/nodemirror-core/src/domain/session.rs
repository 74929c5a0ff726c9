//! Session domain entity
//!
//! A [`Session`] is the persisted state of one authenticated remote identity:
//! its token bundle, the service endpoints discovered for it, and the
//! change-feed checkpoint.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::errors::DomainError;
use super::newtypes::{Checkpoint, IdentityKey};

// ============================================================================
// Token bundle
// ============================================================================

/// OAuth token bundle as issued by the token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    /// Token type, normally "bearer"
    pub token_type: String,
    /// Bearer access token
    pub access_token: String,
    /// Refresh token used by `renew`
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    pub expires_in: i64,
    /// When the access token was obtained
    pub last_authorized: DateTime<Utc>,
}

/// Token object as returned by a token endpoint or pasted by a user
#[derive(Debug, Deserialize)]
struct TokenObject {
    #[serde(default)]
    token_type: Option<String>,
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Lifetime assumed when the token endpoint does not report one
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Longest token lifetime accepted from outside (one year)
pub const MAX_EXPIRES_IN_SECS: i64 = 365 * 24 * 3600;

/// Checks a token lifetime reported by a token endpoint or a pasted object
///
/// # Errors
/// Returns `DomainError::InvalidToken` for a negative lifetime or one longer
/// than [`MAX_EXPIRES_IN_SECS`]
pub fn validate_expires_in(expires_in: i64) -> Result<i64, DomainError> {
    if (0..=MAX_EXPIRES_IN_SECS).contains(&expires_in) {
        Ok(expires_in)
    } else {
        Err(DomainError::InvalidToken(format!(
            "expires_in must be between 0 and {MAX_EXPIRES_IN_SECS} seconds, got {expires_in}"
        )))
    }
}

impl TokenBundle {
    /// Creates a bundle stamped as authorized at `now`
    pub fn new(
        token_type: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            token_type: token_type.into(),
            access_token: access_token.into(),
            refresh_token,
            expires_in,
            last_authorized: now,
        }
    }

    /// Adopts a pre-formed token object (`access_token`, `refresh_token`,
    /// `token_type`, `expires_in`)
    ///
    /// # Errors
    /// Returns `DomainError::InvalidToken` if the object lacks an access token
    /// or reports an out-of-range `expires_in`
    pub fn from_token_object(
        value: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let object: TokenObject =
            serde_json::from_value(value).map_err(|e| DomainError::InvalidToken(e.to_string()))?;
        if object.access_token.is_empty() {
            return Err(DomainError::InvalidToken(
                "access_token cannot be empty".to_string(),
            ));
        }
        let expires_in = validate_expires_in(object.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS))?;
        Ok(Self::new(
            object.token_type.unwrap_or_else(|| "bearer".to_string()),
            object.access_token,
            object.refresh_token,
            expires_in,
            now,
        ))
    }

    /// Returns true if the access token must be renewed before use
    ///
    /// A token is expired when `now - expires_in * 1000ms > last_authorized`.
    /// A lifetime whose deadline falls outside the representable date range
    /// never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_in
            .checked_mul(1000)
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|lifetime| now.checked_sub_signed(lifetime))
            .is_some_and(|threshold| threshold > self.last_authorized)
    }

    /// Returns a renewed bundle, keeping the old refresh token when the
    /// token endpoint did not rotate it
    pub fn renewed_with(&self, fresh: TokenBundle) -> TokenBundle {
        TokenBundle {
            refresh_token: fresh.refresh_token.or_else(|| self.refresh_token.clone()),
            ..fresh
        }
    }
}

// ============================================================================
// Endpoints
// ============================================================================

/// Service endpoints discovered for an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Base URL for metadata, change feed and node mutations
    pub metadata_url: String,
    /// Base URL for content transfer
    pub content_url: String,
}

impl Endpoints {
    pub fn new(metadata_url: impl Into<String>, content_url: impl Into<String>) -> Self {
        Self {
            metadata_url: metadata_url.into(),
            content_url: content_url.into(),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Persisted authenticated-identity state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    identity: IdentityKey,
    tokens: Option<TokenBundle>,
    endpoints: Option<Endpoints>,
    checkpoint: Option<Checkpoint>,
}

impl Session {
    /// Creates an empty, unauthorized session
    pub fn new(identity: IdentityKey) -> Self {
        Self {
            identity,
            tokens: None,
            endpoints: None,
            checkpoint: None,
        }
    }

    /// Rebuilds a session from persisted parts
    pub fn from_parts(
        identity: IdentityKey,
        tokens: Option<TokenBundle>,
        endpoints: Option<Endpoints>,
        checkpoint: Option<Checkpoint>,
    ) -> Self {
        Self {
            identity,
            tokens,
            endpoints,
            checkpoint,
        }
    }

    pub fn identity(&self) -> &IdentityKey {
        &self.identity
    }

    pub fn tokens(&self) -> Option<&TokenBundle> {
        self.tokens.as_ref()
    }

    pub fn endpoints(&self) -> Option<&Endpoints> {
        self.endpoints.as_ref()
    }

    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }

    pub fn set_tokens(&mut self, tokens: TokenBundle) {
        self.tokens = Some(tokens);
    }

    pub fn set_endpoints(&mut self, endpoints: Endpoints) {
        self.endpoints = Some(endpoints);
    }

    pub fn set_checkpoint(&mut self, checkpoint: Option<Checkpoint>) {
        self.checkpoint = checkpoint;
    }
}

// ============================================================================
// Callback parsing
// ============================================================================

/// Extracts the authorization code from an OAuth redirect URL
///
/// # Errors
/// Returns `DomainError::InvalidCallback` if the URL does not parse, carries
/// an `error` parameter, or has no `code` parameter.
pub fn authorization_code_from_callback(callback_url: &str) -> Result<String, DomainError> {
    let url = Url::parse(callback_url.trim())
        .map_err(|e| DomainError::InvalidCallback(format!("{e}: {callback_url}")))?;

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            "error" => {
                return Err(DomainError::InvalidCallback(format!(
                    "authorization denied: {value}"
                )))
            }
            _ => {}
        }
    }

    code.ok_or_else(|| DomainError::InvalidCallback("no code parameter".to_string()))
}
