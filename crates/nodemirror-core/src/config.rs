//! Configuration module for nodemirror.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for nodemirror.
///
/// Every section is optional in the YAML file; missing sections and fields
/// take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub remote: RemoteConfig,
    pub auth: AuthConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// Which cache backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Embedded SQLite database file
    Sqlite,
    /// PostgreSQL server
    Postgres,
    /// Embedded sled document store
    Document,
}

/// Local cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend selection: `sqlite`, `postgres`, or `document`.
    pub backend: CacheBackend,
    /// SQLite database file.
    pub sqlite_path: PathBuf,
    /// PostgreSQL connection URL, required for the `postgres` backend.
    pub postgres_url: Option<String>,
    /// Directory of the sled document store.
    pub document_dir: PathBuf,
    /// Maximum pooled connections for the relational backends.
    pub max_connections: u32,
}

/// Remote service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Endpoint-discovery URL; answers with the metadata and content URLs.
    pub endpoint_url: String,
    /// Seconds before a non-streaming request is abandoned; also the
    /// longest silence tolerated while a change-feed page streams.
    pub request_timeout_secs: u64,
    /// Seconds before a connection attempt is abandoned.
    pub connect_timeout_secs: u64,
    /// Retries for idempotent reads after the first attempt.
    pub max_retries: u32,
}

/// Authentication / OAuth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Identity key of the session, usually the account email.
    pub identity: String,
    /// OAuth client ID. When unset, the authorization helper is used.
    pub client_id: Option<String>,
    /// OAuth client secret.
    pub client_secret: Option<String>,
    /// OAuth authorization endpoint.
    pub authorize_url: String,
    /// OAuth token endpoint.
    pub token_url: String,
    /// Redirect URI registered for the client.
    pub redirect_uri: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Page that hands out a ready token object when no client credentials exist.
    pub helper_url: String,
    /// Refresh endpoint of the authorization helper.
    pub helper_refresh_url: String,
}

/// Change-feed synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between scheduled sync cycles.
    pub poll_interval: u64,
    /// Re-authorization attempts after an HTTP 401 on the change feed.
    pub max_auth_retries: u32,
    /// First backoff delay in milliseconds; doubles on every retry.
    pub base_backoff_ms: u64,
    /// Upper bound on a single backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Retries of a change request after a transient transport failure.
    pub max_transport_retries: u32,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/nodemirror/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("nodemirror")
            .join("config.yaml")
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Retry policy for idempotent reads.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }
}

impl AuthConfig {
    /// True when a client ID is configured and the standard code flow applies.
    pub fn has_client_credentials(&self) -> bool {
        self.client_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// Backoff between re-authorization attempts.
    pub fn auth_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_auth_retries,
            base_delay: Duration::from_millis(self.base_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
        }
    }

    /// Backoff between change requests after transient failures.
    pub fn transport_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_transport_retries,
            base_delay: Duration::from_millis(self.base_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("nodemirror")
}

impl Default for CacheConfig {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            backend: CacheBackend::Sqlite,
            sqlite_path: data_dir.join("nodes.db"),
            postgres_url: None,
            document_dir: data_dir.join("nodes.sled"),
            max_connections: 5,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "https://drive.amazonaws.com/drive/v1/account/endpoint".to_string(),
            request_timeout_secs: 60,
            connect_timeout_secs: 10,
            max_retries: 3,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            identity: "default".to_string(),
            client_id: None,
            client_secret: None,
            authorize_url: "https://www.amazon.com/ap/oa".to_string(),
            token_url: "https://api.amazon.com/auth/o2/token".to_string(),
            redirect_uri: "http://localhost".to_string(),
            scopes: vec![
                "clouddrive:read_all".to_string(),
                "clouddrive:write".to_string(),
            ],
            helper_url: "https://tensile-runway-92512.appspot.com/".to_string(),
            helper_refresh_url: "https://tensile-runway-92512.appspot.com/refresh".to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: 300,
            max_auth_retries: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_transport_retries: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

fn push(errors: &mut Vec<ValidationError>, field: &str, message: impl Into<String>) {
    errors.push(ValidationError {
        field: field.into(),
        message: message.into(),
    });
}

fn check_url(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if let Err(e) = Url::parse(value) {
        push(errors, field, format!("invalid URL `{value}`: {e}"));
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- cache ---
        if self.cache.max_connections == 0 {
            push(&mut errors, "cache.max_connections", "must be greater than 0");
        }
        if self.cache.backend == CacheBackend::Postgres {
            match self.cache.postgres_url.as_deref() {
                None | Some("") => push(
                    &mut errors,
                    "cache.postgres_url",
                    "required when cache.backend is postgres",
                ),
                Some(url) => check_url(&mut errors, "cache.postgres_url", url),
            }
        }

        // --- remote ---
        check_url(&mut errors, "remote.endpoint_url", &self.remote.endpoint_url);
        if self.remote.request_timeout_secs == 0 {
            push(&mut errors, "remote.request_timeout_secs", "must be greater than 0");
        }
        if self.remote.connect_timeout_secs == 0 {
            push(&mut errors, "remote.connect_timeout_secs", "must be greater than 0");
        }

        // --- auth ---
        if self.auth.identity.trim().is_empty() {
            push(&mut errors, "auth.identity", "must not be empty");
        }
        if self.auth.client_secret.is_some() && !self.auth.has_client_credentials() {
            push(&mut errors, "auth.client_secret", "set without auth.client_id");
        }
        if self.auth.has_client_credentials() {
            check_url(&mut errors, "auth.authorize_url", &self.auth.authorize_url);
            check_url(&mut errors, "auth.token_url", &self.auth.token_url);
            check_url(&mut errors, "auth.redirect_uri", &self.auth.redirect_uri);
        } else {
            check_url(&mut errors, "auth.helper_url", &self.auth.helper_url);
            check_url(&mut errors, "auth.helper_refresh_url", &self.auth.helper_refresh_url);
        }

        // --- sync ---
        if self.sync.poll_interval == 0 {
            push(&mut errors, "sync.poll_interval", "must be greater than 0");
        }
        if self.sync.max_backoff_ms < self.sync.base_backoff_ms {
            push(
                &mut errors,
                "sync.max_backoff_ms",
                "must not be smaller than sync.base_backoff_ms",
            );
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            push(
                &mut errors,
                "logging.level",
                format!(
                    "invalid level `{}`; expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            );
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            push(
                &mut errors,
                "logging.format",
                format!(
                    "invalid format `{}`; expected one of: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            );
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Config`], starting from defaults.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from [`Config::default`].
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- cache ---

    pub fn cache_backend(mut self, backend: CacheBackend) -> Self {
        self.config.cache.backend = backend;
        self
    }

    pub fn cache_sqlite_path(mut self, path: PathBuf) -> Self {
        self.config.cache.sqlite_path = path;
        self
    }

    pub fn cache_postgres_url(mut self, url: impl Into<String>) -> Self {
        self.config.cache.postgres_url = Some(url.into());
        self
    }

    pub fn cache_document_dir(mut self, dir: PathBuf) -> Self {
        self.config.cache.document_dir = dir;
        self
    }

    // --- remote ---

    pub fn remote_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.endpoint_url = url.into();
        self
    }

    pub fn remote_request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.remote.request_timeout_secs = secs;
        self
    }

    // --- auth ---

    pub fn auth_identity(mut self, identity: impl Into<String>) -> Self {
        self.config.auth.identity = identity.into();
        self
    }

    pub fn auth_client(mut self, client_id: impl Into<String>, secret: Option<String>) -> Self {
        self.config.auth.client_id = Some(client_id.into());
        self.config.auth.client_secret = secret;
        self
    }

    pub fn auth_token_url(mut self, url: impl Into<String>) -> Self {
        self.config.auth.token_url = url.into();
        self
    }

    pub fn auth_helper_urls(mut self, helper: impl Into<String>, refresh: impl Into<String>) -> Self {
        self.config.auth.helper_url = helper.into();
        self.config.auth.helper_refresh_url = refresh.into();
        self
    }

    // --- sync ---

    pub fn sync_poll_interval(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval = seconds;
        self
    }

    pub fn sync_max_auth_retries(mut self, retries: u32) -> Self {
        self.config.sync.max_auth_retries = retries;
        self
    }

    pub fn sync_backoff_ms(mut self, base: u64, max: u64) -> Self {
        self.config.sync.base_backoff_ms = base;
        self.config.sync.max_backoff_ms = max;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
