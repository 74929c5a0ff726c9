//! nodemirror cache - local persistence of the remote node tree
//!
//! Three interchangeable backends implement the `ICacheStore` port from
//! `nodemirror-core`:
//!
//! - [`SqliteCacheStore`] - embedded SQLite file (default)
//! - [`PostgresCacheStore`] - networked PostgreSQL server
//! - [`DocumentCacheStore`] - embedded sled key-value store
//!
//! The relational backends share one schema: `nodes`, `edges` (child to
//! parent, unique per pair) and `sessions` (one row per identity). Every
//! node row keeps the full remote payload in `raw_payload`; nodes are
//! always rebuilt from it, the other columns exist for querying.
//!
//! ## Usage
//!
//! ```no_run
//! use nodemirror_cache::{DatabasePool, SqliteCacheStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::in_memory().await?;
//! let store = SqliteCacheStore::new(pool.pool().clone());
//! // Use store as ICacheStore...
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use nodemirror_core::config::{CacheBackend, CacheConfig};
use nodemirror_core::ports::ICacheStore;

pub mod document;
pub mod pool;
pub mod postgres;
mod sql;
pub mod sqlite;

pub use document::DocumentCacheStore;
pub use pool::DatabasePool;
pub use postgres::PostgresCacheStore;
pub use sqlite::SqliteCacheStore;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to open the backend
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A read or write against the backend failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema creation failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored record could not be turned back into a domain value
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}

impl From<sled::Error> for CacheError {
    fn from(e: sled::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}

/// Opens the backend selected by `config`, creating its schema if needed
///
/// # Errors
///
/// Returns `CacheError::ConnectionFailed` when the backend cannot be opened
/// (including a postgres backend without a URL), or
/// `CacheError::MigrationFailed` when the schema cannot be created.
pub async fn open_cache_store(
    config: &CacheConfig,
) -> Result<Arc<dyn ICacheStore + Send + Sync>, CacheError> {
    let store: Arc<dyn ICacheStore + Send + Sync> = match config.backend {
        CacheBackend::Sqlite => {
            let pool = DatabasePool::new(&config.sqlite_path).await?;
            Arc::new(SqliteCacheStore::new(pool.pool().clone()))
        }
        CacheBackend::Postgres => {
            let url = config.postgres_url.as_deref().ok_or_else(|| {
                CacheError::ConnectionFailed("postgres backend requires cache.postgres_url".into())
            })?;
            Arc::new(PostgresCacheStore::connect(url, config.max_connections).await?)
        }
        CacheBackend::Document => Arc::new(DocumentCacheStore::open(&config.document_dir)?),
    };

    tracing::info!(backend = ?config.backend, "Cache store opened");
    Ok(store)
}
