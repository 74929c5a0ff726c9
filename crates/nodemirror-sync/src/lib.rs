//! nodemirror Sync - Change-feed synchronization and runtime wiring
//!
//! Provides:
//! - Page-by-page application of the remote change feed to the cache
//! - Periodic polling with on-demand triggers and cancellation
//! - The explicit context object that wires adapters to use cases
//! - Tracing subscriber setup
//!
//! ## Modules
//!
//! - [`engine`] - The change-feed synchronizer
//! - [`scheduler`] - Poll loop driving the synchronizer
//! - [`context`] - `MirrorContext`, built once at startup
//! - [`logging`] - `tracing-subscriber` initialization from configuration

pub mod context;
pub mod engine;
pub mod logging;
pub mod scheduler;

pub use context::MirrorContext;
pub use engine::{ChangeSynchronizer, SyncSummary};
pub use logging::init_tracing;
pub use scheduler::{SyncScheduler, SyncTrigger};

use thiserror::Error;

use nodemirror_core::domain::MirrorError;

/// Errors raised while assembling or starting the runtime
#[derive(Debug, Error)]
pub enum SyncError {
    /// The configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The cache backend could not be opened
    #[error("Cache setup failed: {0}")]
    Cache(#[from] nodemirror_cache::CacheError),

    /// The remote adapter could not be built
    #[error("Remote setup failed: {0}")]
    Remote(#[from] nodemirror_remote::RemoteError),

    /// A session or synchronization operation failed
    #[error(transparent)]
    Mirror(#[from] MirrorError),

    /// The tracing subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),
}
