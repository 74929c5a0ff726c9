//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over `logging.level`, so a single run can be
//! made more verbose without touching the configuration file.

use tracing_subscriber::EnvFilter;

use nodemirror_core::config::LoggingConfig;

use crate::SyncError;

/// Builds the filter: `RUST_LOG` if set and valid, else the configured level
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Installs the global subscriber in `text` or `json` format
///
/// # Errors
///
/// Returns `SyncError::Logging` if a global subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), SyncError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(false);

    let installed = match config.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    installed.map_err(|e| SyncError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        let config = LoggingConfig::default();
        // Another test may already have installed a subscriber
        let _ = init_tracing(&config);
        assert!(matches!(init_tracing(&config), Err(SyncError::Logging(_))));
    }

    #[test]
    fn test_filter_uses_configured_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            level: "debug".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(env_filter(&config).to_string(), "debug");
    }
}
