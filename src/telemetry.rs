//! Tracing subscriber setup
//!
//! Installs a registry with two layers:
//!
//! ```text
//! Registry
//!   ├── EnvFilter (RUST_LOG, falling back to logging.level)
//!   └── Fmt Layer (pretty or JSON)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use resumable_uploadr::config::LoggingConfig;
//! use resumable_uploadr::telemetry::init_subscriber;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LoggingConfig {
//!     level: "debug".to_string(),
//!     format: "json".to_string(),
//! };
//! init_subscriber(&config)?;
//! # Ok(())
//! # }
//! ```

use crate::config::LoggingConfig;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Subscriber setup errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{0}'")]
    InvalidFilter(String),

    #[error("Unknown log format '{0}'")]
    UnknownFormat(String),

    #[error("Failed to set global subscriber (may already be initialized): {0}")]
    AlreadyInitialized(String),
}

/// Filter from RUST_LOG, or from `level` when RUST_LOG is unset
pub fn env_filter(level: &str) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|_| TelemetryError::InvalidFilter(level.into())),
    }
}

/// Install the global subscriber
pub fn init_subscriber(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(&config.level)?;

    match config.format.as_str() {
        "json" => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true);
            let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
        }
        "pretty" => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true);
            let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
        }
        other => Err(TelemetryError::UnknownFormat(other.into())),
    }
}
