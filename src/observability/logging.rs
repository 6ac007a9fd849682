//! Structured logging.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber
//! - Pick text or JSON output and the default filter from config

use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::ObservabilityConfig;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}")]
    Filter(#[from] ParseError),

    #[error("failed to install logger: {0}")]
    Init(#[from] TryInitError),
}

/// Filter from `RUST_LOG`, falling back to `default_level`.
pub fn env_filter(default_level: &str) -> Result<EnvFilter, ParseError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_level),
    }
}

fn format_layer(config: &ObservabilityConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = fmt::layer();
    match (config.log_format == "json", config.log_timestamp) {
        (true, true) => layer.json().boxed(),
        (true, false) => layer.json().without_time().boxed(),
        (false, true) => layer.boxed(),
        (false, false) => layer.without_time().boxed(),
    }
}

/// Install the global subscriber. Fails if one is already set.
pub fn init(config: &ObservabilityConfig) -> Result<(), LoggingError> {
    let filter = env_filter(&config.log_level)?;
    tracing_subscriber::registry()
        .with(format_layer(config))
        .with(filter)
        .try_init()?;
    Ok(())
}
