//! Process-wide logging setup.
//!
//! Library code logs through `log` macros and opens `tracing` spans around
//! dispatched messages; both end up in the same `tracing-subscriber` output.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::{LogFormat, LoggingConfig};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("A global logger is already installed: {0}")]
    AlreadyInitialized(String),
}

/// The filter used when `RUST_LOG` is not set.
pub fn default_directive(config: &LoggingConfig) -> String {
    if config.enabled {
        config.level.clone()
    } else {
        "off".to_string()
    }
}

/// Installs the global subscriber and bridges `log` records into it.
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config)));

    let (text, json) = match config.format {
        LogFormat::Text => (Some(fmt::layer().with_writer(std::io::stderr)), None),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        ),
    };

    let subscriber = Registry::default().with(filter).with(text).with(json);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        let mut config = LoggingConfig::default();
        assert_eq!(default_directive(&config), "info");

        config.level = "debug".to_string();
        assert_eq!(default_directive(&config), "debug");

        config.enabled = false;
        assert_eq!(default_directive(&config), "off");
    }
}
