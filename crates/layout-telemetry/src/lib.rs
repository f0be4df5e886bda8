//! Layout Telemetry - logging setup for the layout tools.
//!
//! Library crates only emit `tracing` events; binaries call
//! [`init_telemetry`] once at startup to decide where they go.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use layout_telemetry::{TelemetryConfig, init_telemetry};
//!
//! init_telemetry(TelemetryConfig::new("layout").with_json_logs(false))?;
//! tracing::info!(batch = "B1", "planning");
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod logging;

use std::sync::OnceLock;

use logging::init_logging;

/// Set once the first initialisation succeeds.
static TELEMETRY: OnceLock<TelemetryConfig> = OnceLock::new();

/// Configuration for telemetry initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Name attached to the startup event.
    pub service_name: String,

    /// Log level filter (e.g., "info", "debug", "`layout_engine=trace`").
    /// `RUST_LOG` takes precedence when set.
    pub log_level: String,

    /// Emit one JSON object per event instead of human-readable lines.
    pub json_logs: bool,

    /// Colourise human-readable output.
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "layout".to_string(),
            log_level: "info".to_string(),
            json_logs: true,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Enable or disable JSON logs.
    #[must_use]
    pub const fn with_json_logs(mut self, enabled: bool) -> Self {
        self.json_logs = enabled;
        self
    }

    #[must_use]
    pub const fn with_ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }
}

/// Initialize logging. Events are written to stderr so command output on
/// stdout stays machine-readable.
///
/// Only the first successful call installs a subscriber; later calls are
/// no-ops.
///
/// # Errors
///
/// Returns [`TelemetryError::Config`] for an unparsable level and
/// [`TelemetryError::LoggingInit`] if another global subscriber is already
/// installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    if TELEMETRY.get().is_some() {
        return Ok(());
    }
    init_logging(&config)?;
    tracing::debug!(
        service = %config.service_name,
        json = config.json_logs,
        level = %config.log_level,
        "telemetry initialised"
    );
    let _ = TELEMETRY.set(config);
    Ok(())
}

/// Telemetry error type.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to initialize logging.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();

        assert_eq!(config.service_name, "layout");
        assert_eq!(config.log_level, "info");
        assert!(config.json_logs);
        assert!(config.ansi);
    }

    #[test]
    fn test_telemetry_config_builders() {
        let config = TelemetryConfig::new("layout-cli")
            .with_log_level("debug")
            .with_json_logs(false)
            .with_ansi(false);

        assert_eq!(config.service_name, "layout-cli");
        assert_eq!(config.log_level, "debug");
        assert!(!config.json_logs);
        assert!(!config.ansi);
    }
}
