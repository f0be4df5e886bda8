//! Structured logging with JSON or human-readable output.

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

use crate::{TelemetryConfig, TelemetryError};

/// Build the filter: `RUST_LOG` if set, otherwise the configured level.
pub(crate) fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.log_level)
            .map_err(|e| TelemetryError::Config(format!("log level {:?}: {e}", config.log_level))),
    }
}

/// Initialize the logging subsystem.
pub(crate) fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let subscriber = tracing_subscriber::registry().with(build_filter(config)?);

    if config.json_logs {
        let json_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);

        subscriber
            .with(json_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        let pretty_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(config.ansi)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);

        subscriber
            .with(pretty_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    Ok(())
}

/// Log an error with its type and context fields.
#[macro_export]
macro_rules! log_error {
    ($err:expr, $message:expr $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(
            error = %$err,
            error_type = %std::any::type_name_of_val(&$err),
            $($key = %$value,)*
            $message
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_is_parsed() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = TelemetryConfig::new("test").with_log_level("layout_engine=debug,warn");
        let filter = build_filter(&config).unwrap();
        assert!(filter.to_string().contains("layout_engine=debug"));
    }

    #[test]
    fn bad_level_is_a_config_error() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = TelemetryConfig::new("test").with_log_level("layout_engine=loud");
        assert!(matches!(build_filter(&config), Err(TelemetryError::Config(_))));
    }
}
