//! Structured logging for partition handling
//!
//! Console or daily rotated file output through `tracing-subscriber`, in text
//! or JSON format. `RUST_LOG` overrides the configured level.

use std::sync::Once;
use std::time::Duration;

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LogLevel, LoggingConfig};

static INIT: Once = Once::new();

const LOG_FILE_PREFIX: &str = "partition-handling.log";

/// Initialize the logging system based on configuration.
///
/// Only the first call installs a subscriber; later calls return `Ok(())`.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = init_logging_inner(config);
    });
    result
}

fn init_logging_inner(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let level = convert_log_level(&config.level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(level).into()));

    let builder = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(UtcTime::rfc_3339())
        .with_env_filter(filter);

    match (&config.file_path, &config.format) {
        (Some(directory), LogFormat::Json) => builder
            .json()
            .with_ansi(false)
            .with_writer(tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX))
            .try_init()
            .map_err(|e| e.to_string())?,
        (Some(directory), LogFormat::Simple) => builder
            .with_ansi(false)
            .with_writer(tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX))
            .try_init()
            .map_err(|e| e.to_string())?,
        (None, _) if !config.console => return Ok(()),
        (None, LogFormat::Json) => builder.json().try_init().map_err(|e| e.to_string())?,
        (None, LogFormat::Simple) => builder.try_init().map_err(|e| e.to_string())?,
    }

    tracing::info!("Logging system initialized with level: {:?}", config.level);
    Ok(())
}

/// Convert our log level to tracing level
pub fn convert_log_level(level: &LogLevel) -> Level {
    match level {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    }
}

/// Log a partition handling operation with structured fields
pub fn log_partition_operation(
    operation: &str,
    cache_name: &str,
    success: bool,
    duration: Duration,
    additional_fields: Option<Vec<(&str, String)>>,
) {
    let span = tracing::info_span!(
        "partition_operation",
        operation = operation,
        cache = cache_name,
        success = success,
        duration_ms = duration.as_millis() as u64,
    );
    let _enter = span.enter();

    let details = additional_fields
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(" ");

    if success {
        tracing::info!(details = %details, "Partition operation completed");
    } else {
        tracing::error!(details = %details, "Partition operation failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_log_level() {
        assert_eq!(convert_log_level(&LogLevel::Error), Level::ERROR);
        assert_eq!(convert_log_level(&LogLevel::Debug), Level::DEBUG);
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }

    #[test]
    fn test_log_partition_operation() {
        log_partition_operation(
            "merge",
            "users",
            true,
            Duration::from_millis(3),
            Some(vec![("topology_id", "7".to_string())]),
        );
        log_partition_operation("merge", "users", false, Duration::ZERO, None);
    }
}
