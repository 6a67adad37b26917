//! Structured logging setup for Inworld client hosts

use std::str::FromStr;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

/// Output format of the global subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event (production)
    #[default]
    Json,
    /// Human-readable lines (development)
    Console,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "console" | "pretty" | "text" => Ok(LogFormat::Console),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// `RUST_LOG` wins over `default_level`
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber, failing if one is already set
///
/// Embedding hosts that may already own a subscriber should call this
/// instead of the panicking `init_*` helpers.
pub fn try_init(service_name: &str, default_level: &str, format: LogFormat) -> Result<(), TryInitError> {
    let filter = env_filter(default_level);

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_current_span(false)
                    .with_span_list(false),
            )
            .try_init()?,
        LogFormat::Console => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?,
    }

    tracing::info!(
        service = service_name,
        format = ?format,
        "Logging initialized"
    );
    Ok(())
}

/// Initialize structured JSON logging
///
/// This sets up:
/// - JSON formatted logs (for production)
/// - Environment-based log level filtering
/// - Service name tagging
pub fn init_logging(service_name: &str, default_level: &str) {
    if let Err(e) = try_init(service_name, default_level, LogFormat::Json) {
        eprintln!("logging already initialized: {e}");
    }
}

/// Initialize simple console logging (for development)
pub fn init_console_logging(service_name: &str, default_level: &str) {
    if let Err(e) = try_init(service_name, default_level, LogFormat::Console) {
        eprintln!("logging already initialized: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Console".parse::<LogFormat>(), Ok(LogFormat::Console));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_second_init_fails() {
        let first = try_init("test", "debug", LogFormat::Console);
        let second = try_init("test", "debug", LogFormat::Console);
        assert!(first.is_ok());
        assert!(second.is_err());
    }
}
