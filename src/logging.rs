//! Structured logging setup.
//!
//! Every component logs through `tracing` with structured fields
//! (`request_id`, `route_id`, `node_id`, `path`, `status`, `duration_us`).
//! [`init_logging`] installs a `tracing-subscriber` registry with:
//! - an `EnvFilter` (`RUST_LOG` wins over `KIT_LOG_LEVEL`)
//! - a JSON or pretty fmt layer
//! - optional non-blocking output through `tracing-appender`

use anyhow::{Context, Result};
use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub log_level: String,
    pub format: LogFormat,
    pub async_logging: bool,
    /// Extra comma-separated directives, e.g. `kitrouter::prerender=trace`
    pub target_filter: Option<String>,
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Json,
            async_logging: true,
            target_filter: None,
            include_location: false,
        }
    }
}

impl LogConfig {
    /// Read `KIT_LOG_*` environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            lookup(key)
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };
        Self {
            log_level: lookup("KIT_LOG_LEVEL").unwrap_or(defaults.log_level),
            format: lookup("KIT_LOG_FORMAT")
                .map_or(defaults.format, |s| LogFormat::parse(&s)),
            async_logging: flag("KIT_LOG_ASYNC", defaults.async_logging),
            target_filter: lookup("KIT_LOG_TARGET_FILTER").filter(|s| !s.trim().is_empty()),
            include_location: flag("KIT_LOG_INCLUDE_LOCATION", defaults.include_location),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        // may_minihttp reports client disconnects at info
        if let Ok(directive) = "may_minihttp=warn".parse() {
            filter = filter.add_directive(directive);
        }
        if let Some(targets) = &self.target_filter {
            for raw in targets.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                match raw.parse() {
                    Ok(directive) => filter = filter.add_directive(directive),
                    Err(_) => eprintln!("Warning: Invalid log filter directive: {raw}"),
                }
            }
        }
        filter
    }
}

/// Install the global subscriber.
///
/// With async logging the returned guard must be kept alive; dropping it
/// flushes and stops the background writer.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let registry = tracing_subscriber::registry().with(config.env_filter());

    let (writer, guard) = if config.async_logging {
        let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());
        (tracing_subscriber::fmt::writer::BoxMakeWriter::new(non_blocking), Some(guard))
    } else {
        (tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stdout), None)
    };

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
    };

    registry
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("invalid"), LogFormat::Json);
    }

    #[test]
    fn test_from_lookup_reads_kit_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("KIT_LOG_LEVEL", "debug"),
            ("KIT_LOG_FORMAT", "pretty"),
            ("KIT_LOG_ASYNC", "false"),
            ("KIT_LOG_TARGET_FILTER", "kitrouter::prerender=trace"),
        ]);
        let config = LogConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(!config.async_logging);
        assert_eq!(config.target_filter.as_deref(), Some("kitrouter::prerender=trace"));
        assert!(!config.include_location);
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = LogConfig::from_lookup(|_| None);
        assert_eq!(config, LogConfig::default());
        assert!(config.async_logging);
        assert_eq!(config.format, LogFormat::Json);
    }
}
