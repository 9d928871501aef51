//! Structured logging for sweat
//!
//! The library only emits `tracing` events: spans around fits and balance
//! computations, per-iteration optimizer detail at debug level. Applications
//! that want to see them can install a subscriber with [`init_logging`].

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{
    fmt::{format::FmtSpan, layer},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::error::SweatError;

const DEFAULT_LOG_FILE: &str = "sweat.log";

/// Logging configuration, usually read from the `[logging]` config section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum level for `sweat` events
    pub level: LogLevel,

    /// Console output format
    pub format: LogFormat,

    /// Optional JSON log file next to the console output
    pub file_path: Option<PathBuf>,

    /// Start a new log file every day
    pub rotation: bool,

    /// Record span enter/close events (useful for timing fits)
    pub include_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            file_path: None,
            rotation: true,
            include_spans: false,
        }
    }
}

impl LogConfig {
    /// Directive used when `RUST_LOG` is not set
    pub fn filter_directive(&self) -> String {
        format!("sweat={}", self.level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = SweatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(SweatError::Configuration(format!("unknown log level '{}'", other))),
        }
    }
}

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human readable
    Pretty,
    /// One JSON object per event
    Json,
    /// Single-line, human readable
    Compact,
}

impl FromStr for LogFormat {
    type Err = SweatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(SweatError::Configuration(format!("unknown log format '{}'", other))),
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn console_layer(config: &LogConfig) -> BoxedLayer {
    let span_events = if config.include_spans {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        LogFormat::Pretty => layer()
            .pretty()
            .with_line_number(true)
            .with_span_events(span_events)
            .boxed(),
        LogFormat::Json => layer()
            .json()
            .with_current_span(config.include_spans)
            .with_span_list(config.include_spans)
            .boxed(),
        LogFormat::Compact => layer().compact().with_span_events(span_events).boxed(),
    }
}

/// Appender for `path`; a non-rotating appender still writes to exactly `path`
fn file_appender(path: &Path, rotation: bool) -> anyhow::Result<RollingFileAppender> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory: {}", directory.display()))?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);

    Ok(if rotation {
        rolling::daily(directory, file_name)
    } else {
        rolling::never(directory, file_name)
    })
}

/// Install a global subscriber for the `sweat` target.
///
/// `RUST_LOG` overrides the configured level. Fails if a global subscriber
/// is already set.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let mut layers = vec![console_layer(config)];
    if let Some(path) = &config.file_path {
        let writer = file_appender(path, config.rotation)?;
        layers.push(
            layer()
                .json()
                .with_writer(writer)
                .with_current_span(config.include_spans)
                .with_span_list(config.include_spans)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    tracing::debug!(
        level = %config.level,
        format = ?config.format,
        file = ?config.file_path,
        "Logging ready"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!(" WARNING ".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!(matches!("loud".parse::<LogLevel>(), Err(SweatError::Configuration(_))));
        assert_eq!(LogLevel::Debug.to_tracing_level(), Level::DEBUG);
        assert!(LogLevel::Error < LogLevel::Trace);
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_filter_directive() {
        let config = LogConfig {
            level: LogLevel::Debug,
            ..LogConfig::default()
        };
        assert_eq!(config.filter_directive(), "sweat=debug");
        assert!(LogConfig::default().file_path.is_none());
    }

    #[test]
    fn test_file_appender_creates_directory() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("logs").join("fits.log");

        file_appender(&path, false).unwrap();
        assert!(temp_dir.path().join("logs").is_dir());
    }
}
