//! Logging setup.
//!
//! This module provides:
//! - An `EnvFilter` driven by `RUST_LOG`, with [`DEFAULT_LOG_FILTER`] as fallback
//! - Local timezone timestamps for logs
//! - A JSON output mode for log shippers

use std::fmt::{self as stdfmt, Display};

use chrono::Local;
use clap::ValueEnum;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "docker_events=info,bollard=warn,reqwest=warn";

/// Output format of the console logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut stdfmt::Formatter<'_>) -> stdfmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> stdfmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Filter from `RUST_LOG`, or [`DEFAULT_LOG_FILTER`] when unset or invalid.
pub fn build_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber.
pub fn init_logging(format: LogFormat) -> Result<()> {
    let (text_layer, json_layer) = match format {
        LogFormat::Text => (
            Some(fmt::layer().with_ansi(true).with_timer(LocalTimer)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_timer(LocalTimer)
                    .with_current_span(false),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(build_filter())
        .with(text_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {}", e)))?;

    Ok(())
}
