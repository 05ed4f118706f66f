use super::config::{LogFormat, LogLevel};
use std::sync::OnceLock;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug, Clone)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {details}")]
    InvalidFilter { filter: String, details: String },
    #[error("Failed to install tracing subscriber: {0}")]
    InitFailed(String),
}

/// Dependencies that are chatty at debug level.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "warp"];

/// Filter string for the given default level, with HTTP stack crates held at
/// warn.
pub fn build_filter_string(level: LogLevel) -> String {
    let mut parts = Vec::with_capacity(QUIET_TARGETS.len() + 1);
    parts.push(level.as_str().to_string());
    parts.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    parts.join(",")
}

fn init(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    // RUST_LOG wins over the configured level when set
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let filter_string = build_filter_string(level);
            EnvFilter::try_new(&filter_string).map_err(|e| LoggingError::InvalidFilter {
                filter: filter_string,
                details: e.to_string(),
            })?
        }
    };

    let json = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(false)
    });
    let compact = (format == LogFormat::Compact).then(|| {
        fmt::layer()
            .with_target(true)
            .with_level(true)
            .compact()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(compact)
        .try_init()
        .map_err(|e| LoggingError::InitFailed(e.to_string()))
}

/// Install the global subscriber once. Later calls return the first result.
pub fn setup_logging_safe(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    static INIT: OnceLock<Result<(), LoggingError>> = OnceLock::new();
    INIT.get_or_init(|| init(level, format)).clone()
}
