/// Structured logging for the surge monitoring service.
///
/// Installs a `tracing` subscriber (console or append-mode file, text or
/// JSON) and provides helpers that tag every upstream failure with its data
/// source, venue and failure class. Modules log through the `tracing`
/// macros directly and use the `source` / `venue` field names below.

use std::fmt;
use std::fs::OpenOptions;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::model::{CollectionSummary, SurgeError};

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.directive().to_uppercase())
    }
}

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Venues,
    Orders,
    Predictions,
    Social,
    Reasoning,
    Store,
    Alert,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Venues => write!(f, "VENUES"),
            DataSource::Orders => write!(f, "ORDERS"),
            DataSource::Predictions => write!(f, "PREDICTIONS"),
            DataSource::Social => write!(f, "SOCIAL"),
            DataSource::Reasoning => write!(f, "REASONING"),
            DataSource::Store => write!(f, "STORE"),
            DataSource::Alert => write!(f, "ALERT"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Upstream legitimately had nothing (404, empty window).
    Expected,
    /// Service degradation: timeouts, 5xx, connection refused.
    Unexpected,
    /// Cannot tell from the error alone.
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classifies an upstream error to pick its log level.
pub fn classify_failure(err: &SurgeError) -> FailureType {
    match err {
        SurgeError::NoData(_) => FailureType::Expected,
        SurgeError::HttpStatus { status, .. } if *status == 404 => FailureType::Expected,
        SurgeError::HttpStatus { status, .. } if *status >= 500 => FailureType::Unexpected,
        SurgeError::Transport(_) => FailureType::Unexpected,
        SurgeError::Store(_) => FailureType::Unexpected,
        _ => FailureType::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Installs the global subscriber. `RUST_LOG` overrides `min_level`.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, json: bool) -> Result<(), SurgeError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(min_level.directive()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let file = match log_file {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| SurgeError::ConfigFile(format!("cannot open log file {}: {}", path, e)))?,
        ),
        None => None,
    };

    let installed = match (file, json) {
        (Some(file), true) => builder.json().with_writer(Mutex::new(file)).try_init(),
        (Some(file), false) => builder.with_ansi(false).with_writer(Mutex::new(file)).try_init(),
        (None, true) => builder.json().try_init(),
        (None, false) => builder.try_init(),
    };
    if installed.is_err() {
        debug!(source = %DataSource::System, "logger already initialised");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Logs an upstream failure at a level chosen by [`classify_failure`].
pub fn log_upstream_failure(source: DataSource, venue_id: Option<&str>, operation: &str, err: &SurgeError) {
    let failure_type = classify_failure(err);
    let venue = venue_id.unwrap_or("-");

    match failure_type {
        FailureType::Expected => {
            debug!(source = %source, venue, "{} failed [{}]: {}", operation, failure_type, err)
        }
        FailureType::Unexpected => {
            error!(source = %source, venue, "{} failed [{}]: {}", operation, failure_type, err)
        }
        FailureType::Unknown => {
            warn!(source = %source, venue, "{} failed [{}]: {}", operation, failure_type, err)
        }
    }
}

/// Logs the per-cycle collection summary.
pub fn log_collection_summary(summary: &CollectionSummary) {
    let CollectionSummary { successful, failed, total } = *summary;
    if failed == 0 {
        info!(source = %DataSource::System, "Collection complete: {}/{} successful", successful, total);
    } else if successful == 0 {
        error!(source = %DataSource::System, "Collection failed for all {} venues", total);
    } else {
        warn!(
            source = %DataSource::System,
            "Collection complete: {}/{} successful, {} failed", successful, total, failed
        );
    }
}
