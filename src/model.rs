/// Core data types for the venue surge monitoring service.
///
/// This module defines the shared domain model imported by all other modules:
/// venues, hourly surge metrics, social signals, surge events, alerts and
/// cycle records, plus the crate-wide error type. It contains no I/O.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Floor applied to predicted item counts before computing a ratio.
///
/// A zero prediction with any actual demand yields `actual / ε`, which is
/// always far above any sane surge threshold.
pub const PREDICTION_EPSILON: f64 = 0.01;

/// The only delivery channel the engine stamps on alerts.
pub const EMAIL_CHANNEL: &str = "email";

// ---------------------------------------------------------------------------
// Venue
// ---------------------------------------------------------------------------

/// A monitored location, as returned by `/venues/active`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Venue {
    pub fn new(id: &str, name: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            latitude,
            longitude,
        }
    }

    /// Boundary validation for venues received from the external API.
    pub fn validate(&self) -> Result<(), SurgeError> {
        if self.id.trim().is_empty() {
            return Err(SurgeError::Parse("venue id is empty".to_string()));
        }
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(SurgeError::Parse(format!(
                "venue {} has out-of-range coordinates ({}, {})",
                self.id, self.latitude, self.longitude
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Social signals
// ---------------------------------------------------------------------------

/// Composite virality indicators for a venue.
///
/// `composite_signal` is a fixed weighted sum of the normalized components
/// and is always within `[0, 1]`. A source that failed contributes zeros.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialSignals {
    /// Search-trend index, 0..=100.
    pub search_trend_score: f64,
    pub mention_count: u64,
    /// 0..=1
    pub mention_virality: f64,
    pub nearby_event_count: u64,
    pub nearby_event_attendance: u64,
    /// 0..=1
    pub composite_signal: f64,
}

impl SocialSignals {
    /// The zero-signal value used whenever nothing could be fetched.
    pub fn none() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Surge metric
// ---------------------------------------------------------------------------

/// One hour bucket of actual vs. predicted demand for a venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurgeMetric {
    /// Start of the hour bucket, UTC.
    pub timestamp: DateTime<Utc>,
    pub actual_items: f64,
    pub actual_orders: f64,
    pub predicted_items: f64,
    pub predicted_orders: f64,
    pub ratio: f64,
    pub excess_demand: f64,
    pub social_signals: SocialSignals,
}

impl SurgeMetric {
    /// Builds a metric, deriving `ratio` and `excess_demand`.
    pub fn new(
        timestamp: DateTime<Utc>,
        actual_items: f64,
        actual_orders: f64,
        predicted_items: f64,
        predicted_orders: f64,
        social_signals: SocialSignals,
    ) -> Self {
        Self {
            timestamp,
            actual_items,
            actual_orders,
            predicted_items,
            predicted_orders,
            ratio: actual_items / predicted_items.max(PREDICTION_EPSILON),
            excess_demand: actual_items - predicted_items,
            social_signals,
        }
    }
}

// ---------------------------------------------------------------------------
// Surge classification
// ---------------------------------------------------------------------------

/// Surge severity, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Moderate,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Moderate => "moderate",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// How soon operators are expected to act.
    pub fn action_timeline(&self) -> &'static str {
        match self {
            Severity::Critical => "immediately (≤5 min)",
            Severity::High => "within 15 minutes",
            Severity::Moderate => "within 30 minutes",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Accelerating,
    Stable,
    Decelerating,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Accelerating => "accelerating",
            Trend::Stable => "stable",
            Trend::Decelerating => "decelerating",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCause {
    SocialMediaTrending,
    OrganicDemandSpike,
}

impl RootCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootCause::SocialMediaTrending => "social_media_trending",
            RootCause::OrganicDemandSpike => "organic_demand_spike",
        }
    }
}

impl fmt::Display for RootCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Events and alerts
// ---------------------------------------------------------------------------

/// A confirmed surge for one venue. Only the detector creates these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurgeEvent {
    pub venue_id: String,
    pub detected_at: DateTime<Utc>,
    pub severity: Severity,
    /// 0..=1
    pub risk_score: f64,
    pub avg_ratio: f64,
    pub trend: Trend,
    pub root_cause: RootCause,
    pub recommendations: Vec<String>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Operator-facing notification derived 1:1 from a [`SurgeEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub venue_id: String,
    pub severity: Severity,
    pub subject: String,
    pub message: String,
    pub channels: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Cycle bookkeeping
// ---------------------------------------------------------------------------

/// Outcome of one orchestrator tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub venues_checked: usize,
    pub surges_detected: usize,
    pub errors: Vec<String>,
}

/// Result of `DataCollector::collect_for_all_venues`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub successful: usize,
    pub failed: usize,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised anywhere in the monitoring pipeline.
#[derive(Debug, Error)]
pub enum SurgeError {
    /// Connection failure or timeout talking to an external API.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx HTTP response.
    #[error("HTTP error from {endpoint}: {status}")]
    HttpStatus { endpoint: String, status: u16 },

    /// A response body or payload could not be interpreted.
    #[error("parse error: {0}")]
    Parse(String),

    /// The upstream answered but had nothing for this venue/window.
    #[error("no data: {0}")]
    NoData(String),

    #[error("metrics store error: {0}")]
    Store(String),

    /// A runtime configuration value was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration file could not be read or parsed.
    #[error("config file error: {0}")]
    ConfigFile(String),

    #[error("narrative enrichment failed: {0}")]
    Enrichment(String),

    #[error("alert delivery failed: {0}")]
    Delivery(String),

    /// A lifecycle transition that is not allowed from the current state.
    #[error("invalid state transition: {0}")]
    InvalidState(String),
}

impl From<serde_json::Error> for SurgeError {
    fn from(err: serde_json::Error) -> Self {
        SurgeError::Parse(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
