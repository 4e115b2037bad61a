//! Layer 2: surge detection.
//!
//! A window of the most recent `window_hours` buckets is a surge when
//!   1. every bucket's ratio reaches `surge_threshold`,
//!   2. summed excess demand reaches `min_excess_items * window_hours`, and
//!   3. the venue is out of cooldown.
//!
//! Rules 1 and 2 are pure. Rule 3 is evaluated last as an atomic claim on
//! the cooldown tracker, so a window that fails any rule leaves no trace.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::analysis::cooldown::CooldownTracker;
use crate::analysis::scoring::{
    classify_root_cause, classify_severity, classify_trend, mean, recommendations, risk_breakdown,
};
use crate::clock::{hour_bucket, SharedClock};
use crate::config::{SharedConfig, SurgeConfig};
use crate::logging::DataSource;
use crate::model::{SurgeError, SurgeEvent, SurgeMetric};

pub struct SurgeDetector {
    config: SharedConfig,
    clock: SharedClock,
    cooldowns: Arc<CooldownTracker>,
}

impl SurgeDetector {
    pub fn new(config: SharedConfig, clock: SharedClock) -> Self {
        Self::with_tracker(config, clock, Arc::new(CooldownTracker::new()))
    }

    pub fn with_tracker(config: SharedConfig, clock: SharedClock, cooldowns: Arc<CooldownTracker>) -> Self {
        Self { config, clock, cooldowns }
    }

    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    /// Applies the detection rule to `metrics` for `venue_id`.
    ///
    /// On success the venue's cooldown is set to now and the event returned.
    pub fn check_surge(&self, venue_id: &str, metrics: &[SurgeMetric]) -> Option<SurgeEvent> {
        let config = self.config.snapshot();
        let now = self.clock.now();

        let event = evaluate_window(venue_id, metrics, now, &config)?;
        if !self.cooldowns.try_claim(venue_id, now, config.cooldown()) {
            debug!(source = %DataSource::System, venue = venue_id, "surge suppressed by cooldown");
            return None;
        }
        info!(
            source = %DataSource::System,
            venue = venue_id,
            severity = %event.severity,
            avg_ratio = event.avg_ratio,
            risk_score = event.risk_score,
            "surge detected"
        );
        Some(event)
    }
}

/// Rejects a series with a timestamp off an hour boundary or two metrics
/// for the same bucket.
pub fn validate_metrics(venue_id: &str, metrics: &[SurgeMetric]) -> Result<(), SurgeError> {
    let mut seen = BTreeSet::new();
    for m in metrics {
        if hour_bucket(m.timestamp) != m.timestamp {
            return Err(SurgeError::Parse(format!("venue {}: {} is not an hour bucket", venue_id, m.timestamp)));
        }
        if !seen.insert(m.timestamp) {
            return Err(SurgeError::Parse(format!("venue {}: duplicate bucket {}", venue_id, m.timestamp)));
        }
    }
    Ok(())
}

/// Rules 1 and 2 plus event construction, without cooldown.
///
/// Metrics are ordered by timestamp before the window is taken, so callers
/// supplying manual data need not sort it. The window must be consecutive
/// hour buckets; a gap means it is not the most recent `window_hours`.
pub fn evaluate_window(
    venue_id: &str,
    metrics: &[SurgeMetric],
    now: DateTime<Utc>,
    config: &SurgeConfig,
) -> Option<SurgeEvent> {
    let window_len = config.window_hours as usize;
    if window_len == 0 || metrics.len() < window_len {
        return None;
    }
    if let Err(e) = validate_metrics(venue_id, metrics) {
        debug!(source = %DataSource::System, venue = venue_id, "window rejected: {}", e);
        return None;
    }

    let mut ordered: Vec<&SurgeMetric> = metrics.iter().collect();
    ordered.sort_by_key(|m| m.timestamp);
    let window = &ordered[ordered.len() - window_len..];
    if !window.windows(2).all(|pair| pair[1].timestamp - pair[0].timestamp == Duration::hours(1)) {
        return None;
    }

    if !window.iter().all(|m| m.ratio >= config.surge_threshold) {
        return None;
    }
    let total_excess: f64 = window.iter().map(|m| m.excess_demand).sum();
    if !(total_excess >= config.min_excess_items * window_len as f64) {
        return None;
    }

    let ratios: Vec<f64> = window.iter().map(|m| m.ratio).collect();
    let avg_ratio = mean(&ratios);
    let trend = classify_trend(&ratios);
    let social: Vec<f64> = window.iter().map(|m| m.social_signals.composite_signal).collect();
    let breakdown = risk_breakdown(avg_ratio, config.surge_threshold, mean(&social), trend, &config.risk_weights);
    let severity = classify_severity(avg_ratio);
    let root_cause = classify_root_cause(&breakdown);

    Some(SurgeEvent {
        venue_id: venue_id.to_string(),
        detected_at: now,
        severity,
        risk_score: breakdown.score,
        avg_ratio,
        trend,
        root_cause,
        recommendations: recommendations(severity, root_cause, trend),
        window_start: window[0].timestamp,
        window_end: window[window_len - 1].timestamp,
    })
}
