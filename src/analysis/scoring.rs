//! Pure scoring functions used by the surge detector.
//!
//! Nothing here reads the clock or touches shared state.

use crate::config::RiskWeights;
use crate::model::{RootCause, Severity, Trend};

/// Relative change between window halves that counts as a trend.
pub const TREND_CHANGE: f64 = 0.10;

const TREND_STEP: f64 = 0.1;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Compares the mean ratio of the window's first half to its second half.
///
/// With an odd number of buckets the middle one belongs to the second half.
pub fn classify_trend(ratios: &[f64]) -> Trend {
    if ratios.len() < 2 {
        return Trend::Stable;
    }
    let (first, second) = ratios.split_at(ratios.len() / 2);
    let (early, late) = (mean(first), mean(second));
    if early <= 0.0 {
        return if late > 0.0 { Trend::Accelerating } else { Trend::Stable };
    }
    let change = (late - early) / early;
    if change > TREND_CHANGE {
        Trend::Accelerating
    } else if change < -TREND_CHANGE {
        Trend::Decelerating
    } else {
        Trend::Stable
    }
}

/// `+0.1 / 0 / -0.1` mapped onto `[0, 1]`.
pub fn trend_component(trend: Trend) -> f64 {
    let raw = match trend {
        Trend::Accelerating => TREND_STEP,
        Trend::Stable => 0.0,
        Trend::Decelerating => -TREND_STEP,
    };
    (raw + TREND_STEP) / (2.0 * TREND_STEP)
}

/// How far the average ratio sits above the threshold, as a fraction of it.
pub fn ratio_severity(avg_ratio: f64, surge_threshold: f64) -> f64 {
    if surge_threshold <= 0.0 || !avg_ratio.is_finite() {
        return if avg_ratio > surge_threshold { 1.0 } else { 0.0 };
    }
    ((avg_ratio - surge_threshold) / surge_threshold).clamp(0.0, 1.0)
}

/// Weighted contributions of each risk component and their sum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskBreakdown {
    pub ratio: f64,
    pub social: f64,
    pub trend: f64,
    pub score: f64,
}

pub fn risk_breakdown(
    avg_ratio: f64,
    surge_threshold: f64,
    social_component: f64,
    trend: Trend,
    weights: &RiskWeights,
) -> RiskBreakdown {
    let social = if social_component.is_finite() { social_component.clamp(0.0, 1.0) } else { 0.0 };
    let ratio = weights.ratio * ratio_severity(avg_ratio, surge_threshold);
    let social = weights.social * social;
    let trend = weights.trend * trend_component(trend);
    RiskBreakdown { ratio, social, trend, score: (ratio + social + trend).clamp(0.0, 1.0) }
}

/// Severity from the window's average ratio alone.
pub fn classify_severity(avg_ratio: f64) -> Severity {
    if avg_ratio > 3.0 {
        Severity::Critical
    } else if avg_ratio > 2.0 {
        Severity::High
    } else {
        Severity::Moderate
    }
}

/// Social trending only when the social term is strictly the largest.
pub fn classify_root_cause(breakdown: &RiskBreakdown) -> RootCause {
    if breakdown.social > breakdown.ratio && breakdown.social > breakdown.trend {
        RootCause::SocialMediaTrending
    } else {
        RootCause::OrganicDemandSpike
    }
}

pub fn recommendations(severity: Severity, root_cause: RootCause, trend: Trend) -> Vec<String> {
    let mut out: Vec<String> = match severity {
        Severity::Critical => vec![
            "Call in on-call kitchen and front-of-house staff now".to_string(),
            "Extend quoted prep times or pause delivery-platform intake".to_string(),
        ],
        Severity::High => vec![
            "Add at least one kitchen station for the next two hours".to_string(),
            "Notify delivery partners of longer pickup times".to_string(),
        ],
        Severity::Moderate => vec![
            "Put standby staff on notice".to_string(),
            "Check prep levels for top-selling items".to_string(),
        ],
    };
    if root_cause == RootCause::SocialMediaTrending {
        out.push("Review social channels for viral posts mentioning the venue".to_string());
    }
    match trend {
        Trend::Accelerating => out.push("Demand is still climbing: plan capacity beyond the current hour".to_string()),
        Trend::Decelerating => out.push("Demand is easing: hold extra staff until the ratio drops below threshold".to_string()),
        Trend::Stable => {}
    }
    out
}
