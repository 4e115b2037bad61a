//! Plain-text alert rendering. Output depends only on its inputs.

use std::fmt::Write;

use crate::model::{Severity, SurgeEvent, Venue};

fn banner(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "*** CRITICAL DEMAND SURGE ***",
        Severity::High => "** HIGH DEMAND SURGE **",
        Severity::Moderate => "* MODERATE DEMAND SURGE *",
    }
}

pub fn format_subject(event: &SurgeEvent, venue: &Venue) -> String {
    format!(
        "[{}] Demand surge at {}: {:.1}x predicted",
        event.severity.as_str().to_uppercase(),
        venue.name,
        event.avg_ratio
    )
}

/// Full alert body. The narrative section appears only when `narrative` is set.
pub fn format_message(event: &SurgeEvent, venue: &Venue, narrative: Option<&str>) -> String {
    let mut body = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(body, "{}", banner(event.severity));
    let _ = writeln!(body);
    let _ = writeln!(body, "Venue:         {} ({})", venue.name, venue.id);
    let _ = writeln!(body, "Detected at:   {}", event.detected_at.format("%Y-%m-%d %H:%M UTC"));
    let _ = writeln!(body, "Current ratio: {:.2}x predicted demand", event.avg_ratio);
    let _ = writeln!(body, "Trend:         {}", event.trend);
    let _ = writeln!(body, "Root cause:    {}", event.root_cause);
    let _ = writeln!(body, "Risk score:    {:.2}", event.risk_score);
    let _ = writeln!(
        body,
        "Window:        {} to {}",
        event.window_start.format("%Y-%m-%d %H:%M"),
        event.window_end.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(body);
    let _ = writeln!(body, "Action required {}.", event.severity.action_timeline());

    if !event.recommendations.is_empty() {
        let _ = writeln!(body);
        let _ = writeln!(body, "Recommendations:");
        for rec in &event.recommendations {
            let _ = writeln!(body, "  - {}", rec);
        }
    }

    if let Some(text) = narrative {
        let _ = writeln!(body);
        let _ = writeln!(body, "Analysis:");
        for line in text.lines() {
            let _ = writeln!(body, "  {}", line);
        }
    }
    body
}
