/// Narrative enrichment for high-risk alerts.
///
/// An external reasoning service can turn a surge event into a short
/// root-cause analysis and action plan. The capability sits behind
/// [`NarrativeEnricher`] so deployments without a credential run the no-op
/// implementation and alerts simply go out without the narrative section.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logging::DataSource;
use crate::model::{SurgeError, SurgeEvent, Venue};

pub trait NarrativeEnricher: Send + Sync {
    /// Returns `Ok(None)` when the enricher has nothing to add.
    fn narrate(&self, event: &SurgeEvent, venue: &Venue) -> Result<Option<String>, SurgeError>;
}

/// Used when no reasoning-service credential is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEnricher;

impl NarrativeEnricher for NoopEnricher {
    fn narrate(&self, _event: &SurgeEvent, _venue: &Venue) -> Result<Option<String>, SurgeError> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completions
// ---------------------------------------------------------------------------

const SYSTEM_PROMPT: &str = "You are an operations analyst for a restaurant group. Given a detected \
demand surge, explain the most likely root cause in two sentences and list three concrete staffing \
actions. Plain text, no markdown headings.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

pub struct ChatNarrativeEnricher {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl ChatNarrativeEnricher {
    pub fn new(endpoint: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self, SurgeError> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

/// The user prompt describing one surge.
pub fn build_prompt(event: &SurgeEvent, venue: &Venue) -> String {
    format!(
        "Venue: {} ({})\nSeverity: {}\nAverage demand ratio: {:.2}x predicted\nTrend: {}\n\
         Heuristic root cause: {}\nRisk score: {:.2}\nWindow: {} to {}",
        venue.name,
        venue.id,
        event.severity,
        event.avg_ratio,
        event.trend,
        event.root_cause,
        event.risk_score,
        event.window_start.format("%Y-%m-%d %H:%M UTC"),
        event.window_end.format("%Y-%m-%d %H:%M UTC"),
    )
}

/// Pulls the first non-empty completion out of a response body.
pub fn parse_completion(body: &str) -> Result<Option<String>, SurgeError> {
    let response: ChatResponse = serde_json::from_str(body)?;
    Ok(response
        .choices
        .into_iter()
        .find_map(|c| c.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty()))
}

impl NarrativeEnricher for ChatNarrativeEnricher {
    fn narrate(&self, event: &SurgeEvent, venue: &Venue) -> Result<Option<String>, SurgeError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user", content: build_prompt(event, venue) },
            ],
            max_tokens: 400,
            temperature: 0.2,
        };
        debug!(source = %DataSource::Reasoning, venue = %venue.id, "requesting narrative");

        let response = self.client.post(&self.endpoint).bearer_auth(&self.api_key).json(&request).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(SurgeError::HttpStatus { endpoint: self.endpoint.clone(), status: status.as_u16() });
        }
        parse_completion(&response.text()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RootCause, Severity, Trend};
    use chrono::{TimeZone, Utc};

    fn event() -> SurgeEvent {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 18, 0, 0).unwrap();
        SurgeEvent {
            venue_id: "v1".to_string(),
            detected_at: at,
            severity: Severity::Critical,
            risk_score: 0.82,
            avg_ratio: 3.4,
            trend: Trend::Accelerating,
            root_cause: RootCause::SocialMediaTrending,
            recommendations: vec![],
            window_start: at - chrono::Duration::hours(2),
            window_end: at,
        }
    }

    #[test]
    fn test_prompt_carries_event_facts() {
        let prompt = build_prompt(&event(), &Venue::new("v1", "Dumpling House", 41.88, -87.63));
        assert!(prompt.contains("Dumpling House"));
        assert!(prompt.contains("3.40x"));
        assert!(prompt.contains("social_media_trending"));
        assert!(prompt.contains("2026-03-14 16:00 UTC"));
    }

    #[test]
    fn test_parse_completion_takes_first_content() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"  A food blogger posted.  "}}]}"#;
        assert_eq!(parse_completion(body).unwrap().as_deref(), Some("A food blogger posted."));
    }

    #[test]
    fn test_parse_completion_empty_content_is_none() {
        let body = r#"{"choices":[{"message":{"content":"   "}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), None);
        assert_eq!(parse_completion(r#"{"choices":[]}"#).unwrap(), None);
        assert!(parse_completion("<html>").is_err());
    }

    #[test]
    fn test_noop_enricher_adds_nothing() {
        let venue = Venue::new("v1", "Dumpling House", 41.88, -87.63);
        assert_eq!(NoopEnricher.narrate(&event(), &venue).unwrap(), None);
    }
}
