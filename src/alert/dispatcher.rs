//! Layer 3: alert construction and dispatch.
//!
//! Neither enrichment nor delivery can fail the caller. An enrichment error
//! drops the narrative section; a sink error or panic is logged and reported
//! back in the [`DispatchReport`] so the orchestrator can record it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{info, warn};

use crate::alert::message::{format_message, format_subject};
use crate::alert::narrative::NarrativeEnricher;
use crate::clock::SharedClock;
use crate::config::SharedConfig;
use crate::logging::{log_upstream_failure, DataSource};
use crate::model::{Alert, SurgeError, SurgeEvent, Venue, EMAIL_CHANNEL};

/// Receives built alerts. Any `Fn(&Alert, &Venue) -> Result<(), SurgeError>`
/// closure is a sink.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, alert: &Alert, venue: &Venue) -> Result<(), SurgeError>;
}

impl<F> AlertSink for F
where
    F: Fn(&Alert, &Venue) -> Result<(), SurgeError> + Send + Sync,
{
    fn deliver(&self, alert: &Alert, venue: &Venue) -> Result<(), SurgeError> {
        self(alert, venue)
    }
}

/// Writes alerts to the log. The daemon's default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl AlertSink for LoggingSink {
    fn deliver(&self, alert: &Alert, venue: &Venue) -> Result<(), SurgeError> {
        info!(
            source = %DataSource::Alert,
            venue = %venue.id,
            severity = %alert.severity,
            channels = ?alert.channels,
            "{}\n{}",
            alert.subject,
            alert.message
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    /// No sink registered; the alert was built but had nowhere to go.
    NoSink,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    pub alert: Alert,
    pub enriched: bool,
    pub delivery: DeliveryStatus,
}

pub struct AlertDispatcher {
    enricher: Arc<dyn NarrativeEnricher>,
    sink: RwLock<Option<Arc<dyn AlertSink>>>,
    config: SharedConfig,
    clock: SharedClock,
}

impl AlertDispatcher {
    pub fn new(enricher: Arc<dyn NarrativeEnricher>, config: SharedConfig, clock: SharedClock) -> Self {
        Self { enricher, sink: RwLock::new(None), config, clock }
    }

    /// Replaces the registered sink.
    pub fn register_sink(&self, sink: Arc<dyn AlertSink>) {
        *self.sink.write().unwrap_or_else(|p| p.into_inner()) = Some(sink);
    }

    /// Builds the alert, enriching it when risk and config allow.
    pub fn build_alert(&self, event: &SurgeEvent, venue: &Venue) -> (Alert, bool) {
        let config = self.config.snapshot();
        let narrative = if config.enable_llm_enrichment && event.risk_score >= config.llm_threshold {
            match self.enricher.narrate(event, venue) {
                Ok(text) => text,
                Err(e) => {
                    log_upstream_failure(DataSource::Reasoning, Some(&venue.id), "narrative enrichment", &e);
                    None
                }
            }
        } else {
            None
        };

        let alert = Alert {
            venue_id: venue.id.clone(),
            severity: event.severity,
            subject: format_subject(event, venue),
            message: format_message(event, venue, narrative.as_deref()),
            channels: vec![EMAIL_CHANNEL.to_string()],
            timestamp: self.clock.now(),
        };
        (alert, narrative.is_some())
    }

    pub fn build_and_dispatch(&self, event: &SurgeEvent, venue: &Venue) -> DispatchReport {
        let (alert, enriched) = self.build_alert(event, venue);
        let sink = self.sink.read().unwrap_or_else(|p| p.into_inner()).clone();

        let delivery = match sink {
            None => {
                warn!(source = %DataSource::Alert, venue = %venue.id, "no alert sink registered; alert not delivered");
                DeliveryStatus::NoSink
            }
            Some(sink) => match catch_unwind(AssertUnwindSafe(|| sink.deliver(&alert, venue))) {
                Ok(Ok(())) => DeliveryStatus::Delivered,
                Ok(Err(e)) => {
                    warn!(source = %DataSource::Alert, venue = %venue.id, "alert sink failed: {}", e);
                    DeliveryStatus::Failed(e.to_string())
                }
                Err(_) => {
                    warn!(source = %DataSource::Alert, venue = %venue.id, "alert sink panicked");
                    DeliveryStatus::Failed("alert sink panicked".to_string())
                }
            },
        };
        DispatchReport { alert, enriched, delivery }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::narrative::NoopEnricher;
    use crate::clock::ManualClock;
    use crate::config::ConfigUpdate;
    use crate::model::{RootCause, Severity, Trend};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Mutex;

    struct ScriptedEnricher(Result<&'static str, &'static str>);

    impl NarrativeEnricher for ScriptedEnricher {
        fn narrate(&self, _event: &SurgeEvent, _venue: &Venue) -> Result<Option<String>, SurgeError> {
            match self.0 {
                Ok(text) => Ok(Some(text.to_string())),
                Err(msg) => Err(SurgeError::Enrichment(msg.to_string())),
            }
        }
    }

    fn event(risk_score: f64) -> SurgeEvent {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 18, 0, 0).unwrap();
        SurgeEvent {
            venue_id: "v1".to_string(),
            detected_at: at,
            severity: Severity::High,
            risk_score,
            avg_ratio: 2.4,
            trend: Trend::Stable,
            root_cause: RootCause::OrganicDemandSpike,
            recommendations: vec![],
            window_start: at - Duration::hours(2),
            window_end: at,
        }
    }

    fn venue() -> Venue {
        Venue::new("v1", "Bagel Co", 41.88, -87.63)
    }

    fn dispatcher(enricher: Arc<dyn NarrativeEnricher>) -> AlertDispatcher {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 14, 18, 1, 0).unwrap()));
        AlertDispatcher::new(enricher, SharedConfig::default(), clock)
    }

    #[test]
    fn test_alert_always_targets_email() {
        let d = dispatcher(Arc::new(NoopEnricher));
        let report = d.build_and_dispatch(&event(0.3), &venue());
        assert_eq!(report.alert.channels, vec!["email".to_string()]);
        assert_eq!(report.alert.severity, Severity::High);
        assert_eq!(report.delivery, DeliveryStatus::NoSink);
    }

    #[test]
    fn test_high_risk_alert_is_enriched() {
        let d = dispatcher(Arc::new(ScriptedEnricher(Ok("Nearby concert let out."))));
        let report = d.build_and_dispatch(&event(0.75), &venue());
        assert!(report.enriched);
        assert!(report.alert.message.contains("Nearby concert let out."));
    }

    #[test]
    fn test_low_risk_or_disabled_skips_enrichment() {
        let d = dispatcher(Arc::new(ScriptedEnricher(Ok("should not appear"))));
        assert!(!d.build_and_dispatch(&event(0.69), &venue()).enriched);

        d.config
            .apply(&ConfigUpdate { enable_llm_enrichment: Some(false), ..Default::default() })
            .unwrap();
        assert!(!d.build_and_dispatch(&event(0.95), &venue()).enriched);
    }

    #[test]
    fn test_enrichment_failure_still_dispatches() {
        let d = dispatcher(Arc::new(ScriptedEnricher(Err("timeout"))));
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let seen = delivered.clone();
        d.register_sink(Arc::new(move |alert: &Alert, _venue: &Venue| -> Result<(), SurgeError> {
            seen.lock().unwrap().push(alert.subject.clone());
            Ok(())
        }));

        let report = d.build_and_dispatch(&event(0.9), &venue());
        assert!(!report.enriched);
        assert!(!report.alert.message.contains("Analysis:"));
        assert_eq!(report.delivery, DeliveryStatus::Delivered);
        assert_eq!(delivered.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_sink_error_and_panic_are_contained() {
        let d = dispatcher(Arc::new(NoopEnricher));
        d.register_sink(Arc::new(|_: &Alert, _: &Venue| -> Result<(), SurgeError> {
            Err(SurgeError::Delivery("smtp down".to_string()))
        }));
        let report = d.build_and_dispatch(&event(0.5), &venue());
        assert!(matches!(report.delivery, DeliveryStatus::Failed(ref msg) if msg.contains("smtp down")));

        d.register_sink(Arc::new(|_: &Alert, _: &Venue| -> Result<(), SurgeError> { panic!("sink bug") }));
        let report = d.build_and_dispatch(&event(0.5), &venue());
        assert_eq!(report.delivery, DeliveryStatus::Failed("alert sink panicked".to_string()));
    }
}
