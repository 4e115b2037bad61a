/// Social signal aggregation.
///
/// Three independent sources feed a venue's virality picture: a search-trend
/// index, a social-mention API and a local-events API. Each is optional (no
/// URL or no credential means the source is simply not registered) and each
/// may fail on its own; a missing reading contributes zero to the composite.
///
/// Results are cached per venue for a short window. The cache lock is never
/// held across a fetch, so two workers racing on a cold entry may both fetch;
/// the later write wins and both values are equally fresh.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;

use crate::clock::SharedClock;
use crate::config::{SharedConfig, SocialWeights};
use crate::logging::{log_upstream_failure, DataSource};
use crate::model::{SocialSignals, SurgeError, Venue};

// ============================================================================
// Sources
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Trend,
    Mentions,
    Events,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Trend => "search_trend",
            SignalKind::Mentions => "social_mentions",
            SignalKind::Events => "local_events",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalReading {
    Trend { score: f64 },
    Mentions { count: u64, virality: f64 },
    Events { count: u64, attendance: u64 },
}

pub trait SignalSource: Send + Sync {
    fn kind(&self) -> SignalKind;
    fn fetch(&self, venue: &Venue) -> Result<SignalReading, SurgeError>;
}

#[derive(Debug, Deserialize)]
struct TrendBody {
    score: f64,
}

#[derive(Debug, Deserialize)]
struct MentionsBody {
    mention_count: u64,
    virality: f64,
}

#[derive(Debug, Deserialize)]
struct EventsBody {
    event_count: u64,
    total_attendance: u64,
}

/// Parses a source response body into a reading, clamping to valid ranges.
pub fn parse_reading(kind: SignalKind, body: &str) -> Result<SignalReading, SurgeError> {
    let reading = match kind {
        SignalKind::Trend => {
            let b: TrendBody = serde_json::from_str(body)?;
            SignalReading::Trend { score: clamp_finite(b.score, 0.0, 100.0) }
        }
        SignalKind::Mentions => {
            let b: MentionsBody = serde_json::from_str(body)?;
            SignalReading::Mentions { count: b.mention_count, virality: clamp_finite(b.virality, 0.0, 1.0) }
        }
        SignalKind::Events => {
            let b: EventsBody = serde_json::from_str(body)?;
            SignalReading::Events { count: b.event_count, attendance: b.total_attendance }
        }
    };
    Ok(reading)
}

fn clamp_finite(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_finite() { value.clamp(lo, hi) } else { lo }
}

/// A signal provider reached over HTTP with a bearer credential.
pub struct HttpSignalSource {
    kind: SignalKind,
    url: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl HttpSignalSource {
    /// Returns `Ok(None)` when the URL or credential is absent.
    pub fn from_config(
        kind: SignalKind,
        url: Option<&str>,
        api_key: Option<&str>,
        timeout: StdDuration,
    ) -> Result<Option<Self>, SurgeError> {
        let (Some(url), Some(api_key)) = (url, api_key) else {
            debug!(source = %DataSource::Social, "{} source disabled (no url or credential)", kind.as_str());
            return Ok(None);
        };
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Some(Self { kind, url: url.to_string(), api_key: api_key.to_string(), client }))
    }
}

impl SignalSource for HttpSignalSource {
    fn kind(&self) -> SignalKind {
        self.kind
    }

    fn fetch(&self, venue: &Venue) -> Result<SignalReading, SurgeError> {
        let response = self
            .client
            .get(&self.url)
            .bearer_auth(&self.api_key)
            .query(&[
                ("venue_id", venue.id.clone()),
                ("name", venue.name.clone()),
                ("lat", venue.latitude.to_string()),
                ("lon", venue.longitude.to_string()),
            ])
            .send()?;

        if !response.status().is_success() {
            return Err(SurgeError::HttpStatus {
                endpoint: self.kind.as_str().to_string(),
                status: response.status().as_u16(),
            });
        }
        parse_reading(self.kind, &response.text()?)
    }
}

// ============================================================================
// Composite scoring
// ============================================================================

/// Folds component readings into `composite_signal`, in `[0, 1]`.
pub fn composite_signal(signals: &SocialSignals, weights: &SocialWeights, attendance_norm: f64) -> f64 {
    let trend = clamp_finite(signals.search_trend_score / 100.0, 0.0, 1.0);
    let virality = clamp_finite(signals.mention_virality, 0.0, 1.0);
    let events = if attendance_norm > 0.0 {
        clamp_finite(signals.nearby_event_attendance as f64 / attendance_norm, 0.0, 1.0)
    } else {
        0.0
    };
    clamp_finite(weights.virality * virality + weights.trend * trend + weights.events * events, 0.0, 1.0)
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Clone)]
struct CachedSignals {
    signals: SocialSignals,
    fetched_at: DateTime<Utc>,
}

/// Per-venue signal cache with a fixed freshness window.
#[derive(Debug)]
pub struct SignalCache {
    entries: DashMap<String, CachedSignals>,
    ttl: Duration,
}

impl SignalCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn get(&self, venue_id: &str, now: DateTime<Utc>) -> Option<SocialSignals> {
        let entry = self.entries.get(venue_id)?;
        (now - entry.fetched_at < self.ttl).then(|| entry.signals.clone())
    }

    pub fn insert(&self, venue_id: &str, signals: SocialSignals, now: DateTime<Utc>) {
        self.entries.insert(venue_id.to_string(), CachedSignals { signals, fetched_at: now });
    }
}

// ============================================================================
// Aggregator
// ============================================================================

pub struct SocialSignalAggregator {
    sources: Vec<Box<dyn SignalSource>>,
    cache: SignalCache,
    config: SharedConfig,
    clock: SharedClock,
    attendance_norm: f64,
}

impl SocialSignalAggregator {
    pub fn new(
        sources: Vec<Box<dyn SignalSource>>,
        config: SharedConfig,
        clock: SharedClock,
        cache_ttl: Duration,
        attendance_norm: f64,
    ) -> Self {
        Self { sources, cache: SignalCache::new(cache_ttl), config, clock, attendance_norm }
    }

    /// An aggregator with no sources: always the zero signal.
    pub fn disabled(config: SharedConfig, clock: SharedClock) -> Self {
        Self::new(Vec::new(), config, clock, Duration::minutes(15), 5_000.0)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Current composite signal for `venue`. Never fails.
    pub fn get_composite_signal(&self, venue: &Venue) -> SocialSignals {
        let now = self.clock.now();
        if let Some(cached) = self.cache.get(&venue.id, now) {
            return cached;
        }

        let mut signals = SocialSignals::none();
        for source in &self.sources {
            match source.fetch(venue) {
                Ok(SignalReading::Trend { score }) => signals.search_trend_score = score,
                Ok(SignalReading::Mentions { count, virality }) => {
                    signals.mention_count = count;
                    signals.mention_virality = virality;
                }
                Ok(SignalReading::Events { count, attendance }) => {
                    signals.nearby_event_count = count;
                    signals.nearby_event_attendance = attendance;
                }
                Err(e) => log_upstream_failure(DataSource::Social, Some(&venue.id), source.kind().as_str(), &e),
            }
        }
        let weights = self.config.snapshot().social_weights;
        signals.composite_signal = composite_signal(&signals, &weights, self.attendance_norm);

        self.cache.insert(&venue.id, signals.clone(), now);
        signals
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedSource {
        reading: Option<SignalReading>,
        kind: SignalKind,
        calls: Arc<AtomicUsize>,
    }

    impl SignalSource for FixedSource {
        fn kind(&self) -> SignalKind {
            self.kind
        }

        fn fetch(&self, _venue: &Venue) -> Result<SignalReading, SurgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reading.ok_or_else(|| SurgeError::HttpStatus { endpoint: self.kind.as_str().into(), status: 503 })
        }
    }

    fn venue() -> Venue {
        Venue::new("v1", "Ramen Shop", 41.88, -87.63)
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 14, 18, 0, 0).unwrap()))
    }

    #[test]
    fn test_composite_uses_fixed_weights() {
        let signals = SocialSignals {
            search_trend_score: 50.0,
            mention_virality: 0.8,
            nearby_event_attendance: 2_500,
            ..Default::default()
        };
        let c = composite_signal(&signals, &SocialWeights::default(), 5_000.0);
        assert!((c - (0.45 * 0.8 + 0.30 * 0.5 + 0.25 * 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_composite_is_bounded() {
        let signals = SocialSignals {
            search_trend_score: 400.0,
            mention_virality: 3.0,
            nearby_event_attendance: 1_000_000,
            ..Default::default()
        };
        assert_eq!(composite_signal(&signals, &SocialWeights::default(), 5_000.0), 1.0);
        assert_eq!(composite_signal(&SocialSignals::none(), &SocialWeights::default(), 5_000.0), 0.0);
    }

    #[test]
    fn test_failed_source_contributes_zero() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sources: Vec<Box<dyn SignalSource>> = vec![
            Box::new(FixedSource {
                reading: Some(SignalReading::Trend { score: 100.0 }),
                kind: SignalKind::Trend,
                calls: calls.clone(),
            }),
            Box::new(FixedSource { reading: None, kind: SignalKind::Mentions, calls: calls.clone() }),
        ];
        let aggregator =
            SocialSignalAggregator::new(sources, SharedConfig::default(), clock(), Duration::minutes(15), 5_000.0);
        let signals = aggregator.get_composite_signal(&venue());
        assert_eq!(signals.mention_virality, 0.0);
        assert!((signals.composite_signal - 0.30).abs() < 1e-12);
    }

    #[test]
    fn test_cache_serves_within_window_and_refetches_after() {
        let calls = Arc::new(AtomicUsize::new(0));
        let clock = clock();
        let sources: Vec<Box<dyn SignalSource>> = vec![Box::new(FixedSource {
            reading: Some(SignalReading::Mentions { count: 40, virality: 0.9 }),
            kind: SignalKind::Mentions,
            calls: calls.clone(),
        })];
        let aggregator =
            SocialSignalAggregator::new(sources, SharedConfig::default(), clock.clone(), Duration::minutes(15), 5_000.0);

        aggregator.get_composite_signal(&venue());
        clock.advance(Duration::minutes(14));
        aggregator.get_composite_signal(&venue());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::minutes(1));
        aggregator.get_composite_signal(&venue());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disabled_aggregator_returns_zero_signal() {
        let aggregator = SocialSignalAggregator::disabled(SharedConfig::default(), clock());
        assert_eq!(aggregator.source_count(), 0);
        assert_eq!(aggregator.get_composite_signal(&venue()), SocialSignals::none());
    }

    #[test]
    fn test_missing_credential_disables_http_source() {
        let source = HttpSignalSource::from_config(
            SignalKind::Trend,
            Some("https://trends.example.com/score"),
            None,
            StdDuration::from_secs(5),
        )
        .expect("no client error");
        assert!(source.is_none());
    }

    #[test]
    fn test_parse_reading_clamps_out_of_range_values() {
        let trend = parse_reading(SignalKind::Trend, r#"{"score": 140}"#).unwrap();
        assert_eq!(trend, SignalReading::Trend { score: 100.0 });
        let mentions = parse_reading(SignalKind::Mentions, r#"{"mention_count": 12, "virality": -0.5}"#).unwrap();
        assert_eq!(mentions, SignalReading::Mentions { count: 12, virality: 0.0 });
        assert!(parse_reading(SignalKind::Events, r#"{"event_count": 1}"#).is_err());
    }
}
