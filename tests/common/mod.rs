//! Shared fakes for the integration tests.
//!
//! Nothing here touches the network or sleeps: the demand backend is an
//! in-memory fake and time comes from a `ManualClock`.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};

use surgemon_service::alert::{AlertSink, NoopEnricher};
use surgemon_service::clock::{ManualClock, SharedClock};
use surgemon_service::config::{SharedConfig, SurgeConfig};
use surgemon_service::ingest::api::{DemandApi, HourlySeries, OrderCounts, PredictedCounts};
use surgemon_service::ingest::fallback::BaselineDemandModel;
use surgemon_service::ingest::social::SocialSignalAggregator;
use surgemon_service::model::{Alert, SocialSignals, SurgeError, SurgeMetric, Venue};
use surgemon_service::orchestrator::{EngineParts, Orchestrator};
use surgemon_service::store::InMemoryMetricsStore;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Top of the hour, so a 3-hour window spans buckets 15:00..=18:00.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 18, 0, 0).unwrap()
}

pub fn venue(id: &str) -> Venue {
    Venue::new(id, &format!("Venue {}", id), 41.88, -87.63)
}

// ---------------------------------------------------------------------------
// Fake demand backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeDemandApi {
    venues: Mutex<Vec<Venue>>,
    venue_list_fails: AtomicBool,
    orders: Mutex<HashMap<String, HourlySeries<OrderCounts>>>,
    predictions: Mutex<HashMap<String, HourlySeries<PredictedCounts>>>,
    failing_orders: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    pub order_calls: AtomicUsize,
}

impl FakeDemandApi {
    pub fn with_venues(ids: &[&str]) -> Self {
        let api = Self::default();
        *api.venues.lock().unwrap() = ids.iter().map(|id| venue(id)).collect();
        api
    }

    /// Hourly (actual, predicted) items for the buckets ending at `end`.
    pub fn set_demand(&self, venue_id: &str, end: DateTime<Utc>, rows: &[(f64, f64)]) {
        let n = rows.len() as i64;
        let mut actual = HourlySeries::new();
        let mut predicted = HourlySeries::new();
        for (i, (a, p)) in rows.iter().enumerate() {
            let bucket = end - Duration::hours(n - 1 - i as i64);
            actual.insert(bucket, OrderCounts { item_count: *a, order_count: a / 3.0 });
            predicted.insert(bucket, PredictedCounts { item_count: *p, order_count: p / 3.0 });
        }
        self.orders.lock().unwrap().insert(venue_id.to_string(), actual);
        self.predictions.lock().unwrap().insert(venue_id.to_string(), predicted);
    }

    pub fn fail_orders_for(&self, venue_id: &str) {
        self.failing_orders.lock().unwrap().insert(venue_id.to_string());
    }

    pub fn panic_for(&self, venue_id: &str) {
        self.panicking.lock().unwrap().insert(venue_id.to_string());
    }

    pub fn set_venue_list_failing(&self, failing: bool) {
        self.venue_list_fails.store(failing, Ordering::SeqCst);
    }
}

impl DemandApi for FakeDemandApi {
    fn active_venues(&self) -> Result<Vec<Venue>, SurgeError> {
        if self.venue_list_fails.load(Ordering::SeqCst) {
            return Err(SurgeError::HttpStatus { endpoint: "/venues/active".to_string(), status: 503 });
        }
        Ok(self.venues.lock().unwrap().clone())
    }

    fn query_orders(
        &self,
        venue_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<HourlySeries<OrderCounts>, SurgeError> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        if self.panicking.lock().unwrap().contains(venue_id) {
            panic!("orders client bug for {}", venue_id);
        }
        if self.failing_orders.lock().unwrap().contains(venue_id) {
            return Err(SurgeError::HttpStatus { endpoint: "/orders/query".to_string(), status: 500 });
        }
        Ok(self.orders.lock().unwrap().get(venue_id).cloned().unwrap_or_default())
    }

    fn query_predictions(
        &self,
        venue_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<HourlySeries<PredictedCounts>, SurgeError> {
        Ok(self.predictions.lock().unwrap().get(venue_id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

pub type AlertLog = Arc<Mutex<Vec<(Alert, Venue)>>>;

pub fn recording_sink() -> (AlertLog, Arc<dyn AlertSink>) {
    let log: AlertLog = Arc::new(Mutex::new(Vec::new()));
    let seen = log.clone();
    let sink = move |alert: &Alert, venue: &Venue| -> Result<(), SurgeError> {
        seen.lock().unwrap().push((alert.clone(), venue.clone()));
        Ok(())
    };
    (log, Arc::new(sink))
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Metrics ending at `end`, one per (actual, predicted) row, no social signal.
pub fn window(end: DateTime<Utc>, rows: &[(f64, f64)]) -> Vec<SurgeMetric> {
    let n = rows.len() as i64;
    rows.iter()
        .enumerate()
        .map(|(i, (a, p))| {
            let at = end - Duration::hours(n - 1 - i as i64);
            SurgeMetric::new(at, *a, a / 3.0, *p, p / 3.0, SocialSignals::none())
        })
        .collect()
}

pub const SURGE_ROWS: [(f64, f64); 3] = [(200.0, 100.0), (220.0, 100.0), (250.0, 100.0)];
pub const QUIET_ROWS: [(f64, f64); 3] = [(100.0, 100.0), (100.0, 100.0), (100.0, 100.0)];

// ---------------------------------------------------------------------------
// Assembled engine
// ---------------------------------------------------------------------------

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub api: Arc<FakeDemandApi>,
    pub store: Arc<InMemoryMetricsStore>,
    pub config: SharedConfig,
    pub alerts: AlertLog,
    pub orchestrator: Orchestrator,
}

pub fn harness(api: FakeDemandApi, config: SurgeConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let shared_clock: SharedClock = clock.clone();
    let config = SharedConfig::new(config).expect("test config must be valid");
    let api = Arc::new(api);
    let store = Arc::new(InMemoryMetricsStore::new(shared_clock.clone()));
    let social = Arc::new(SocialSignalAggregator::disabled(config.clone(), shared_clock.clone()));

    let parts = EngineParts {
        api: api.clone(),
        model: Arc::new(BaselineDemandModel::default()),
        social,
        store: store.clone(),
        enricher: Arc::new(NoopEnricher),
    };
    let orchestrator = Orchestrator::new(parts, config.clone(), shared_clock);
    let (alerts, sink) = recording_sink();
    orchestrator.register_alert_sink(sink);

    Harness { clock, api, store, config, alerts, orchestrator }
}
