//! Layer 4: the orchestrator.
//!
//! Drives Collector -> Detector -> Dispatcher for every active venue on a
//! fixed cadence and owns the engine lifecycle:
//!
//! ```text
//! STOPPED --start--> RUNNING <--pause/resume--> PAUSED
//!                       |
//!                       +-- venue list fails N times in a row --> ERROR
//! ERROR --start--> RUNNING          any --stop--> STOPPED
//! ```
//!
//! Per-venue failures (errors and panics) are recorded in the cycle's error
//! list and never abort the tick. Only a systemic venue-list outage is
//! surfaced as state.

mod history;
mod scheduler;

pub use history::CycleHistory;

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::alert::dispatcher::{AlertDispatcher, AlertSink, DeliveryStatus, DispatchReport};
use crate::alert::narrative::NarrativeEnricher;
use crate::analysis::detector::{validate_metrics, SurgeDetector};
use crate::clock::{hour_bucket, SharedClock};
use crate::collector::DataCollector;
use crate::config::{ConfigUpdate, SharedConfig, SurgeConfig};
use crate::ingest::api::DemandApi;
use crate::ingest::fallback::DemandModel;
use crate::ingest::social::SocialSignalAggregator;
use crate::logging::{log_collection_summary, log_upstream_failure, DataSource};
use crate::model::{CollectionSummary, CycleRecord, SurgeError, SurgeEvent, SurgeMetric, Venue};
use crate::store::MetricsStore;
use scheduler::Scheduler;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
    Paused,
    Error,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineState::Stopped => "STOPPED",
            EngineState::Running => "RUNNING",
            EngineState::Paused => "PAUSED",
            EngineState::Error => "ERROR",
        })
    }
}

/// Operator-facing snapshot of the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Unset unless the scheduler is running.
    pub next_tick_at: Option<DateTime<Utc>>,
    pub cycles_run: u64,
    pub consecutive_fetch_failures: u32,
    pub config: SurgeConfig,
}

/// The external collaborators an engine is assembled from.
pub struct EngineParts {
    pub api: Arc<dyn DemandApi>,
    pub model: Arc<dyn DemandModel>,
    pub social: Arc<SocialSignalAggregator>,
    pub store: Arc<dyn MetricsStore>,
    pub enricher: Arc<dyn NarrativeEnricher>,
}

/// Caller-supplied metrics for a manual check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualCheckRequest {
    pub venue: Venue,
    pub metrics: Vec<SurgeMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualCheckResult {
    pub venue_id: String,
    pub event: Option<SurgeEvent>,
    /// Present whenever `event` is.
    pub dispatch: Option<DispatchReport>,
}

// ---------------------------------------------------------------------------
// Engine internals shared with the scheduler thread
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Runtime {
    state: EngineState,
    last_cycle_at: Option<DateTime<Utc>>,
    next_tick_at: Option<DateTime<Utc>>,
    cycles_run: u64,
    consecutive_fetch_failures: u32,
}

pub(crate) struct Engine {
    api: Arc<dyn DemandApi>,
    collector: DataCollector,
    detector: SurgeDetector,
    dispatcher: AlertDispatcher,
    store: Arc<dyn MetricsStore>,
    config: SharedConfig,
    clock: SharedClock,
    runtime: Mutex<Runtime>,
    history: Mutex<CycleHistory>,
    /// Rebuilt whenever `worker_pool_size` changes.
    workers: Mutex<Option<Arc<ThreadPool>>>,
}

struct VenueOutcome {
    collected: bool,
    surge: bool,
    errors: Vec<String>,
}

impl Engine {
    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn history(&self) -> MutexGuard<'_, CycleHistory> {
        self.history.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The venue worker pool, sized to `size` threads.
    fn worker_pool(&self, size: usize) -> Result<Arc<ThreadPool>, SurgeError> {
        let mut slot = self.workers.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(pool) = slot.as_ref().filter(|pool| pool.current_num_threads() == size) {
            return Ok(pool.clone());
        }
        let pool = Arc::new(build_worker_pool(size)?);
        debug!(source = %DataSource::System, size, "worker pool built");
        *slot = Some(pool.clone());
        Ok(pool)
    }

    pub(crate) fn state(&self) -> EngineState {
        self.runtime().state
    }

    pub(crate) fn schedule_next(&self, interval: std::time::Duration) {
        let next = chrono::Duration::from_std(interval).ok().map(|d| self.clock.now() + d);
        self.runtime().next_tick_at = next;
    }

    pub(crate) fn clear_next_tick(&self) {
        self.runtime().next_tick_at = None;
    }

    /// One full cycle. `None` when the engine is stopped or in error.
    pub(crate) fn tick(&self) -> Option<CycleRecord> {
        let started_at = self.clock.now();
        let config = self.config.snapshot();

        match self.state() {
            EngineState::Stopped | EngineState::Error => return None,
            EngineState::Paused => {
                debug!(source = %DataSource::System, "paused; skipping cycle work");
                return Some(self.finish_cycle(started_at, 0, 0, Vec::new(), &config));
            }
            EngineState::Running => {}
        }

        let venues = match self.api.active_venues() {
            Ok(venues) => {
                self.runtime().consecutive_fetch_failures = 0;
                venues
            }
            Err(e) => return Some(self.venue_fetch_failed(started_at, &e, &config)),
        };

        let checked = venues.len();
        let outcomes: Vec<VenueOutcome> = match self.worker_pool(config.worker_pool_size) {
            Ok(pool) => {
                pool.install(|| venues.par_iter().map(|venue| self.process_venue_isolated(venue, &config)).collect())
            }
            Err(e) => {
                error!(source = %DataSource::System, "{}; processing venues sequentially", e);
                venues.iter().map(|venue| self.process_venue_isolated(venue, &config)).collect()
            }
        };

        let collected = outcomes.iter().filter(|o| o.collected).count();
        log_collection_summary(&CollectionSummary { successful: collected, failed: checked - collected, total: checked });

        let surges = outcomes.iter().filter(|o| o.surge).count();
        let errors: Vec<String> = outcomes.into_iter().flat_map(|o| o.errors).collect();

        match self.store.purge_expired() {
            Ok(0) => {}
            Ok(n) => debug!(source = %DataSource::Store, "purged {} expired metrics", n),
            Err(e) => log_upstream_failure(DataSource::Store, None, "purge expired", &e),
        }
        self.detector.cooldowns().prune(self.clock.now(), config.cooldown());

        Some(self.finish_cycle(started_at, checked, surges, errors, &config))
    }

    fn venue_fetch_failed(&self, started_at: DateTime<Utc>, err: &SurgeError, config: &SurgeConfig) -> CycleRecord {
        log_upstream_failure(DataSource::Venues, None, "active venue fetch", err);
        let mut errors = vec![format!("venue list: {}", err)];
        {
            let mut rt = self.runtime();
            rt.consecutive_fetch_failures += 1;
            let failures = rt.consecutive_fetch_failures;
            if failures >= config.max_venue_fetch_failures && rt.state == EngineState::Running {
                rt.state = EngineState::Error;
                rt.next_tick_at = None;
                error!(source = %DataSource::System, failures, "venue list unavailable; engine entering ERROR");
                errors.push(format!("engine entered ERROR after {} consecutive venue list failures", failures));
            }
        }
        self.finish_cycle(started_at, 0, 0, errors, config)
    }

    fn finish_cycle(
        &self,
        started_at: DateTime<Utc>,
        venues_checked: usize,
        surges_detected: usize,
        errors: Vec<String>,
        config: &SurgeConfig,
    ) -> CycleRecord {
        let finished_at = self.clock.now();
        let record = CycleRecord { started_at, finished_at, venues_checked, surges_detected, errors };
        {
            let mut rt = self.runtime();
            rt.last_cycle_at = Some(finished_at);
            rt.cycles_run += 1;
        }
        self.history().push(record.clone(), config.history_limit);
        info!(
            source = %DataSource::System,
            venues_checked,
            surges_detected,
            errors = record.errors.len(),
            "cycle complete"
        );
        record
    }

    fn process_venue_isolated(&self, venue: &Venue, config: &SurgeConfig) -> VenueOutcome {
        match catch_unwind(AssertUnwindSafe(|| self.process_venue(venue, config))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(source = %DataSource::System, venue = %venue.id, "venue pipeline panicked: {}", reason);
                VenueOutcome {
                    collected: false,
                    surge: false,
                    errors: vec![format!("{}: pipeline panicked: {}", venue.id, reason)],
                }
            }
        }
    }

    /// Collect -> detect -> dispatch for one venue, strictly in that order.
    fn process_venue(&self, venue: &Venue, config: &SurgeConfig) -> VenueOutcome {
        let mut errors = Vec::new();

        // The collector has already logged its failure under the right source.
        let (collected, window) = match self.collector.collect(venue) {
            Ok(_) | Err(SurgeError::NoData(_)) => match self.recent_window(&venue.id, config) {
                Ok(window) => (true, Some(window)),
                Err(e) => {
                    log_upstream_failure(DataSource::Store, Some(&venue.id), "window read", &e);
                    errors.push(format!("{}: window read failed: {}", venue.id, e));
                    (true, None)
                }
            },
            Err(e) => {
                errors.push(format!("{}: collection failed: {}", venue.id, e));
                (false, config.demo_fallback.then(|| self.collector.simulated_window(venue)))
            }
        };

        let Some(window) = window else {
            return VenueOutcome { collected, surge: false, errors };
        };

        let mut surge = false;
        if let Some(event) = self.detector.check_surge(&venue.id, &window) {
            surge = true;
            let report = self.dispatcher.build_and_dispatch(&event, venue);
            errors.extend(delivery_error(&venue.id, &report.delivery));
        }
        VenueOutcome { collected, surge, errors }
    }

    /// Stored buckets for the last `window_hours` hours, ending with the
    /// current one. Older buckets never stand in for missing recent ones.
    fn recent_window(&self, venue_id: &str, config: &SurgeConfig) -> Result<Vec<SurgeMetric>, SurgeError> {
        let end = hour_bucket(self.clock.now());
        let start = end - Duration::hours(i64::from(config.window_hours) - 1);
        self.store.range(venue_id, start, end)
    }
}

fn build_worker_pool(size: usize) -> Result<ThreadPool, SurgeError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(size)
        .thread_name(|i| format!("surgemon-worker-{}", i))
        .build()
        .map_err(|e| SurgeError::InvalidState(format!("cannot build worker pool: {}", e)))
}

fn delivery_error(venue_id: &str, status: &DeliveryStatus) -> Option<String> {
    match status {
        DeliveryStatus::Delivered => None,
        DeliveryStatus::NoSink => Some(format!("{}: alert not delivered: no sink registered", venue_id)),
        DeliveryStatus::Failed(reason) => Some(format!("{}: {}", venue_id, reason)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    engine: Arc<Engine>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl Orchestrator {
    /// Assembles the pipeline. Every stage shares `config` and `clock`.
    pub fn new(parts: EngineParts, config: SharedConfig, clock: SharedClock) -> Self {
        let EngineParts { api, model, social, store, enricher } = parts;
        let collector = DataCollector::new(api.clone(), model, social, store.clone(), config.clone(), clock.clone());
        let detector = SurgeDetector::new(config.clone(), clock.clone());
        let dispatcher = AlertDispatcher::new(enricher, config.clone(), clock.clone());

        let engine = Engine {
            api,
            collector,
            detector,
            dispatcher,
            store,
            config,
            clock,
            runtime: Mutex::new(Runtime::default()),
            history: Mutex::new(CycleHistory::new()),
            workers: Mutex::new(None),
        };
        Self { engine: Arc::new(engine), scheduler: Mutex::new(None) }
    }

    fn scheduler(&self) -> MutexGuard<'_, Option<Scheduler>> {
        self.scheduler.lock().unwrap_or_else(|p| p.into_inner())
    }

    // -- lifecycle ----------------------------------------------------------

    /// STOPPED or ERROR -> RUNNING. The first scheduled tick fires one
    /// interval from now.
    pub fn start(&self) -> Result<(), SurgeError> {
        let mut scheduler = self.scheduler();
        let current = self.engine.state();
        if !matches!(current, EngineState::Stopped | EngineState::Error) {
            return Err(SurgeError::InvalidState(format!("cannot start from {}", current)));
        }
        // A loop that exited on ERROR still has to be joined.
        if let Some(previous) = scheduler.take() {
            previous.shutdown();
        }
        {
            let mut rt = self.engine.runtime();
            rt.state = EngineState::Running;
            rt.consecutive_fetch_failures = 0;
        }
        self.engine.schedule_next(self.engine.config.snapshot().check_interval());
        match Scheduler::spawn(self.engine.clone()) {
            Ok(handle) => {
                *scheduler = Some(handle);
                info!(source = %DataSource::System, from = %current, "engine started");
                Ok(())
            }
            Err(e) => {
                self.engine.runtime().state = EngineState::Stopped;
                self.engine.clear_next_tick();
                Err(e)
            }
        }
    }

    /// Any state -> STOPPED. Waits for an in-flight cycle to finish.
    pub fn stop(&self) {
        let mut scheduler = self.scheduler();
        let previous = {
            let mut rt = self.engine.runtime();
            std::mem::replace(&mut rt.state, EngineState::Stopped)
        };
        if let Some(handle) = scheduler.take() {
            handle.shutdown();
        }
        self.engine.clear_next_tick();
        if previous != EngineState::Stopped {
            info!(source = %DataSource::System, from = %previous, "engine stopped");
        }
    }

    /// RUNNING -> PAUSED. Ticks keep firing but do no work.
    pub fn pause(&self) -> Result<(), SurgeError> {
        self.transition(EngineState::Running, EngineState::Paused)
    }

    /// PAUSED -> RUNNING.
    pub fn resume(&self) -> Result<(), SurgeError> {
        self.transition(EngineState::Paused, EngineState::Running)
    }

    fn transition(&self, from: EngineState, to: EngineState) -> Result<(), SurgeError> {
        let mut rt = self.engine.runtime();
        if rt.state != from {
            return Err(SurgeError::InvalidState(format!("cannot move to {} from {}", to, rt.state)));
        }
        rt.state = to;
        info!(source = %DataSource::System, "engine {} -> {}", from, to);
        Ok(())
    }

    /// Runs one cycle now, exactly as a scheduled tick would.
    pub fn tick(&self) -> Option<CycleRecord> {
        self.engine.tick()
    }

    // -- observability ------------------------------------------------------

    pub fn get_status(&self) -> EngineStatus {
        let config = self.engine.config.snapshot();
        let rt = self.engine.runtime();
        EngineStatus {
            state: rt.state,
            last_cycle_at: rt.last_cycle_at,
            next_tick_at: rt.next_tick_at,
            cycles_run: rt.cycles_run,
            consecutive_fetch_failures: rt.consecutive_fetch_failures,
            config,
        }
    }

    /// The last `n` cycle records, oldest first.
    pub fn get_history(&self, n: usize) -> Vec<CycleRecord> {
        self.engine.history().last(n)
    }

    // -- configuration ------------------------------------------------------

    pub fn get_config(&self) -> SurgeConfig {
        self.engine.config.snapshot()
    }

    /// Validates and applies `update`. A new check interval takes effect
    /// immediately on a running scheduler.
    pub fn update_config(&self, update: &ConfigUpdate) -> Result<SurgeConfig, SurgeError> {
        let before = self.engine.config.snapshot().check_interval_seconds;
        let next = self.engine.config.apply(update)?;
        info!(source = %DataSource::System, ?update, "configuration updated");
        if next.check_interval_seconds != before {
            if let Some(handle) = self.scheduler().as_ref() {
                handle.reschedule();
            }
        }
        Ok(next)
    }

    // -- manual checks ------------------------------------------------------

    /// Detector + Dispatcher on caller-supplied metrics. The collector and
    /// store are bypassed; cooldown applies as usual.
    ///
    /// Metrics must sit on hour boundaries with at most one per bucket;
    /// anything else is rejected before detection.
    pub fn check_manual(&self, venue: &Venue, metrics: &[SurgeMetric]) -> Result<ManualCheckResult, SurgeError> {
        validate_metrics(&venue.id, metrics)?;
        let event = self.engine.detector.check_surge(&venue.id, metrics);
        let dispatch = event.as_ref().map(|e| self.engine.dispatcher.build_and_dispatch(e, venue));
        Ok(ManualCheckResult { venue_id: venue.id.clone(), event, dispatch })
    }

    /// One result per request, in request order.
    pub fn check_batch(&self, requests: &[ManualCheckRequest]) -> Vec<Result<ManualCheckResult, SurgeError>> {
        requests.iter().map(|r| self.check_manual(&r.venue, &r.metrics)).collect()
    }

    pub fn register_alert_sink(&self, sink: Arc<dyn AlertSink>) {
        self.engine.dispatcher.register_sink(sink);
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let slot = self.scheduler.get_mut().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = slot.take() {
            handle.shutdown();
        }
    }
}
