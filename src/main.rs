//! `surgemon` daemon.
//!
//! Usage: `surgemon [path/to/surgemon.toml]`
//!
//! Reads credentials from the environment (or `.env`), wires the HTTP
//! clients, and runs the orchestrator until the engine enters ERROR, at
//! which point the process exits non-zero so a supervisor can restart it.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::{debug, error, info, warn};

use surgemon_service::alert::{ChatNarrativeEnricher, LoggingSink, NarrativeEnricher, NoopEnricher};
use surgemon_service::clock::{SharedClock, SystemClock};
use surgemon_service::config::{Credentials, ServiceConfig, SharedConfig};
use surgemon_service::ingest::api::HttpDemandApi;
use surgemon_service::ingest::fallback::BaselineDemandModel;
use surgemon_service::ingest::social::{HttpSignalSource, SignalKind, SignalSource, SocialSignalAggregator};
use surgemon_service::logging::{init_logger, DataSource};
use surgemon_service::model::SurgeError;
use surgemon_service::orchestrator::{EngineParts, EngineState, Orchestrator};
use surgemon_service::store::InMemoryMetricsStore;

const DEFAULT_CONFIG_PATH: &str = "surgemon.toml";
const STATUS_POLL: StdDuration = StdDuration::from_secs(30);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let file_present = Path::new(&path).exists();
    let service = if file_present { ServiceConfig::load(&path)? } else { ServiceConfig::default() };

    init_logger(service.logging.level, service.logging.file.as_deref(), service.logging.json)?;
    if file_present {
        info!(source = %DataSource::System, "loaded configuration from {}", path);
    } else {
        warn!(source = %DataSource::System, "{} not found; running with defaults", path);
    }

    let credentials = Credentials::from_env();
    info!(source = %DataSource::System, ?credentials, "credentials resolved");

    let clock: SharedClock = Arc::new(SystemClock);
    let config = SharedConfig::new(service.engine.clone())?;

    let api = HttpDemandApi::new(&service.api.base_url, StdDuration::from_secs(service.api.timeout_secs))?;
    let social = build_social(&service, &credentials, config.clone(), clock.clone())?;
    let enricher = build_enricher(&service, &credentials)?;
    let store = InMemoryMetricsStore::new(clock.clone());

    let parts = EngineParts {
        api: Arc::new(api),
        model: Arc::new(BaselineDemandModel::default()),
        social: Arc::new(social),
        store: Arc::new(store),
        enricher,
    };
    let orchestrator = Orchestrator::new(parts, config, clock);
    orchestrator.register_alert_sink(Arc::new(LoggingSink));
    orchestrator.start()?;
    info!(
        source = %DataSource::System,
        interval_secs = service.engine.check_interval_seconds,
        "surgemon running"
    );

    loop {
        thread::sleep(STATUS_POLL);
        let status = orchestrator.get_status();
        debug!(source = %DataSource::System, state = %status.state, cycles = status.cycles_run, "status");
        if status.state == EngineState::Error {
            error!(source = %DataSource::System, "engine in ERROR; exiting");
            orchestrator.stop();
            return Err(SurgeError::InvalidState("venue list unavailable".to_string()).into());
        }
    }
}

fn build_social(
    service: &ServiceConfig,
    credentials: &Credentials,
    config: SharedConfig,
    clock: SharedClock,
) -> Result<SocialSignalAggregator, SurgeError> {
    let timeout = StdDuration::from_secs(service.social.timeout_secs);
    let wanted = [
        (SignalKind::Trend, &service.social.trend_url, &credentials.trend_api_key),
        (SignalKind::Mentions, &service.social.mention_url, &credentials.mention_api_key),
        (SignalKind::Events, &service.social.events_url, &credentials.events_api_key),
    ];

    let mut sources: Vec<Box<dyn SignalSource>> = Vec::new();
    for (kind, url, key) in wanted {
        if let Some(source) = HttpSignalSource::from_config(kind, url.as_deref(), key.as_deref(), timeout)? {
            sources.push(Box::new(source));
        }
    }
    info!(source = %DataSource::Social, "{} of 3 social sources enabled", sources.len());

    Ok(SocialSignalAggregator::new(
        sources,
        config,
        clock,
        Duration::minutes(service.social.cache_minutes),
        service.social.attendance_norm,
    ))
}

fn build_enricher(service: &ServiceConfig, credentials: &Credentials) -> Result<Arc<dyn NarrativeEnricher>, SurgeError> {
    match credentials.reasoning_api_key.as_deref() {
        Some(key) => {
            let enricher = ChatNarrativeEnricher::new(
                &service.reasoning.endpoint,
                &service.reasoning.model,
                key,
                StdDuration::from_secs(service.reasoning.timeout_secs),
            )?;
            info!(source = %DataSource::Reasoning, model = %service.reasoning.model, "narrative enrichment enabled");
            Ok(Arc::new(enricher))
        }
        None => {
            info!(source = %DataSource::Reasoning, "no reasoning credential; alerts go out without narrative");
            Ok(Arc::new(NoopEnricher))
        }
    }
}
