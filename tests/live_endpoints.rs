//! Smoke tests against a real demand backend and reasoning service.
//!
//! These make live HTTP calls and are ignored by default. Point them at a
//! deployment through `.env`:
//!
//! - `SURGEMON_API_URL`   base URL serving `/venues/active`, `/orders/query`
//!   and `/predictions/query`
//! - `REASONING_API_KEY`  for the narrative test
//!
//! Run with: cargo test --test live_endpoints -- --ignored --test-threads=1

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use surgemon_service::alert::narrative::{ChatNarrativeEnricher, NarrativeEnricher};
use surgemon_service::config::{Credentials, ReasoningSection};
use surgemon_service::ingest::api::{DemandApi, HttpDemandApi};
use surgemon_service::model::{RootCause, Severity, SurgeEvent, Trend, Venue};

fn demand_api() -> HttpDemandApi {
    dotenv::dotenv().ok();
    let base = std::env::var("SURGEMON_API_URL").expect("SURGEMON_API_URL must be set");
    HttpDemandApi::new(&base, StdDuration::from_secs(5)).expect("client builds")
}

#[test]
#[ignore]
fn test_live_venue_list_and_window() {
    let api = demand_api();
    let venues = api.active_venues().expect("venue list reachable");
    println!("{} active venues", venues.len());
    assert!(!venues.is_empty(), "backend reported no active venues");

    let end = Utc::now();
    let start = end - Duration::hours(3);
    let first = &venues[0];
    let orders = api.query_orders(&first.id, start, end).expect("orders reachable");
    let predictions = api.query_predictions(&first.id, start, end).expect("predictions reachable");
    println!("{}: {} order buckets, {} prediction buckets", first.id, orders.len(), predictions.len());
    for counts in orders.values() {
        assert!(counts.item_count >= 0.0);
    }
}

#[test]
#[ignore]
fn test_live_narrative_enrichment() {
    dotenv::dotenv().ok();
    let key = Credentials::from_env().reasoning_api_key.expect("REASONING_API_KEY must be set");
    let section = ReasoningSection::default();
    let enricher = ChatNarrativeEnricher::new(
        &section.endpoint,
        &section.model,
        &key,
        StdDuration::from_secs(section.timeout_secs),
    )
    .expect("client builds");

    let now = Utc::now();
    let event = SurgeEvent {
        venue_id: "smoke".to_string(),
        detected_at: now,
        severity: Severity::Critical,
        risk_score: 0.85,
        avg_ratio: 3.4,
        trend: Trend::Accelerating,
        root_cause: RootCause::SocialMediaTrending,
        recommendations: vec![],
        window_start: now - Duration::hours(2),
        window_end: now,
    };
    let venue = Venue::new("smoke", "Smoke Test Noodle Bar", 41.88, -87.63);

    let narrative = enricher.narrate(&event, &venue).expect("reasoning service reachable");
    println!("{:?}", narrative);
    assert!(narrative.is_some_and(|text| !text.is_empty()));
}
