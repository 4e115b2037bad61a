/// Demand backend API client.
///
/// The engine performs no database access of its own; venues, actual order
/// telemetry and predicted demand all come from three JSON endpoints:
///
/// - `GET  /venues/active`      → `{ "venues": [{id, name, latitude, longitude}] }`
/// - `POST /orders/query`       → `{ "orders": { "<timestamp>": {item_count, order_count} } }`
/// - `POST /predictions/query`  → `{ "predictions": { "<timestamp>": {item_count_pred, order_count_pred} } }`
///
/// Timestamps are accepted as RFC 3339 or naive `YYYY-MM-DD[T ]HH:MM:SS`
/// (treated as UTC) and snapped to their hour bucket.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::hour_bucket;
use crate::model::{SurgeError, Venue};

// ============================================================================
// Bucketed counts
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderCounts {
    pub item_count: f64,
    pub order_count: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictedCounts {
    #[serde(rename = "item_count_pred")]
    pub item_count: f64,
    #[serde(rename = "order_count_pred")]
    pub order_count: f64,
}

pub type HourlySeries<T> = BTreeMap<DateTime<Utc>, T>;

/// The three calls the engine makes against the demand backend.
pub trait DemandApi: Send + Sync {
    fn active_venues(&self) -> Result<Vec<Venue>, SurgeError>;

    fn query_orders(
        &self,
        venue_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HourlySeries<OrderCounts>, SurgeError>;

    /// An empty series means "no predictions"; callers fall back locally.
    fn query_predictions(
        &self,
        venue_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HourlySeries<PredictedCounts>, SurgeError>;
}

// ============================================================================
// Wire structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct VenuesResponse {
    venues: Vec<Venue>,
}

#[derive(Debug, Serialize)]
struct WindowQuery<'a> {
    venue_id: &'a str,
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct OrdersResponse {
    #[serde(default)]
    orders: HashMap<String, OrderCounts>,
}

#[derive(Debug, Deserialize)]
struct PredictionsResponse {
    #[serde(default)]
    predictions: HashMap<String, PredictedCounts>,
}

// ============================================================================
// Parsing helpers
// ============================================================================

/// Parses a backend timestamp key into its UTC hour bucket.
pub fn parse_bucket(raw: &str) -> Result<DateTime<Utc>, SurgeError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(hour_bucket(dt.with_timezone(&Utc)));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(hour_bucket(DateTime::from_naive_utc_and_offset(naive, Utc)));
        }
    }
    Err(SurgeError::Parse(format!("unrecognised timestamp '{}'", raw)))
}

fn check_count(what: &str, key: &str, value: f64) -> Result<(), SurgeError> {
    if !value.is_finite() || value < 0.0 {
        return Err(SurgeError::Parse(format!("{} for {} must be a non-negative number, got {}", what, key, value)));
    }
    Ok(())
}

/// Folds raw keyed counts into hour buckets, summing keys that share a bucket.
pub fn bucket_orders(raw: HashMap<String, OrderCounts>) -> Result<HourlySeries<OrderCounts>, SurgeError> {
    let mut series = HourlySeries::new();
    for (key, counts) in raw {
        check_count("item_count", &key, counts.item_count)?;
        check_count("order_count", &key, counts.order_count)?;
        let slot: &mut OrderCounts = series.entry(parse_bucket(&key)?).or_default();
        slot.item_count += counts.item_count;
        slot.order_count += counts.order_count;
    }
    Ok(series)
}

pub fn bucket_predictions(
    raw: HashMap<String, PredictedCounts>,
) -> Result<HourlySeries<PredictedCounts>, SurgeError> {
    let mut series = HourlySeries::new();
    for (key, counts) in raw {
        check_count("item_count_pred", &key, counts.item_count)?;
        check_count("order_count_pred", &key, counts.order_count)?;
        let slot: &mut PredictedCounts = series.entry(parse_bucket(&key)?).or_default();
        slot.item_count += counts.item_count;
        slot.order_count += counts.order_count;
    }
    Ok(series)
}

// ============================================================================
// HTTP client
// ============================================================================

pub struct HttpDemandApi {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpDemandApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SurgeError> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn post_window<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        venue_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<T, SurgeError> {
        let body = WindowQuery { venue_id, start: start.to_rfc3339(), end: end.to_rfc3339() };
        let response = self
            .client
            .post(self.url(path))
            .header("Accept", "application/json")
            .json(&body)
            .send()?;

        if !response.status().is_success() {
            return Err(SurgeError::HttpStatus { endpoint: path.to_string(), status: response.status().as_u16() });
        }
        let text = response.text()?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl DemandApi for HttpDemandApi {
    fn active_venues(&self) -> Result<Vec<Venue>, SurgeError> {
        let path = "/venues/active";
        let response = self.client.get(self.url(path)).header("Accept", "application/json").send()?;

        if !response.status().is_success() {
            return Err(SurgeError::HttpStatus { endpoint: path.to_string(), status: response.status().as_u16() });
        }
        let text = response.text()?;
        parse_venues(&text)
    }

    fn query_orders(
        &self,
        venue_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HourlySeries<OrderCounts>, SurgeError> {
        let response: OrdersResponse = self.post_window("/orders/query", venue_id, start, end)?;
        bucket_orders(response.orders)
    }

    fn query_predictions(
        &self,
        venue_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HourlySeries<PredictedCounts>, SurgeError> {
        let response: PredictionsResponse = self.post_window("/predictions/query", venue_id, start, end)?;
        bucket_predictions(response.predictions)
    }
}

/// Parses and validates a `/venues/active` body.
pub fn parse_venues(body: &str) -> Result<Vec<Venue>, SurgeError> {
    let response: VenuesResponse = serde_json::from_str(body)?;
    for venue in &response.venues {
        venue.validate()?;
    }
    Ok(response.venues)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_bucket_accepts_backend_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 14, 18, 0, 0).unwrap();
        assert_eq!(parse_bucket("2026-03-14T18:00:00Z").unwrap(), expected);
        assert_eq!(parse_bucket("2026-03-14T13:25:00-05:00").unwrap(), expected);
        assert_eq!(parse_bucket("2026-03-14 18:59:59").unwrap(), expected);
        assert_eq!(parse_bucket("2026-03-14T18:30").unwrap(), expected);
        assert!(parse_bucket("yesterday").is_err());
    }

    #[test]
    fn test_orders_body_buckets_and_sums() {
        let body = r#"{"orders": {
            "2026-03-14T18:05:00Z": {"item_count": 40, "order_count": 12},
            "2026-03-14T18:45:00Z": {"item_count": 60, "order_count": 18},
            "2026-03-14T19:00:00Z": {"item_count": 90, "order_count": 25}
        }}"#;
        let response: OrdersResponse = serde_json::from_str(body).unwrap();
        let series = bucket_orders(response.orders).unwrap();
        assert_eq!(series.len(), 2);
        let first = series.values().next().unwrap();
        assert_eq!(first.item_count, 100.0);
        assert_eq!(first.order_count, 30.0);
    }

    #[test]
    fn test_empty_predictions_object_parses_to_empty_series() {
        let response: PredictionsResponse = serde_json::from_str(r#"{"predictions": {}}"#).unwrap();
        assert!(bucket_predictions(response.predictions).unwrap().is_empty());

        let missing: PredictionsResponse = serde_json::from_str("{}").unwrap();
        assert!(missing.predictions.is_empty());
    }

    #[test]
    fn test_prediction_field_names_follow_wire_format() {
        let body = r#"{"predictions": {"2026-03-14T18:00:00Z": {"item_count_pred": 95.5, "order_count_pred": 30}}}"#;
        let response: PredictionsResponse = serde_json::from_str(body).unwrap();
        let series = bucket_predictions(response.predictions).unwrap();
        assert_eq!(series.values().next().unwrap().item_count, 95.5);
    }

    #[test]
    fn test_negative_counts_are_rejected() {
        let mut raw = HashMap::new();
        raw.insert("2026-03-14T18:00:00Z".to_string(), OrderCounts { item_count: -1.0, order_count: 0.0 });
        assert!(matches!(bucket_orders(raw), Err(SurgeError::Parse(_))));
    }

    #[test]
    fn test_parse_venues_validates_each_entry() {
        let ok = r#"{"venues": [{"id": "v1", "name": "Noodle Bar", "latitude": 40.69, "longitude": -89.59}]}"#;
        let venues = parse_venues(ok).unwrap();
        assert_eq!(venues.len(), 1);
        assert_eq!(venues[0].name, "Noodle Bar");

        let bad = r#"{"venues": [{"id": "v1", "name": "Noodle Bar", "latitude": 140.0, "longitude": 0.0}]}"#;
        assert!(parse_venues(bad).is_err());
        assert!(parse_venues("not json").is_err());
    }
}
