//! Layer 1: data collection.
//!
//! For each venue, joins actual order telemetry with predicted demand (API
//! first, local model per missing bucket) and the current social signal into
//! hourly [`SurgeMetric`]s, then writes them to the metrics store in
//! timestamp order.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::clock::{hour_bucket, SharedClock};
use crate::config::SharedConfig;
use crate::ingest::api::{DemandApi, HourlySeries, OrderCounts, PredictedCounts};
use crate::ingest::fallback::DemandModel;
use crate::ingest::social::SocialSignalAggregator;
use crate::logging::{log_collection_summary, log_upstream_failure, DataSource};
use crate::model::{CollectionSummary, SocialSignals, SurgeError, SurgeMetric, Venue};
use crate::store::MetricsStore;

pub struct DataCollector {
    api: Arc<dyn DemandApi>,
    model: Arc<dyn DemandModel>,
    social: Arc<SocialSignalAggregator>,
    store: Arc<dyn MetricsStore>,
    config: SharedConfig,
    clock: SharedClock,
}

impl DataCollector {
    pub fn new(
        api: Arc<dyn DemandApi>,
        model: Arc<dyn DemandModel>,
        social: Arc<SocialSignalAggregator>,
        store: Arc<dyn MetricsStore>,
        config: SharedConfig,
        clock: SharedClock,
    ) -> Self {
        Self { api, model, social, store, config, clock }
    }

    /// Collects and stores one venue's window, returning the metrics written.
    ///
    /// Fails without writing anything if the orders API fails. A predictions
    /// failure is absorbed: every bucket then uses the local model. A window
    /// with no buckets on either side is `NoData`. Failures are logged here
    /// under the source that failed.
    pub fn collect(&self, venue: &Venue) -> Result<Vec<SurgeMetric>, SurgeError> {
        let config = self.config.snapshot();
        let now = self.clock.now();
        let start = now - Duration::hours(i64::from(config.window_hours));

        let actual = self
            .api
            .query_orders(&venue.id, start, now)
            .inspect_err(|e| log_upstream_failure(DataSource::Orders, Some(&venue.id), "orders query", e))?;
        let predicted = match self.api.query_predictions(&venue.id, start, now) {
            Ok(series) => series,
            Err(e) => {
                log_upstream_failure(DataSource::Predictions, Some(&venue.id), "predictions query", &e);
                HourlySeries::new()
            }
        };
        let signals = self.social.get_composite_signal(venue);

        let metrics = build_metrics(
            &actual,
            &predicted,
            |bucket| self.model.predict(venue, bucket),
            &signals,
            hour_bucket(start),
            hour_bucket(now),
        );

        if metrics.is_empty() {
            let err = SurgeError::NoData(format!("no demand buckets for venue {} since {}", venue.id, start));
            log_upstream_failure(DataSource::Orders, Some(&venue.id), "window collection", &err);
            return Err(err);
        }

        let ttl = Duration::days(i64::from(config.retention_days));
        for metric in &metrics {
            self.store
                .put(&venue.id, metric.clone(), ttl)
                .inspect_err(|e| log_upstream_failure(DataSource::Store, Some(&venue.id), "metric write", e))?;
        }
        debug!(source = %DataSource::Store, venue = %venue.id, "stored {} metrics", metrics.len());
        Ok(metrics)
    }

    /// `collect`, reduced to success/failure. Never propagates. A quiet
    /// venue with nothing to store counts as a success.
    pub fn aggregate_and_store(&self, venue: &Venue) -> bool {
        matches!(self.collect(venue), Ok(_) | Err(SurgeError::NoData(_)))
    }

    pub fn collect_for_all_venues(&self, venues: &[Venue]) -> CollectionSummary {
        let successful = venues.iter().filter(|venue| self.aggregate_and_store(venue)).count();
        let summary = CollectionSummary { successful, failed: venues.len() - successful, total: venues.len() };
        log_collection_summary(&summary);
        summary
    }

    /// A demo window for a venue whose upstream is unavailable.
    ///
    /// Both sides come from the local model, so the ratio is 1.0 in every
    /// bucket. Never written to the store.
    pub fn simulated_window(&self, venue: &Venue) -> Vec<SurgeMetric> {
        let window_hours = i64::from(self.config.snapshot().window_hours);
        let end = hour_bucket(self.clock.now());
        (0..window_hours)
            .rev()
            .map(|back| {
                let bucket = end - Duration::hours(back);
                let p = self.model.predict(venue, bucket);
                SurgeMetric::new(bucket, p.item_count, p.order_count, p.item_count, p.order_count, SocialSignals::none())
            })
            .collect()
    }
}

/// Joins actual and predicted series over `[first_bucket, last_bucket]`.
///
/// Every bucket present on either side yields one metric; a missing actual
/// counts as zero and a missing prediction is filled by `fallback`. The
/// social signal is stamped on every bucket.
pub fn build_metrics(
    actual: &HourlySeries<OrderCounts>,
    predicted: &HourlySeries<PredictedCounts>,
    fallback: impl Fn(DateTime<Utc>) -> PredictedCounts,
    signals: &SocialSignals,
    first_bucket: DateTime<Utc>,
    last_bucket: DateTime<Utc>,
) -> Vec<SurgeMetric> {
    let buckets: BTreeSet<DateTime<Utc>> = actual
        .keys()
        .chain(predicted.keys())
        .copied()
        .filter(|b| *b >= first_bucket && *b <= last_bucket)
        .collect();

    buckets
        .into_iter()
        .map(|bucket| {
            let a = actual.get(&bucket).copied().unwrap_or_default();
            let p = predicted.get(&bucket).copied().unwrap_or_else(|| fallback(bucket));
            SurgeMetric::new(bucket, a.item_count, a.order_count, p.item_count, p.order_count, signals.clone())
        })
        .collect()
}
