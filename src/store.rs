//! Time-series metrics store.
//!
//! Records are keyed by (venue, hour bucket) and carry an expiry. Expired
//! records are invisible to every read and physically removed by
//! [`MetricsStore::purge_expired`]. Writing a key that already exists
//! replaces the whole record; records are never edited in place.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::clock::SharedClock;
use crate::model::{SurgeError, SurgeMetric};

pub trait MetricsStore: Send + Sync {
    /// Stores `metric` under (venue, metric.timestamp) for `ttl`.
    fn put(&self, venue_id: &str, metric: SurgeMetric, ttl: Duration) -> Result<(), SurgeError>;

    /// Unexpired metrics with `start <= timestamp <= end`, oldest first.
    fn range(
        &self,
        venue_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SurgeMetric>, SurgeError>;

    /// The newest `n` unexpired metrics, oldest first.
    fn latest(&self, venue_id: &str, n: usize) -> Result<Vec<SurgeMetric>, SurgeError>;

    /// Venues holding at least one unexpired metric.
    fn active_venues(&self) -> Result<Vec<String>, SurgeError>;

    /// Drops expired records, returning how many were removed.
    fn purge_expired(&self) -> Result<usize, SurgeError>;
}

#[derive(Debug, Clone)]
struct StoredMetric {
    metric: SurgeMetric,
    expires_at: DateTime<Utc>,
}

/// In-process store. Each venue's series sits behind its own shard lock.
pub struct InMemoryMetricsStore {
    series: DashMap<String, BTreeMap<DateTime<Utc>, StoredMetric>>,
    clock: SharedClock,
}

impl InMemoryMetricsStore {
    pub fn new(clock: SharedClock) -> Self {
        Self { series: DashMap::new(), clock }
    }

    /// Total stored records including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.series.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricsStore for InMemoryMetricsStore {
    fn put(&self, venue_id: &str, metric: SurgeMetric, ttl: Duration) -> Result<(), SurgeError> {
        if ttl <= Duration::zero() {
            return Err(SurgeError::Store(format!("non-positive ttl for venue {}", venue_id)));
        }
        let expires_at = self.clock.now() + ttl;
        self.series
            .entry(venue_id.to_string())
            .or_default()
            .insert(metric.timestamp, StoredMetric { metric, expires_at });
        Ok(())
    }

    fn range(
        &self,
        venue_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SurgeMetric>, SurgeError> {
        if start > end {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        Ok(self
            .series
            .get(venue_id)
            .map(|series| {
                series
                    .range(start..=end)
                    .filter(|(_, stored)| stored.expires_at > now)
                    .map(|(_, stored)| stored.metric.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn latest(&self, venue_id: &str, n: usize) -> Result<Vec<SurgeMetric>, SurgeError> {
        let now = self.clock.now();
        let mut newest: Vec<SurgeMetric> = self
            .series
            .get(venue_id)
            .map(|series| {
                series
                    .values()
                    .rev()
                    .filter(|stored| stored.expires_at > now)
                    .take(n)
                    .map(|stored| stored.metric.clone())
                    .collect()
            })
            .unwrap_or_default();
        newest.reverse();
        Ok(newest)
    }

    fn active_venues(&self) -> Result<Vec<String>, SurgeError> {
        let now = self.clock.now();
        let mut venues: Vec<String> = self
            .series
            .iter()
            .filter(|entry| entry.value().values().any(|stored| stored.expires_at > now))
            .map(|entry| entry.key().clone())
            .collect();
        venues.sort();
        Ok(venues)
    }

    fn purge_expired(&self) -> Result<usize, SurgeError> {
        let now = self.clock.now();
        let mut removed = 0;
        for mut entry in self.series.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|_, stored| stored.expires_at > now);
            removed += before - entry.value().len();
        }
        self.series.retain(|_, series| !series.is_empty());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::SocialSignals;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn metric(at: DateTime<Utc>, actual: f64) -> SurgeMetric {
        SurgeMetric::new(at, actual, actual / 3.0, 100.0, 33.0, SocialSignals::none())
    }

    fn store() -> (Arc<ManualClock>, InMemoryMetricsStore) {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = InMemoryMetricsStore::new(clock.clone());
        (clock, store)
    }

    #[test]
    fn test_range_returns_ordered_unique_buckets() {
        let (_clock, store) = store();
        let ttl = Duration::days(7);
        // Written out of order, read back in order.
        for h in [2, 0, 1] {
            store.put("v1", metric(t0() - Duration::hours(h), 100.0 + h as f64), ttl).unwrap();
        }
        // Rewriting a bucket replaces it rather than duplicating it.
        store.put("v1", metric(t0(), 180.0), ttl).unwrap();

        let window = store.range("v1", t0() - Duration::hours(2), t0()).unwrap();
        let stamps: Vec<_> = window.iter().map(|m| m.timestamp).collect();
        assert_eq!(stamps, vec![t0() - Duration::hours(2), t0() - Duration::hours(1), t0()]);
        assert_eq!(window[2].actual_items, 180.0);
    }

    #[test]
    fn test_expired_metrics_are_invisible_then_purged() {
        let (clock, store) = store();
        store.put("v1", metric(t0(), 100.0), Duration::hours(1)).unwrap();
        store.put("v2", metric(t0(), 100.0), Duration::days(7)).unwrap();
        assert_eq!(store.active_venues().unwrap(), vec!["v1".to_string(), "v2".to_string()]);

        clock.advance(Duration::hours(2));
        assert!(store.latest("v1", 3).unwrap().is_empty());
        assert_eq!(store.active_venues().unwrap(), vec!["v2".to_string()]);

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_latest_returns_newest_n_oldest_first() {
        let (_clock, store) = store();
        for h in 0..5 {
            store.put("v1", metric(t0() - Duration::hours(h), 100.0), Duration::days(7)).unwrap();
        }
        let latest = store.latest("v1", 3).unwrap();
        assert_eq!(latest.len(), 3);
        assert_eq!(latest[0].timestamp, t0() - Duration::hours(2));
        assert_eq!(latest[2].timestamp, t0());
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        let (_clock, store) = store();
        let result = store.put("v1", metric(t0(), 100.0), Duration::zero());
        assert!(matches!(result, Err(SurgeError::Store(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_unknown_venue_reads_empty() {
        let (_clock, store) = store();
        assert!(store.range("nope", t0() - Duration::hours(3), t0()).unwrap().is_empty());
    }
}
