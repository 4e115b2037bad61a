/// Local fallback demand model.
///
/// Used for any hour bucket the predictions API leaves out (or for the whole
/// window when that API is down). The estimate is a fitted baseline scaled
/// by an hour-of-day profile and a weekend uplift.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

use crate::ingest::api::PredictedCounts;
use crate::model::Venue;

pub trait DemandModel: Send + Sync {
    /// Point estimate for one venue and hour bucket.
    fn predict(&self, venue: &Venue, bucket: DateTime<Utc>) -> PredictedCounts;
}

/// Relative demand by UTC hour; peaks at lunch and dinner.
const DEFAULT_HOURLY_PROFILE: [f64; 24] = [
    0.10, 0.05, 0.03, 0.02, 0.02, 0.05, 0.20, 0.45, 0.60, 0.55, 0.65, 0.95, //
    1.30, 1.10, 0.70, 0.60, 0.75, 1.05, 1.45, 1.50, 1.20, 0.85, 0.50, 0.25,
];

#[derive(Debug, Clone)]
pub struct BaselineDemandModel {
    /// Items sold in an average hour (profile factor 1.0).
    pub base_items_per_hour: f64,
    pub hourly_profile: [f64; 24],
    /// Multiplier applied on Saturday and Sunday.
    pub weekend_uplift: f64,
    pub items_per_order: f64,
}

impl Default for BaselineDemandModel {
    fn default() -> Self {
        Self {
            base_items_per_hour: 80.0,
            hourly_profile: DEFAULT_HOURLY_PROFILE,
            weekend_uplift: 1.25,
            items_per_order: 2.8,
        }
    }
}

impl BaselineDemandModel {
    fn factor(&self, bucket: DateTime<Utc>) -> f64 {
        let hourly = self.hourly_profile[bucket.hour() as usize];
        match bucket.weekday() {
            Weekday::Sat | Weekday::Sun => hourly * self.weekend_uplift,
            _ => hourly,
        }
    }
}

impl DemandModel for BaselineDemandModel {
    fn predict(&self, _venue: &Venue, bucket: DateTime<Utc>) -> PredictedCounts {
        let items = (self.base_items_per_hour * self.factor(bucket)).max(0.0);
        PredictedCounts {
            item_count: items,
            order_count: if self.items_per_order > 0.0 { items / self.items_per_order } else { 0.0 },
        }
    }
}
