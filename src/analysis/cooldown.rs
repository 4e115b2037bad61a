//! Per-venue alert cooldown.
//!
//! Check and update happen under the venue's entry lock in one step, so two
//! concurrent detections for the same venue cannot both pass.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_alert: DashMap<String, DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the alert slot for `venue_id` if its cooldown has elapsed,
    /// recording `now` as the last alert time. Returns whether it succeeded.
    pub fn try_claim(&self, venue_id: &str, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self.last_alert.entry(venue_id.to_string()) {
            Entry::Occupied(mut slot) => {
                if now - *slot.get() >= cooldown {
                    slot.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    pub fn last_alert(&self, venue_id: &str) -> Option<DateTime<Utc>> {
        self.last_alert.get(venue_id).map(|last| *last)
    }

    /// Drops entries whose cooldown has lapsed.
    pub fn prune(&self, now: DateTime<Utc>, cooldown: Duration) -> usize {
        let before = self.last_alert.len();
        self.last_alert.retain(|_, last| now - *last < cooldown);
        before.saturating_sub(self.last_alert.len())
    }

    pub fn len(&self) -> usize {
        self.last_alert.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_alert.is_empty()
    }
}
