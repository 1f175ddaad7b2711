//! Alert deduplication: at most one emitted anomaly per service per
//! cooldown window.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

pub struct AlertDeduper {
    cooldown: Duration,
    last_emitted: HashMap<String, DateTime<Utc>>,
}

impl AlertDeduper {
    pub fn new(cooldown_secs: u64) -> Self {
        Self {
            cooldown: Duration::seconds(cooldown_secs as i64),
            last_emitted: HashMap::new(),
        }
    }

    /// Whether an alert for `service` may be emitted at `now`. Granting the
    /// permit records the emission; a denial changes nothing.
    pub fn permit(&mut self, service: &str, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.last_emitted.get(service) {
            if now - *last < self.cooldown {
                return false;
            }
        }
        self.last_emitted.insert(service.to_string(), now);
        true
    }
}
