//! Per-service time-bucketed event windows.
//!
//! A bucket is identified by `(service, floor_window(timestamp))`. Buckets
//! close in two ways: an event lands in a later bucket for the same
//! service, or the periodic tick finds the bucket's end older than the skew
//! grace. Closed buckets leave the store immediately, which is what makes
//! scoring at-most-once per bucket.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};

use helios_core::Event;

/// Align an instant down to its bucket start.
pub fn bucket_start(t: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let window_secs = window.num_seconds().max(1);
    let ts = t.timestamp();
    let aligned = ts - ts.rem_euclid(window_secs);
    Utc.timestamp_opt(aligned, 0).single().unwrap_or(t)
}

/// Accumulated state for one `(service, bucket)` pair. Folding an event is
/// O(1); latencies are kept raw for percentile extraction at close time.
#[derive(Debug, Clone)]
pub struct BucketAccumulator {
    pub event_count: usize,
    /// ERROR + CRITICAL events.
    pub error_count: usize,
    pub critical_count: usize,
    pub latencies: Vec<f64>,
    pub endpoints: HashSet<String>,
    /// Hour-of-day of the bucket, 0–23.
    pub hour_of_day: u32,
}

impl BucketAccumulator {
    fn new(start: DateTime<Utc>) -> Self {
        Self {
            event_count: 0,
            error_count: 0,
            critical_count: 0,
            latencies: Vec::new(),
            endpoints: HashSet::new(),
            hour_of_day: start.hour(),
        }
    }

    fn fold(&mut self, event: &Event) {
        self.event_count += 1;
        if event.level.is_error() {
            self.error_count += 1;
        }
        if event.level == helios_core::Level::Critical {
            self.critical_count += 1;
        }
        if let Some(latency) = event.latency_ms() {
            self.latencies.push(latency);
        }
        if let Some(endpoint) = event.endpoint() {
            if !self.endpoints.contains(endpoint) {
                self.endpoints.insert(endpoint.to_string());
            }
        }
    }
}

/// A bucket removed from the store, ready for scoring.
#[derive(Debug)]
pub struct ClosedBucket {
    pub service: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub acc: BucketAccumulator,
}

/// Outcome of folding one event.
#[derive(Debug, Default)]
pub struct FoldOutcome {
    /// Buckets closed because a later bucket was observed.
    pub closed: Vec<ClosedBucket>,
    /// Buckets discarded unscored by the per-service cap.
    pub evicted: usize,
}

impl FoldOutcome {
    fn empty() -> Self {
        Self::default()
    }
}

/// Per-service ordered bucket maps with a bounded footprint.
pub struct WindowStore {
    window: Duration,
    grace: Duration,
    max_buckets: usize,
    services: HashMap<String, BTreeMap<DateTime<Utc>, BucketAccumulator>>,
}

impl WindowStore {
    pub fn new(window_minutes: u32, max_skew_secs: u64, max_buckets: usize) -> Self {
        Self {
            window: Duration::minutes(window_minutes.max(1) as i64),
            grace: Duration::seconds(max_skew_secs as i64),
            max_buckets: max_buckets.max(1),
            services: HashMap::new(),
        }
    }

    /// Fold one event into its bucket, closing any strictly earlier buckets
    /// for that service.
    pub fn fold(&mut self, event: &Event) -> FoldOutcome {
        let Some(ts) = event.timestamp.or(event.ingested_at) else {
            // Un-enriched and timestamp-free: nothing to bucket by.
            return FoldOutcome::empty();
        };

        let start = bucket_start(ts, self.window);
        let buckets = self.services.entry(event.service.clone()).or_default();
        buckets.entry(start).or_insert_with(|| BucketAccumulator::new(start)).fold(event);

        let mut outcome = FoldOutcome::empty();

        // This event proves time has reached `start`; every strictly
        // earlier bucket for the service is now closable. The event's own
        // bucket stays open for late arrivals until the frontier moves
        // past it (or the tick ages it out).
        let current_and_later = buckets.split_off(&start);
        let earlier = std::mem::replace(buckets, current_and_later);
        for (bucket, acc) in earlier {
            outcome.closed.push(ClosedBucket {
                service: event.service.clone(),
                start: bucket,
                end: bucket + self.window,
                acc,
            });
        }

        // Cap residual growth from wildly skewed timestamps.
        while buckets.len() > self.max_buckets {
            buckets.pop_first();
            outcome.evicted += 1;
        }

        outcome
    }

    /// Close every bucket whose end is older than the skew grace. Driven by
    /// the periodic tick so quiet services still get scored.
    pub fn close_due(&mut self, now: DateTime<Utc>) -> Vec<ClosedBucket> {
        let mut closed = Vec::new();
        let window = self.window;
        let cutoff = now - self.grace;

        for (service, buckets) in self.services.iter_mut() {
            let due: Vec<DateTime<Utc>> = buckets
                .keys()
                .take_while(|start| **start + window <= cutoff)
                .copied()
                .collect();
            for start in due {
                if let Some(acc) = buckets.remove(&start) {
                    closed.push(ClosedBucket {
                        service: service.clone(),
                        start,
                        end: start + window,
                        acc,
                    });
                }
            }
        }

        self.services.retain(|_, buckets| !buckets.is_empty());
        closed
    }

    /// Open buckets across all services.
    pub fn open_buckets(&self) -> usize {
        self.services.values().map(BTreeMap::len).sum()
    }
}
