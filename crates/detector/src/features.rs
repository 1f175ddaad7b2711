//! Feature extraction: one closed bucket → the fixed 12-component vector.
//!
//! Extraction is pure: the same accumulator always produces the same vector
//! bit-for-bit. Percentiles use linear interpolation on the sorted latency
//! array; a bucket with no latency samples gets zeroed latency features.

use helios_core::FeatureVector;

use crate::window::BucketAccumulator;

pub fn extract(acc: &BucketAccumulator) -> FeatureVector {
    let event_count = acc.event_count as f64;
    let error_rate = if acc.event_count > 0 {
        acc.error_count as f64 / event_count
    } else {
        0.0
    };

    let mut latencies = acc.latencies.clone();
    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let (p50, p95, p99, latency_std) = if latencies.is_empty() {
        (0.0, 0.0, 0.0, 0.0)
    } else {
        (
            percentile(&latencies, 50.0),
            percentile(&latencies, 95.0),
            percentile(&latencies, 99.0),
            std_dev(&latencies),
        )
    };

    FeatureVector {
        event_count,
        error_rate,
        p50_latency_ms: p50,
        p95_latency_ms: p95,
        p99_latency_ms: p99,
        latency_std,
        hour_of_day: acc.hour_of_day as f64,
        p95_p50_ratio: p95 / p50.max(1.0),
        p99_p95_ratio: p99 / p95.max(1.0),
        error_count: (event_count * error_rate).round(),
        log_event_count: (1.0 + event_count).ln(),
        log_error_rate: (1.0 + error_rate).ln(),
    }
}

/// Linear-interpolation percentile over a sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = p / 100.0 * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            if lo == hi {
                sorted[lo]
            } else {
                sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
            }
        }
    }
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
