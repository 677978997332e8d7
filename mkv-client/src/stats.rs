//! # Command Statistics
//!
//! An in-process metrics sink: counters and a latency histogram computed
//! from the records the telemetry recorder pushes.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Use atomic counters to aggregate events cheaply.
//! 2. **Fixed Buckets**: Keep histogram buckets in a contiguous array for cache locality.
//! 3. **Zero-Cost Access**: Expose snapshots as plain structs without locking.
//!
//! ## Notes
//! - Bucket boundaries are expressed in microseconds.
//! - Latency is read back from the record's `ns` tag; records without a
//!   parsable tag still count as requests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::telemetry::{MetricRecord, MetricsSink};

/// Default latency bucket boundaries in microseconds.
///
/// These are coarse on purpose to keep bucket scans short.
pub const DEFAULT_LATENCY_BUCKETS_US: [u64; 12] =
    [1, 2, 5, 10, 20, 50, 100, 200, 500, 1_000, 2_000, 5_000];

/// Snapshot of all command statistics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Total number of commands recorded.
    pub requests_total: u64,
    /// Commands whose reply was a store error.
    pub errors_total: u64,
    /// Latency histogram snapshot.
    pub latency: LatencySnapshot,
}

/// Snapshot of the latency histogram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySnapshot {
    /// Bucket boundaries in microseconds.
    pub bounds_us: Vec<u64>,
    /// Bucket counts, including the overflow bucket at the end.
    pub buckets: Vec<u64>,
    /// Total number of samples.
    pub samples: u64,
    /// Sum of latencies in microseconds.
    pub sum_us: u64,
}

/// Thread-safe statistics sink.
///
/// `Ordering::Relaxed` is sufficient because we do not require cross-field
/// ordering, only eventual consistency.
pub struct CommandStats {
    requests_total: AtomicU64,
    errors_total: AtomicU64,
    latency: LatencyHistogram,
}

impl CommandStats {
    /// Creates a sink with the default latency buckets.
    pub fn new() -> Self {
        Self::with_latency_buckets(DEFAULT_LATENCY_BUCKETS_US.to_vec())
    }

    /// Creates a sink with custom latency bucket boundaries.
    ///
    /// The boundaries must be sorted ascending and represent microseconds.
    pub fn with_latency_buckets(bounds_us: Vec<u64>) -> Self {
        CommandStats {
            requests_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            latency: LatencyHistogram::new(bounds_us),
        }
    }

    /// Returns a snapshot of all counters and histogram buckets.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            latency: self.latency.snapshot(),
        }
    }
}

impl Default for CommandStats {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for CommandStats {
    fn push(&self, record: MetricRecord) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if record.tag("error").is_some() {
            self.errors_total.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(ns) = record.tag("ns").and_then(|ns| ns.parse::<u64>().ok()) {
            self.latency.record(Duration::from_nanos(ns));
        }
    }
}

/// Fixed-bucket latency histogram.
///
/// Uses a linear scan to pick buckets; this is O(buckets) but the list is small
/// and stays hot in cache.
pub struct LatencyHistogram {
    bounds_us: Vec<u64>,
    buckets: Vec<AtomicU64>,
    sum_us: AtomicU64,
    samples: AtomicU64,
}

impl LatencyHistogram {
    /// Creates a histogram with `bounds_us.len() + 1` buckets (last is overflow).
    pub fn new(bounds_us: Vec<u64>) -> Self {
        let buckets = (0..=bounds_us.len()).map(|_| AtomicU64::new(0)).collect();
        LatencyHistogram {
            bounds_us,
            buckets,
            sum_us: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    /// Records into the first bucket where `micros <= bound`, else overflow.
    pub fn record(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(micros, Ordering::Relaxed);

        let idx = self
            .bounds_us
            .iter()
            .position(|&bound| micros <= bound)
            .unwrap_or(self.bounds_us.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            bounds_us: self.bounds_us.clone(),
            buckets: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            samples: self.samples.load(Ordering::Relaxed),
            sum_us: self.sum_us.load(Ordering::Relaxed),
        }
    }
}
