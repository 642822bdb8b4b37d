use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use super::percentiles::PercentileSet;
use super::{ErrorRecord, Sample, PROPAGATION_CEILING_MS};

// ─── Configuration ───────────────────────────────────────────────

/// HdrHistogram range: 1 μs → 60 s, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe, append-only metrics store.
///
/// Every team task records into the same collector; each mutation is one
/// short critical section, so concurrent recordings never lose updates.
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

/// A bucket in the overall latency distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistBucket {
    pub range_start_us: u64,
    pub range_end_us: u64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorGroup {
    pub operation: String,
    pub message: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub total: u64,
    /// Grouped by `(operation, message)`, sorted by that pair.
    pub groups: Vec<ErrorGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStats {
    /// Never negative.
    pub peak: u64,
    pub current: i64,
}

/// Snapshot derived from the collector. Never mutates the samples it was
/// built from; two reports with no recordings in between compare equal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedReport {
    pub operations: BTreeMap<String, PercentileSet>,
    pub propagation: PercentileSet,
    pub errors: ErrorSummary,
    pub connections: ConnectionStats,
    pub total_bytes_transferred: u64,
    pub distribution: Vec<DistBucket>,
}

impl AggregatedReport {
    /// Sum of sample counts across all operation buckets.
    pub fn total_operations(&self) -> u64 {
        self.operations.values().map(|s| s.count).sum()
    }

    /// Errors ÷ total recorded operations; `0` when nothing was recorded.
    pub fn error_rate(&self) -> f64 {
        let total = self.total_operations();
        if total == 0 {
            0.0
        } else {
            self.errors.total as f64 / total as f64
        }
    }
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    buckets: BTreeMap<String, Vec<Sample>>,
    errors: Vec<ErrorRecord>,
    propagation: Vec<f64>,

    connections: i64,
    peak_connections: i64,

    bytes_transferred: u64,

    // Every latency sample across all operations, in μs
    all_hist: Histogram<u64>,
}

// ─── MetricsCollector impl ───────────────────────────────────────

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Append one latency sample to the bucket for `operation`.
    pub fn record_latency(&self, operation: &str, elapsed_ms: f64) {
        self.inner.lock().record_latency(operation, elapsed_ms);
    }

    pub fn record_error(&self, operation: &str, error: &dyn fmt::Display) {
        self.inner.lock().errors.push(ErrorRecord {
            operation: operation.to_string(),
            message: error.to_string(),
            captured_at: Utc::now(),
        });
    }

    /// Records `elapsed_ms` only if it is below the propagation ceiling.
    /// Returns whether the sample was kept.
    pub fn record_listener_propagation(&self, elapsed_ms: f64) -> bool {
        if elapsed_ms < PROPAGATION_CEILING_MS {
            self.inner.lock().propagation.push(elapsed_ms);
            true
        } else {
            false
        }
    }

    pub fn connection_opened(&self) {
        let mut inner = self.inner.lock();
        inner.connections += 1;
        inner.peak_connections = inner.peak_connections.max(inner.connections);
    }

    pub fn connection_closed(&self) {
        self.inner.lock().connections -= 1;
    }

    pub fn add_data_transferred(&self, bytes: u64) {
        let mut inner = self.inner.lock();
        inner.bytes_transferred = inner.bytes_transferred.saturating_add(bytes);
    }

    /// Errors recorded so far, in capture order.
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.inner.lock().errors.clone()
    }

    /// Wipe all data so the collector can serve another run.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::new();
    }

    /// Build statistics from the samples held right now.
    pub fn report(&self) -> AggregatedReport {
        self.inner.lock().report()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            errors: Vec::new(),
            propagation: Vec::new(),
            connections: 0,
            peak_connections: 0,
            bytes_transferred: 0,
            all_hist: Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
                .expect("histogram creation"),
        }
    }

    fn record_latency(&mut self, operation: &str, elapsed_ms: f64) {
        let us = (elapsed_ms * 1000.0).round().max(1.0) as u64;
        self.all_hist.saturating_record(us);

        self.buckets
            .entry(operation.to_string())
            .or_default()
            .push(Sample {
                operation: operation.to_string(),
                elapsed_ms,
                captured_at: Utc::now(),
            });
    }

    fn report(&self) -> AggregatedReport {
        let operations = self
            .buckets
            .iter()
            .map(|(op, samples)| {
                let values: Vec<f64> = samples.iter().map(|s| s.elapsed_ms).collect();
                (op.clone(), PercentileSet::from_samples(&values))
            })
            .collect();

        let mut grouped: BTreeMap<(&str, &str), u64> = BTreeMap::new();
        for e in &self.errors {
            *grouped
                .entry((e.operation.as_str(), e.message.as_str()))
                .or_default() += 1;
        }

        AggregatedReport {
            operations,
            propagation: PercentileSet::from_samples(&self.propagation),
            errors: ErrorSummary {
                total: self.errors.len() as u64,
                groups: grouped
                    .into_iter()
                    .map(|((operation, message), count)| ErrorGroup {
                        operation: operation.to_string(),
                        message: message.to_string(),
                        count,
                    })
                    .collect(),
            },
            connections: ConnectionStats {
                peak: self.peak_connections.max(0) as u64,
                current: self.connections,
            },
            total_bytes_transferred: self.bytes_transferred,
            distribution: Self::compute_distribution(&self.all_hist),
        }
    }

    // ── Distribution histogram ──────────────────────────────────

    /// Bucket boundaries (μs), from sub-millisecond local round trips up
    /// to multi-second stalls.
    const DIST_BOUNDARIES: &'static [u64] = &[
        1_000, 2_000, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000, 500_000, 1_000_000,
        5_000_000,
    ];

    fn compute_distribution(hist: &Histogram<u64>) -> Vec<DistBucket> {
        if hist.len() == 0 {
            return Vec::new();
        }

        let bounds = Self::DIST_BOUNDARIES;
        let mut counts = vec![0u64; bounds.len() + 1]; // +1 for overflow

        for iv in hist.iter_recorded() {
            let val = iv.value_iterated_to();
            // first boundary >= val; past the end means overflow
            let idx = match bounds.binary_search(&val) {
                Ok(i) | Err(i) => i,
            };
            counts[idx] += iv.count_at_value();
        }

        let mut result = Vec::with_capacity(counts.len());
        let mut prev = 0u64;
        for (i, &boundary) in bounds.iter().enumerate() {
            if counts[i] > 0 {
                result.push(DistBucket {
                    range_start_us: prev,
                    range_end_us: boundary,
                    count: counts[i],
                });
            }
            prev = boundary;
        }
        if counts[bounds.len()] > 0 {
            result.push(DistBucket {
                range_start_us: prev,
                range_end_us: hist.max(),
                count: counts[bounds.len()],
            });
        }

        result
    }
}
