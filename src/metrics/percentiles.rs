use serde::Serialize;

/// Percentile breakdown for one sample bucket, all values in milliseconds.
/// Values are kept raw; rounding is a presentation concern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileSet {
    pub count: u64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
}

impl PercentileSet {
    /// Computes the full set from unsorted samples.
    /// Returns zeroed values for an empty slice.
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::empty();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();

        Self {
            count: n as u64,
            avg: sorted.iter().sum::<f64>() / n as f64,
            p50: percentile_sorted(&sorted, 50.0),
            p95: percentile_sorted(&sorted, 95.0),
            p99: percentile_sorted(&sorted, 99.0),
            min: sorted[0],
            max: sorted[n - 1],
        }
    }

    pub fn empty() -> Self {
        Self {
            count: 0,
            avg: 0.0,
            p50: 0.0,
            p95: 0.0,
            p99: 0.0,
            min: 0.0,
            max: 0.0,
        }
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

/// Nearest-rank percentile: `sorted[ceil(p/100 * n) - 1]`, index clamped
/// to `[0, n-1]`. Empty input yields `0`.
pub fn percentile(samples: &[f64], p: f64) -> f64 {
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, p)
}

/// Same as [`percentile`] for input already sorted ascending.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let rank = (p / 100.0 * n as f64).ceil() as i64 - 1;
    let idx = rank.clamp(0, n as i64 - 1) as usize;
    sorted[idx]
}

/// Two-decimal rounding for display.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
