pub mod collector;
pub mod percentiles;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use collector::{
    AggregatedReport, ConnectionStats, DistBucket, ErrorGroup, ErrorSummary, MetricsCollector,
};
pub use percentiles::PercentileSet;

/// Upper bound (exclusive, ms) for a propagation sample to count.
/// Anything slower is treated as an initial-attach callback.
pub const PROPAGATION_CEILING_MS: f64 = 30_000.0;

/// One timed operation. Immutable once recorded.
#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    /// e.g. "create_team"
    pub operation: String,
    pub elapsed_ms: f64,
    pub captured_at: DateTime<Utc>,
}

/// One failed operation, kept in capture order.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub operation: String,
    pub message: String,
    pub captured_at: DateTime<Utc>,
}
