use std::future::Future;
use std::time::Instant;

use tracing::debug;

use crate::error::{StoreError, WorkloadError};
use crate::metrics::MetricsCollector;

/// Runs one store operation and records its wall time under `operation`.
///
/// The latency is recorded whether or not the call succeeds. A failure is
/// also logged to the error list and handed back unchanged inside
/// [`WorkloadError::Operation`].
pub async fn timed<T, F>(
    metrics: &MetricsCollector,
    operation: &str,
    call: F,
) -> Result<T, WorkloadError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let start = Instant::now();
    let result = call.await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    metrics.record_latency(operation, elapsed_ms);

    result.map_err(|source| {
        metrics.record_error(operation, &source);
        debug!(operation, elapsed_ms, error = %source, "operation failed");
        WorkloadError::Operation {
            operation: operation.to_string(),
            source,
        }
    })
}
