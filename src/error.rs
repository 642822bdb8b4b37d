use thiserror::Error;

// ─── Backing-store errors ────────────────────────────────────────

/// Anything that can go wrong talking to the backing store.
///
/// Kept `Clone` (string payloads only) so a team's originating error can be
/// stored in its outcome and in the metrics error log at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(String),

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("write rejected at '{path}': {reason}")]
    Rejected { path: String, reason: String },

    #[error("serialization: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        Self::Redis(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

// ─── Workload errors ─────────────────────────────────────────────

/// Failure that aborts one team's phase sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkloadError {
    /// A timed operation failed; `source` is the store's own error.
    #[error("{operation} failed: {source}")]
    Operation {
        operation: String,
        #[source]
        source: StoreError,
    },

    /// The team task ended without reporting (panicked or was aborted).
    #[error("team task aborted: {0}")]
    Aborted(String),
}

impl WorkloadError {
    /// Name of the operation that failed, if the failure came from one.
    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::Operation { operation, .. } => Some(operation),
            Self::Aborted(_) => None,
        }
    }
}
