use std::fmt;

use serde_json::Value;
use tracing::{info, warn};

use crate::namespace::{self, ROOT_COLLECTION};
use crate::store::{Patch, Store};

/// Keys removed per multi-path delete.
pub const CLEANUP_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub matched: usize,
    pub batches: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// No generated records, including a missing root collection.
    NothingToClean,
    /// The root collection could not be read; nothing was deleted.
    Unreadable,
    /// At least one generated record matched. `batches` may fall short
    /// of the planned count when a batch failed.
    Removed(CleanupSummary),
}

impl CleanupOutcome {
    pub fn summary(&self) -> CleanupSummary {
        match self {
            Self::Removed(summary) => summary.clone(),
            _ => CleanupSummary::default(),
        }
    }
}

/// The one line printed for a cleanup pass.
impl fmt::Display for CleanupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingToClean => write!(f, "nothing to clean"),
            Self::Unreadable => write!(f, "⚠ cleanup skipped: generated records could not be read"),
            Self::Removed(s) => write!(
                f,
                "🧹 removed {} of {} generated records in {} batches",
                s.deleted, s.matched, s.batches
            ),
        }
    }
}

/// Removes every root record whose key carries the reserved prefix,
/// `CLEANUP_BATCH_SIZE` keys per multi-path delete.
///
/// Never fails: a missing collection counts as zero matches, and read or
/// delete errors are logged and end the pass early. Reporting is left to
/// the caller so an empty pass can print nothing but "nothing to clean".
pub async fn cleanup(store: &dyn Store) -> CleanupOutcome {
    let snapshot = match store.read(ROOT_COLLECTION).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cleanup read failed; skipping");
            return CleanupOutcome::Unreadable;
        }
    };

    let keys: Vec<String> = match &snapshot.value {
        Some(Value::Object(records)) => records
            .keys()
            .filter(|k| namespace::is_generated(k))
            .cloned()
            .collect(),
        _ => Vec::new(),
    };

    if keys.is_empty() {
        return CleanupOutcome::NothingToClean;
    }

    let mut summary = CleanupSummary {
        matched: keys.len(),
        ..CleanupSummary::default()
    };
    let total_batches = keys.len().div_ceil(CLEANUP_BATCH_SIZE);
    info!(keys = keys.len(), batches = total_batches, "removing generated records");

    for (i, batch) in keys.chunks(CLEANUP_BATCH_SIZE).enumerate() {
        let patch = batch.iter().fold(Patch::new(), |p, key| {
            p.delete(namespace::team_path(key))
        });
        match store.update("", patch).await {
            Ok(()) => {
                summary.batches += 1;
                summary.deleted += batch.len();
                info!(batch = i + 1, of = total_batches, size = batch.len(), "batch removed");
            }
            Err(e) => {
                warn!(batch = i + 1, error = %e, "cleanup batch failed; stopping");
                break;
            }
        }
    }

    CleanupOutcome::Removed(summary)
}
