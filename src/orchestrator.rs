use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::Pacing;
use crate::error::WorkloadError;
use crate::metrics::MetricsCollector;
use crate::namespace;
use crate::store::Store;
use crate::workload::{TeamSpec, TeamWorkload};

// ─── Plan & outcomes ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub teams: usize,
    pub players: usize,
    /// Delay between successive launches; none after the last.
    pub stagger: Duration,
    /// Team `i` draws from `StdRng::seed_from_u64(seed + i)`.
    pub seed: u64,
    /// Distinguishes this run's team names from any other run's.
    pub run_tag: String,
    pub pacing: Pacing,
}

impl RunPlan {
    /// Eight hex chars of a fresh v4 uuid.
    pub fn new_run_tag() -> String {
        uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
    }
}

/// Exactly one per launched team.
#[derive(Debug, Clone, PartialEq)]
pub enum TeamOutcome {
    Completed {
        index: usize,
        team_id: String,
    },
    Failed {
        index: usize,
        team_id: String,
        error: WorkloadError,
    },
}

impl TeamOutcome {
    pub fn index(&self) -> usize {
        match self {
            Self::Completed { index, .. } | Self::Failed { index, .. } => *index,
        }
    }

    pub fn team_id(&self) -> &str {
        match self {
            Self::Completed { team_id, .. } | Self::Failed { team_id, .. } => team_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    /// Sorted by launch index.
    pub outcomes: Vec<TeamOutcome>,
    /// First launch to the last team settling.
    pub elapsed: Duration,
}

impl RunResult {
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &TeamOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

// ─── Scheduler ───────────────────────────────────────────────────

/// Launches every team, one per `stagger`, without waiting for earlier
/// teams, then waits for all of them to settle. One team failing never
/// cancels or delays another.
pub async fn run_teams(
    store: Arc<dyn Store>,
    metrics: Arc<MetricsCollector>,
    plan: &RunPlan,
) -> RunResult {
    let start = Instant::now();
    let mut set: JoinSet<TeamOutcome> = JoinSet::new();
    let mut pending: BTreeSet<usize> = BTreeSet::new();
    let mut ids: Vec<String> = Vec::with_capacity(plan.teams);

    for index in 0..plan.teams {
        let spec = TeamSpec {
            index,
            name: namespace::team_name(index, &plan.run_tag),
            players: plan.players,
        };
        let rng = StdRng::seed_from_u64(plan.seed.wrapping_add(index as u64));
        let workload = TeamWorkload::new(
            store.clone(),
            metrics.clone(),
            spec,
            plan.pacing.clone(),
            rng,
        );
        let team_id = workload.team_id().to_string();
        ids.push(team_id.clone());
        pending.insert(index);

        info!(team = %team_id, index, "launching team");
        set.spawn(async move {
            match workload.run().await {
                Ok(team_id) => TeamOutcome::Completed { index, team_id },
                Err(error) => TeamOutcome::Failed {
                    index,
                    team_id,
                    error,
                },
            }
        });

        if index + 1 < plan.teams && !plan.stagger.is_zero() {
            tokio::time::sleep(plan.stagger).await;
        }
    }

    let mut outcomes = Vec::with_capacity(plan.teams);
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(outcome) => {
                match &outcome {
                    TeamOutcome::Completed { team_id, .. } => {
                        info!(team = %team_id, "team completed");
                    }
                    TeamOutcome::Failed { team_id, error, .. } => {
                        warn!(team = %team_id, error = %error, "team failed");
                    }
                }
                pending.remove(&outcome.index());
                outcomes.push(outcome);
            }
            Err(e) => error!(error = %e, "team task ended without an outcome"),
        }
    }

    // Tasks that panicked never reported; they still get exactly one outcome.
    for index in pending {
        outcomes.push(TeamOutcome::Failed {
            index,
            team_id: ids[index].clone(),
            error: WorkloadError::Aborted("task panicked or was cancelled".into()),
        });
    }

    outcomes.sort_by_key(TeamOutcome::index);
    RunResult {
        outcomes,
        elapsed: start.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_tags_are_short_and_distinct() {
        let a = RunPlan::new_run_tag();
        let b = RunPlan::new_run_tag();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn outcome_accessors() {
        let ok = TeamOutcome::Completed {
            index: 2,
            team_id: "loadtest_x".into(),
        };
        let failed = TeamOutcome::Failed {
            index: 0,
            team_id: "loadtest_y".into(),
            error: WorkloadError::Aborted("x".into()),
        };
        assert!(ok.is_success());
        assert!(!failed.is_success());
        assert_eq!(failed.index(), 0);
        assert_eq!(ok.team_id(), "loadtest_x");

        let run = RunResult {
            outcomes: vec![failed, ok],
            elapsed: Duration::ZERO,
        };
        assert_eq!(run.completed(), 1);
        assert_eq!(run.failed().count(), 1);
    }
}
