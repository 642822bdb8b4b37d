use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

// ─── CLI ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Parser)]
#[command(name = "team-loadtest")]
#[command(about = "Simulate concurrent teams against a real-time store and report latency")]
pub struct Cli {
    /// Number of teams to simulate
    #[arg(long, default_value_t = 30)]
    pub teams: usize,

    /// Participants per team (1 commander + crew)
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub players: u64,

    /// Delay between team launches, in milliseconds
    #[arg(long, default_value_t = 200)]
    pub stagger: u64,

    /// Skip the workload and only remove generated data
    #[arg(long, conflicts_with = "no_cleanup")]
    pub cleanup_only: bool,

    /// Keep generated data after the run
    #[arg(long)]
    pub no_cleanup: bool,

    /// Backing store location
    #[arg(long, env = "LOADTEST_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Key namespace inside the backing store
    #[arg(long, env = "LOADTEST_NAMESPACE", default_value = "loadtest")]
    pub namespace: String,

    /// Run against an in-process store instead of Redis
    #[arg(long)]
    pub in_memory: bool,

    /// Base seed for workload randomness; team i uses seed + i
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// JSON file overriding heuristic thresholds
    #[arg(long)]
    pub thresholds: Option<PathBuf>,

    /// Also write the aggregated report as JSON to this file
    #[arg(long)]
    pub report_json: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Warnings and errors only
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger)
    }

    pub fn players(&self) -> usize {
        self.players as usize
    }

    pub fn load_thresholds(&self) -> anyhow::Result<Thresholds> {
        match &self.thresholds {
            Some(path) => Thresholds::from_file(path),
            None => Ok(Thresholds::default()),
        }
    }
}

// ─── Workload pacing ─────────────────────────────────────────────

/// Sleeps inside one team's script.
#[derive(Debug, Clone, PartialEq)]
pub struct Pacing {
    /// Random pause between crew joins, inclusive range in ms.
    pub join_delay_ms: (u64, u64),
    /// Pause after the start write so subscriptions can fire.
    pub settle: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            join_delay_ms: (20, 50),
            settle: Duration::from_millis(100),
        }
    }
}

impl Pacing {
    /// No sleeps at all.
    pub fn immediate() -> Self {
        Self {
            join_delay_ms: (0, 0),
            settle: Duration::ZERO,
        }
    }
}

// ─── Heuristic thresholds ────────────────────────────────────────

/// Every cut-off used by bottleneck detection and recommendations.
/// Latencies in ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub critical_p95_ms: f64,
    pub warning_p95_ms: f64,
    /// High-variance check only applies to buckets with more samples than this.
    pub variance_min_count: u64,
    /// Flag when p99 > ratio × p50.
    pub variance_ratio: f64,
    pub propagation_bottleneck_p95_ms: f64,
    pub propagation_advice_p95_ms: f64,
    /// Fraction, 0.01 = 1 %.
    pub error_rate: f64,
    pub peak_connections: u64,
    pub transfer_bytes: u64,
    pub capacity_teams: usize,
    pub capacity_players: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            critical_p95_ms: 1000.0,
            warning_p95_ms: 500.0,
            variance_min_count: 5,
            variance_ratio: 5.0,
            propagation_bottleneck_p95_ms: 500.0,
            propagation_advice_p95_ms: 300.0,
            error_rate: 0.01,
            peak_connections: 100,
            transfer_bytes: 5 * 1024 * 1024,
            capacity_teams: 30,
            capacity_players: 10,
        }
    }
}

impl Thresholds {
    /// Fields missing from the file keep their defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading thresholds from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing thresholds in {}", path.display()))
    }
}
