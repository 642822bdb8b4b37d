use std::fmt::{self, Write as _};
use std::time::Duration;

use serde::Serialize;

use crate::config::Thresholds;
use crate::metrics::percentiles::round2;
use crate::metrics::{AggregatedReport, PercentileSet};
use crate::orchestrator::{RunResult, TeamOutcome};
use crate::workload::ops::CANONICAL_ORDER;

// ─── Findings ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Bottleneck {
    SlowestOperation { operation: String, p95: f64 },
    HighVariance { operation: String, p50: f64, p99: f64 },
    SlowPropagation { p95: f64 },
    HighErrorRate { rate: f64 },
}

impl fmt::Display for Bottleneck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlowestOperation { operation, p95 } => {
                write!(f, "Slowest operation: {operation} (p95 {:.2} ms)", p95)
            }
            Self::HighVariance { operation, p50, p99 } => write!(
                f,
                "High variance in {operation}: p99 {:.2} ms vs p50 {:.2} ms",
                p99, p50
            ),
            Self::SlowPropagation { p95 } => {
                write!(f, "Slow subscription propagation: p95 {:.2} ms", p95)
            }
            Self::HighErrorRate { rate } => {
                write!(f, "High error rate: {:.2}%", rate * 100.0)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub severity: Severity,
    pub message: String,
}

impl Recommendation {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        };
        write!(f, "[{tag}] {}", self.message)
    }
}

/// Team count and size of the run being reported on.
#[derive(Debug, Clone, Copy)]
pub struct RunShape {
    pub teams: usize,
    pub players: usize,
}

// ─── Ordering ────────────────────────────────────────────────────

/// Canonical script order first, then any other operation by name.
pub fn ordered_operations(report: &AggregatedReport) -> Vec<(&str, &PercentileSet)> {
    let mut out: Vec<(&str, &PercentileSet)> = CANONICAL_ORDER
        .iter()
        .filter_map(|op| report.operations.get_key_value(*op))
        .map(|(k, v)| (k.as_str(), v))
        .collect();
    out.extend(
        report
            .operations
            .iter()
            .filter(|(k, _)| !CANONICAL_ORDER.contains(&k.as_str()))
            .map(|(k, v)| (k.as_str(), v)),
    );
    out
}

// ─── Heuristics ──────────────────────────────────────────────────

/// Highest p95 wins; on a tie the first in report order is kept.
pub fn slowest_operation(report: &AggregatedReport) -> Option<(&str, f64)> {
    let mut slowest: Option<(&str, f64)> = None;
    for (op, stats) in ordered_operations(report) {
        match slowest {
            Some((_, p95)) if stats.p95 <= p95 => {}
            _ => slowest = Some((op, stats.p95)),
        }
    }
    slowest
}

pub fn detect_bottlenecks(report: &AggregatedReport, t: &Thresholds) -> Vec<Bottleneck> {
    let mut found = Vec::new();

    if let Some((op, p95)) = slowest_operation(report) {
        found.push(Bottleneck::SlowestOperation {
            operation: op.to_string(),
            p95,
        });
    }

    for (op, stats) in ordered_operations(report) {
        if stats.count > t.variance_min_count && stats.p99 > t.variance_ratio * stats.p50 {
            found.push(Bottleneck::HighVariance {
                operation: op.to_string(),
                p50: stats.p50,
                p99: stats.p99,
            });
        }
    }

    if report.propagation.has_data() && report.propagation.p95 > t.propagation_bottleneck_p95_ms
    {
        found.push(Bottleneck::SlowPropagation {
            p95: report.propagation.p95,
        });
    }

    let rate = report.error_rate();
    if rate > t.error_rate {
        found.push(Bottleneck::HighErrorRate { rate });
    }

    found
}

pub fn recommendations(
    report: &AggregatedReport,
    t: &Thresholds,
    shape: RunShape,
) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    if let Some((op, p95)) = slowest_operation(report) {
        if p95 > t.critical_p95_ms {
            recs.push(Recommendation::new(
                Severity::Critical,
                format!(
                    "{op} p95 is {:.2} ms; split or denormalise the data it touches",
                    p95
                ),
            ));
        } else if p95 > t.warning_p95_ms {
            recs.push(Recommendation::new(
                Severity::Warning,
                format!("{op} p95 is {:.2} ms; watch it as load grows", p95),
            ));
        }
    }

    if report.errors.total > 0 {
        recs.push(Recommendation::new(
            Severity::Warning,
            format!(
                "{} operations failed; review store rules and connectivity before trusting latencies",
                report.errors.total
            ),
        ));
    }

    if report.connections.peak > t.peak_connections {
        recs.push(Recommendation::new(
            Severity::Warning,
            format!(
                "Peak of {} concurrent connections; check the store's connection limits",
                report.connections.peak
            ),
        ));
    }

    if report.propagation.has_data() && report.propagation.p95 > t.propagation_advice_p95_ms {
        recs.push(Recommendation::new(
            Severity::Warning,
            "Subscriptions propagate slowly; subscribe to narrower paths instead of the team root",
        ));
    }

    if report.total_bytes_transferred > t.transfer_bytes {
        recs.push(Recommendation::new(
            Severity::Warning,
            format!(
                "{:.2} MB read back; restructure payloads so clients fetch only what they render",
                report.total_bytes_transferred as f64 / (1024.0 * 1024.0)
            ),
        ));
    }

    recs.push(Recommendation::new(
        Severity::Info,
        "Batch related writes into a single multi-path update",
    ));
    recs.push(Recommendation::new(
        Severity::Info,
        "Detach subscriptions as soon as a client leaves a view",
    ));

    if shape.teams >= t.capacity_teams && shape.players >= t.capacity_players {
        recs.push(Recommendation::new(
            Severity::Info,
            format!(
                "At {} teams x {} players, monitor store capacity and connection quotas in production",
                shape.teams, shape.players
            ),
        ));
    }

    recs
}

// ─── Rendering ───────────────────────────────────────────────────

/// Everything the printed report needs.
pub struct ReportInput<'a> {
    pub report: &'a AggregatedReport,
    pub run: &'a RunResult,
    pub shape: RunShape,
    pub stagger: Duration,
    pub thresholds: &'a Thresholds,
}

pub fn render(input: &ReportInput<'_>) -> String {
    let mut out = String::new();
    // fmt::Write into a String cannot fail
    let _ = write_report(&mut out, input);
    out
}

fn write_report(out: &mut String, input: &ReportInput<'_>) -> fmt::Result {
    let r = input.report;
    let rule = "═".repeat(96);
    let thin = "─".repeat(96);

    writeln!(out)?;
    writeln!(out, "{rule}")?;
    writeln!(out, "  LOAD TEST REPORT")?;
    writeln!(out, "{rule}")?;

    // ── Run summary ─────────────────────────────────────────────
    let secs = input.run.elapsed.as_secs_f64();
    let failed: Vec<&TeamOutcome> = input.run.failed().collect();
    writeln!(
        out,
        "  Teams: {} x {} players   stagger {} ms   duration {:.2} s",
        input.shape.teams,
        input.shape.players,
        input.stagger.as_millis(),
        secs
    )?;
    writeln!(
        out,
        "  Completed: {}   Failed: {}   Operations: {}   Throughput: {:.2} ops/s",
        input.run.completed(),
        failed.len(),
        r.total_operations(),
        if secs > 0.0 {
            r.total_operations() as f64 / secs
        } else {
            0.0
        }
    )?;
    for outcome in &failed {
        if let TeamOutcome::Failed {
            index,
            team_id,
            error,
        } = outcome
        {
            writeln!(out, "    ✗ team #{index} {team_id}: {error}")?;
        }
    }

    // ── Per-operation table ─────────────────────────────────────
    writeln!(out)?;
    writeln!(
        out,
        "  {:<20} {:>7} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "Operation", "Count", "Avg", "p50", "p95", "p99", "Min", "Max"
    )?;
    writeln!(out, "  {thin}")?;
    for (op, s) in ordered_operations(r) {
        write_row(out, op, s)?;
    }

    if r.propagation.has_data() {
        writeln!(out)?;
        writeln!(out, "  Subscription propagation (ms)")?;
        writeln!(out, "  {thin}")?;
        write_row(out, "propagation", &r.propagation)?;
    }

    if !r.distribution.is_empty() {
        writeln!(out)?;
        writeln!(out, "  Latency distribution (all operations)")?;
        writeln!(out, "  {thin}")?;
        for b in &r.distribution {
            writeln!(
                out,
                "  {:>10.2} – {:>10.2} ms {:>8}",
                b.range_start_us as f64 / 1000.0,
                b.range_end_us as f64 / 1000.0,
                b.count
            )?;
        }
    }

    // ── Errors / connections / volume ───────────────────────────
    writeln!(out)?;
    writeln!(out, "  Errors: {}", r.errors.total)?;
    for g in &r.errors.groups {
        writeln!(out, "    {:>5} × {}: {}", g.count, g.operation, g.message)?;
    }
    writeln!(out, "  Peak connections: {}", r.connections.peak)?;
    writeln!(
        out,
        "  Data read back: {:.2} KB",
        r.total_bytes_transferred as f64 / 1024.0
    )?;

    // ── Findings ────────────────────────────────────────────────
    writeln!(out)?;
    writeln!(out, "  Bottlenecks")?;
    writeln!(out, "  {thin}")?;
    let bottlenecks = detect_bottlenecks(r, input.thresholds);
    if bottlenecks.is_empty() {
        writeln!(out, "    none detected")?;
    }
    for b in bottlenecks {
        writeln!(out, "    • {b}")?;
    }

    writeln!(out)?;
    writeln!(out, "  Recommendations")?;
    writeln!(out, "  {thin}")?;
    for rec in recommendations(r, input.thresholds, input.shape) {
        writeln!(out, "    {rec}")?;
    }
    writeln!(out, "{rule}")?;
    Ok(())
}

/// Machine-readable form of the same report.
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub teams: usize,
    pub players: usize,
    pub stagger_ms: u64,
    pub duration_ms: u64,
    pub teams_completed: usize,
    pub failed_teams: Vec<FailedTeam>,
    pub stats: &'a AggregatedReport,
    pub bottlenecks: Vec<Bottleneck>,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Serialize)]
pub struct FailedTeam {
    pub index: usize,
    pub team_id: String,
    pub error: String,
}

pub fn to_json(input: &ReportInput<'_>) -> serde_json::Result<String> {
    let failed_teams = input
        .run
        .failed()
        .map(|o| FailedTeam {
            index: o.index(),
            team_id: o.team_id().to_string(),
            error: match o {
                TeamOutcome::Failed { error, .. } => error.to_string(),
                TeamOutcome::Completed { .. } => String::new(),
            },
        })
        .collect();

    serde_json::to_string_pretty(&JsonReport {
        teams: input.shape.teams,
        players: input.shape.players,
        stagger_ms: input.stagger.as_millis() as u64,
        duration_ms: input.run.elapsed.as_millis() as u64,
        teams_completed: input.run.completed(),
        failed_teams,
        stats: input.report,
        bottlenecks: detect_bottlenecks(input.report, input.thresholds),
        recommendations: recommendations(input.report, input.thresholds, input.shape),
    })
}

fn write_row(out: &mut String, op: &str, s: &PercentileSet) -> fmt::Result {
    writeln!(
        out,
        "  {:<20} {:>7} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>10.2}",
        op,
        s.count,
        round2(s.avg),
        round2(s.p50),
        round2(s.p95),
        round2(s.p99),
        round2(s.min),
        round2(s.max)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;

    fn shape(teams: usize, players: usize) -> RunShape {
        RunShape { teams, players }
    }

    fn empty_run() -> RunResult {
        RunResult {
            outcomes: Vec::new(),
            elapsed: Duration::from_secs(1),
        }
    }

    #[test]
    fn canonical_operations_come_first() {
        let m = MetricsCollector::new();
        m.record_latency("zzz_custom", 1.0);
        m.record_latency("verify_read", 1.0);
        m.record_latency("aaa_custom", 1.0);
        m.record_latency("create_team", 1.0);

        let r = m.report();
        let names: Vec<&str> = ordered_operations(&r).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["create_team", "verify_read", "aaa_custom", "zzz_custom"]);
    }

    #[test]
    fn slowest_tie_keeps_first_in_order() {
        let m = MetricsCollector::new();
        m.record_latency("verify_read", 40.0);
        m.record_latency("create_team", 40.0);
        let r = m.report();
        assert_eq!(slowest_operation(&r), Some(("create_team", 40.0)));
    }

    #[test]
    fn high_variance_needs_more_than_five_samples() {
        // p50 = 10, p99 = 60, count = 10
        let m = MetricsCollector::new();
        for v in [10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 60.0] {
            m.record_latency("join_crew", v);
        }
        // count = 5: never flagged
        for v in [1.0, 1.0, 1.0, 1.0, 100.0] {
            m.record_latency("assign_role", v);
        }
        let r = m.report();
        assert_eq!(r.operations["join_crew"].p50, 10.0);
        assert_eq!(r.operations["join_crew"].p99, 60.0);

        let found = detect_bottlenecks(&r, &Thresholds::default());
        assert!(found.contains(&Bottleneck::HighVariance {
            operation: "join_crew".into(),
            p50: 10.0,
            p99: 60.0,
        }));
        assert!(!found
            .iter()
            .any(|b| matches!(b, Bottleneck::HighVariance { operation, .. } if operation == "assign_role")));
    }

    #[test]
    fn propagation_and_error_rate_flags() {
        let m = MetricsCollector::new();
        for _ in 0..10 {
            m.record_latency("start_game", 5.0);
        }
        m.record_error("start_game", &"denied");
        m.record_listener_propagation(900.0);

        let found = detect_bottlenecks(&m.report(), &Thresholds::default());
        assert!(found.contains(&Bottleneck::SlowPropagation { p95: 900.0 }));
        assert!(found.contains(&Bottleneck::HighErrorRate { rate: 0.1 }));
    }

    #[test]
    fn quiet_run_gets_only_general_advice() {
        let m = MetricsCollector::new();
        m.record_latency("create_team", 20.0);
        m.record_listener_propagation(15.0);
        let recs = recommendations(&m.report(), &Thresholds::default(), shape(3, 4));
        assert_eq!(recs.len(), 2);
        assert!(recs.iter().all(|r| r.severity == Severity::Info));
    }

    #[test]
    fn critical_beats_warning() {
        let m = MetricsCollector::new();
        m.record_latency("create_team", 1500.0);
        let recs = recommendations(&m.report(), &Thresholds::default(), shape(1, 1));
        assert_eq!(recs[0].severity, Severity::Critical);
        assert_eq!(
            recs.iter()
                .filter(|r| r.severity == Severity::Warning)
                .count(),
            0
        );

        let m = MetricsCollector::new();
        m.record_latency("create_team", 700.0);
        let recs = recommendations(&m.report(), &Thresholds::default(), shape(1, 1));
        assert_eq!(recs[0].severity, Severity::Warning);
    }

    #[test]
    fn threshold_driven_notes() {
        let m = MetricsCollector::new();
        m.record_latency("create_team", 1.0);
        m.record_error("create_team", &"boom");
        m.record_listener_propagation(350.0);
        m.add_data_transferred(6 * 1024 * 1024);
        for _ in 0..101 {
            m.connection_opened();
        }
        let recs = recommendations(&m.report(), &Thresholds::default(), shape(30, 10));
        // errors, connections, propagation, payload, 2 general, capacity
        assert_eq!(recs.len(), 7);
        assert!(recs.last().unwrap().message.contains("30 teams x 10 players"));

        let none = recommendations(&m.report(), &Thresholds::default(), shape(30, 9));
        assert_eq!(none.len(), 6);
    }

    #[test]
    fn thresholds_are_overridable() {
        let m = MetricsCollector::new();
        m.record_latency("create_team", 120.0);
        let t = Thresholds {
            warning_p95_ms: 100.0,
            ..Thresholds::default()
        };
        let recs = recommendations(&m.report(), &t, shape(1, 1));
        assert_eq!(recs[0].severity, Severity::Warning);
    }

    #[test]
    fn rendering_includes_every_block() {
        let m = MetricsCollector::new();
        m.record_latency("create_team", 12.346);
        m.record_latency("custom_op", 3.0);
        m.record_error("create_team", &"denied");
        m.record_listener_propagation(4.0);
        let report = m.report();
        let run = empty_run();
        let text = render(&ReportInput {
            report: &report,
            run: &run,
            shape: shape(1, 1),
            stagger: Duration::from_millis(200),
            thresholds: &Thresholds::default(),
        });

        assert!(text.contains("create_team"));
        assert!(text.contains("12.35"));
        assert!(text.contains("Subscription propagation"));
        assert!(text.contains("1 × create_team: denied"));
        assert!(text.contains("Slowest operation: create_team"));
        assert!(text.find("create_team").unwrap() < text.find("custom_op").unwrap());
    }

    #[test]
    fn json_export_carries_failures_and_stats() {
        use crate::error::{StoreError, WorkloadError};

        let m = MetricsCollector::new();
        m.record_latency("start_game", 2.0);
        let report = m.report();
        let run = RunResult {
            outcomes: vec![TeamOutcome::Failed {
                index: 4,
                team_id: "loadtest_team_005".into(),
                error: WorkloadError::Operation {
                    operation: "start_game".into(),
                    source: StoreError::Redis("down".into()),
                },
            }],
            elapsed: Duration::from_millis(1500),
        };
        let json = to_json(&ReportInput {
            report: &report,
            run: &run,
            shape: shape(5, 2),
            stagger: Duration::from_millis(200),
            thresholds: &Thresholds::default(),
        })
        .unwrap();

        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["duration_ms"], 1500);
        assert_eq!(v["teams_completed"], 0);
        assert_eq!(v["failed_teams"][0]["index"], 4);
        assert_eq!(v["failed_teams"][0]["error"], "start_game failed: redis: down");
        assert_eq!(v["stats"]["operations"]["start_game"]["count"], 1);
    }

    #[test]
    fn propagation_block_hidden_without_samples() {
        let m = MetricsCollector::new();
        m.record_latency("create_team", 1.0);
        let report = m.report();
        let run = empty_run();
        let text = render(&ReportInput {
            report: &report,
            run: &run,
            shape: shape(1, 1),
            stagger: Duration::ZERO,
            thresholds: &Thresholds::default(),
        });
        assert!(!text.contains("Subscription propagation"));
    }
}
