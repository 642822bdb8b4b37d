use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use team_loadtest::cleanup;
use team_loadtest::config::{Cli, Pacing};
use team_loadtest::metrics::MetricsCollector;
use team_loadtest::orchestrator::{self, RunPlan};
use team_loadtest::report::{self, ReportInput, RunShape};
use team_loadtest::store::{MemoryStore, RedisStore, Store};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins; otherwise `--quiet`/`--verbose` pick the level.
/// Logs go to stderr so the report on stdout stays clean.
fn init_logging(cli: &Cli) {
    let default = if cli.quiet {
        "warn"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let thresholds = cli.load_thresholds()?;

    // ── 1. Connect to the backing store ──────────────────────────
    let store = connect(&cli).await?;

    if cli.cleanup_only {
        debug!("cleanup only");
        println!("{}", cleanup::cleanup(store.as_ref()).await);
        return Ok(());
    }

    // ── 2. Run every team ────────────────────────────────────────
    println!();
    println!("╔══════════════════════════════════════════════════╗");
    println!("║   TEAM LOAD TEST                                 ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!(
        "   {} teams × {} players, {} ms stagger",
        cli.teams,
        cli.players(),
        cli.stagger
    );

    let metrics = Arc::new(MetricsCollector::new());
    let plan = RunPlan {
        teams: cli.teams,
        players: cli.players(),
        stagger: cli.stagger(),
        seed: cli.seed,
        run_tag: RunPlan::new_run_tag(),
        pacing: Pacing::default(),
    };
    info!(run_tag = %plan.run_tag, "starting run");
    let result = orchestrator::run_teams(store.clone(), metrics.clone(), &plan).await;

    // ── 3. Report ────────────────────────────────────────────────
    let stats = metrics.report();
    let input = ReportInput {
        report: &stats,
        run: &result,
        shape: RunShape {
            teams: plan.teams,
            players: plan.players,
        },
        stagger: plan.stagger,
        thresholds: &thresholds,
    };
    print!("{}", report::render(&input));

    if let Some(path) = &cli.report_json {
        let json = report::to_json(&input).context("serializing report")?;
        std::fs::write(path, json)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!(path = %path.display(), "wrote JSON report");
    }

    // ── 4. Cleanup ───────────────────────────────────────────────
    if cli.no_cleanup {
        info!("leaving generated data in place");
    } else {
        println!("{}", cleanup::cleanup(store.as_ref()).await);
    }

    Ok(())
}

async fn connect(cli: &Cli) -> anyhow::Result<Arc<dyn Store>> {
    if cli.in_memory {
        debug!("using in-process store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let Some(url) = cli.redis_url.as_deref() else {
        bail!("no backing store configured: pass --redis-url, set LOADTEST_REDIS_URL, or use --in-memory");
    };
    debug!(url, "connecting");
    let store = RedisStore::connect(url, &cli.namespace)
        .await
        .with_context(|| format!("cannot connect to {url}"))?;
    debug!("connected");
    Ok(Arc::new(store))
}
