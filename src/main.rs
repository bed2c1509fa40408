//!
//! tablescout runner
//! -----------------
//! Standalone host for the connector: loads properties from a JSON file, starts the
//! coordinator, prints the task configurations, reprints them every time the table set
//! changes, and stops cleanly on Ctrl-C.
//!
//! Usage: tablescout <props.json> [--workers N]

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use tablescout::config::{apply_env_overrides, load_props_file};
use tablescout::{NotifyContext, SourceCoordinator};

const DEFAULT_WORKERS: usize = 4;

fn parse_workers_arg(args: &[String]) -> Result<usize> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--workers" {
            let raw = args.get(i + 1).ok_or_else(|| anyhow!("--workers needs a value"))?;
            let n = raw.parse::<usize>().with_context(|| format!("invalid --workers value '{}'", raw))?;
            if n == 0 {
                return Err(anyhow!("--workers must be positive"));
            }
            return Ok(n);
        }
        i += 1;
    }
    Ok(DEFAULT_WORKERS)
}

fn print_task_configs(coord: &SourceCoordinator, workers: usize) -> Result<()> {
    let configs = coord.task_configs(workers)?;
    let out = serde_json::json!({
        "tables": coord.tables().len(),
        "tasks": configs,
        "monitor": coord.monitor_stats(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Report task configs now and on every reconfiguration until `shutdown` resolves or a
/// report fails, then stop the coordinator either way.
async fn run_until<S, R>(coord: &SourceCoordinator, ctx: &NotifyContext, shutdown: S, mut report: R) -> Result<()>
where
    S: Future,
    R: FnMut(&SourceCoordinator) -> Result<()>,
{
    tokio::pin!(shutdown);
    let mut outcome = report(coord);
    while outcome.is_ok() {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ctx.reconfigured() => {
                info!(target: "tablescout", "table set changed, recomputing task configs");
                outcome = report(coord);
            }
        }
    }
    if let Err(e) = &outcome {
        error!(target: "tablescout", "couldn't report task configs, stopping: {:#}", e);
    }

    coord.stop().await;
    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("log filter")?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let path = args
        .iter()
        .find(|a| !a.starts_with("--") && a.parse::<usize>().is_err())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("usage: tablescout <props.json> [--workers N]"))?;
    let workers = parse_workers_arg(&args)?;

    let mut props = load_props_file(&path).with_context(|| format!("loading {}", path.display()))?;
    apply_env_overrides(&mut props);

    let ctx = Arc::new(NotifyContext::new());
    let coord = SourceCoordinator::new(ctx.clone());
    coord.start(props).await.context("starting connector")?;
    info!(target: "tablescout", "connector running with up to {} workers; Ctrl-C to stop", workers);

    run_until(&coord, &ctx, tokio::signal::ctrl_c(), |c| print_task_configs(c, workers)).await
}
