mod cli;
mod plan;
mod summary;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::Notify;
use tracing::info;
use tracing_subscriber::EnvFilter;

use keygate_core::config::load_dotenv;
use keygate_core::{FailurePolicy, SchedulerConfig};
use keygate_scheduler::source::from_iter;
use keygate_scheduler::Scheduler;

use crate::cli::{CliArgs, Command, RunArgs};
use crate::plan::{load_plan, SimulatedExecutor};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env first so RUST_LOG from it reaches the filter.
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    match args.command {
        Command::Run(run_args) => run_plan(run_args).await,
    }
}

/// `RUST_LOG` from the process environment (or a loaded `.env`), else `info`.
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn resolve_config(args: &RunArgs) -> Result<SchedulerConfig> {
    let mut config = match &args.config {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SchedulerConfig::from_env().context("invalid KEYGATE_* environment")?,
    };
    if let Some(max) = args.max_concurrency {
        config.max_concurrency = max;
    }
    if args.fail_fast {
        config.failure_policy = FailurePolicy::FailFast;
    }
    if let Some(secs) = args.drain_timeout_secs {
        config.drain_timeout_secs = Some(secs);
    }
    config.validate()?;
    Ok(config)
}

async fn run_plan(args: RunArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    let tasks = load_plan(&args.plan)?;
    info!(tasks = tasks.len(), plan = %args.plan.display(), "plan loaded");

    // Ctrl-C / SIGTERM cancels the run; aborted tasks release their targets.
    let shutdown = Arc::new(Notify::new());
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        trigger.notify_one();
    });

    let scheduler = Scheduler::new(SimulatedExecutor, config);
    scheduler.config().log_summary();
    let report = scheduler.run_until(from_iter(tasks), shutdown).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", summary::render(&report));
    }

    report.into_result()?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
