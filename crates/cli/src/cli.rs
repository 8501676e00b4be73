use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Per-target exclusive task scheduler.
///
/// Runs a plan of simulated tasks through the scheduler so its behaviour
/// can be observed without a real executor.
#[derive(Parser, Debug)]
#[command(name = "keygate", version, about = "Per-target exclusive task scheduler")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a JSON task plan against the simulated executor.
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Path to a JSON array of `{ "id", "target", "duration_ms", "fail" }` entries.
    pub plan: PathBuf,

    /// Path to a keygate.toml with a `[scheduler]` table.
    #[arg(long, env = "KEYGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Maximum tasks in flight (0 = unbounded). Overrides the config file.
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Stop at the first failed task and cancel the rest.
    #[arg(long)]
    pub fail_fast: bool,

    /// Seconds to wait for aborted tasks to unwind on cancellation.
    #[arg(long)]
    pub drain_timeout_secs: Option<u64>,

    /// Print the full run report as JSON instead of a summary.
    #[arg(long)]
    pub json: bool,
}
