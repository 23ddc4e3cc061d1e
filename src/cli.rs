//! CLI definition using clap.

use std::path::PathBuf;

use clap::Parser;

/// Harbor - application operator
#[derive(Parser, Debug)]
#[command(name = "harbor")]
#[command(version)]
#[command(about = "Reconciles application records into running workloads")]
#[command(
    long_about = "Harbor watches application records, keeps one workload per application at the requested replica count, and reports the running pods back into each application's status."
)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the number of reconciliation workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Insert a demo application (ns/x, nginx, 2 replicas) on startup
    #[arg(long, default_value_t = false)]
    pub seed_demo: bool,
}
