//! Clap derive structures for `netweaved`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// netweaved -- live network topology for a router fleet
#[derive(Debug, Parser)]
#[command(
    name = "netweaved",
    version,
    about = "Track devices and infer network topology",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    /// Defaults to `run`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "NETWEAVE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the topology manager until interrupted
    Run,

    /// Validate the configuration and print the effective settings
    CheckConfig,

    /// Feed recorded agent messages through ingestion and print the
    /// resulting topology as JSON
    Replay(ReplayArgs),
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// JSON-lines file of `{"topic": ..., "payload": {...}}` records
    pub file: PathBuf,

    /// Pretty-print the snapshot
    #[arg(long)]
    pub pretty: bool,
}
