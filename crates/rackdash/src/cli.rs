//! Clap derive structures for the `rackdash` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// rackdash -- network telemetry dashboard backend
#[derive(Debug, Parser)]
#[command(
    name = "rackdash",
    version,
    about = "Poll a mesh router's cloud API and serve device telemetry over HTTP",
    long_about = "Polls the upstream device inventory on a fixed interval, keeps a rolling\n\
        history for trend charts, and runs on-demand speed tests. Everything is\n\
        exposed as JSON over HTTP for a dashboard front end.",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "RACKDASH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also write logs to a daily-rotated file in this directory
    #[arg(long, env = "RACKDASH_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the poller and HTTP server (default)
    Serve(ServeArgs),

    /// Print the resolved configuration and exit
    Config,
}

#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// Listen address (overrides `server.bind`)
    #[arg(long, short = 'b')]
    pub bind: Option<String>,
}
