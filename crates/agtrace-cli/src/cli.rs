use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "agtrace", version, about = "Live ingestion and query pipeline for local AI coding-assistant session logs")]
pub struct Cli {
    /// Workspace data directory (overrides config file and AGTRACE_PATH).
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one Manual import run over the configured log root and exit.
    Import {
        /// Override the log root this run walks.
        #[arg(long)]
        log_root: Option<PathBuf>,
    },
    /// Run the Lifecycle: initial import, file watcher, Hub, and subscription
    /// endpoint, until interrupted.
    Watch {
        /// Override the log root the watcher subscribes to.
        #[arg(long)]
        log_root: Option<PathBuf>,
        /// Port the subscription endpoint listens on.
        #[arg(long, default_value_t = 4317)]
        port: u16,
    },
    /// Print a summary of sessions currently in the store.
    List,
}
