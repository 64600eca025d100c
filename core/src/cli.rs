use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::dispatch::FailurePolicy;

/// Command line interface for the localbus driver.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Handler failure policy (abort or continue).
    #[arg(long)]
    pub failure_policy: Option<FailurePolicy>,
    /// Refuse a second listener with the same id on one topic (true/false).
    #[arg(long)]
    pub reject_duplicates: Option<bool>,
    /// Log filter directive, e.g. `debug` or `localbus=trace`.
    #[arg(long)]
    pub log: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Apply a line-delimited JSON script to a fresh bus.
    Replay {
        /// Script file; reads stdin when omitted.
        script: Option<PathBuf>,
    },
    /// Print the bus id and the resolved configuration.
    Info,
}
