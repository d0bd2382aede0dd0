// src/cli.rs
//! CLI definitions for orderly
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "orderly")]
#[command(author = "orderly Contributors")]
#[command(version)]
#[command(about = "Order and run package transactions on dpkg-based systems", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Inputs shared by every command
#[derive(Args, Debug, Clone)]
pub struct TransactionArgs {
    /// JSON snapshot of the system state and the desired actions
    #[arg(short, long)]
    pub snapshot: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding the downloaded archives
    #[arg(short, long)]
    pub archive_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the action sequence for a snapshot without running anything
    Plan {
        #[command(flatten)]
        args: TransactionArgs,

        /// Print the actions as JSON
        #[arg(long)]
        json: bool,

        /// Also show the back-end batches
        #[arg(long)]
        batches: bool,
    },

    /// Order a snapshot and run the actions through dpkg
    Apply {
        #[command(flatten)]
        args: TransactionArgs,

        /// Record the batches instead of invoking dpkg
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the effective configuration
    Config {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
