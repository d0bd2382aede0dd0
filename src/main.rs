// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use orderly::OrderResult;

/// Exit status for a run that stopped early but can be resumed
const EXIT_INCOMPLETE: i32 = 2;

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Plan {
            args,
            json,
            batches,
        } => commands::cmd_plan(&args, json, batches)?,
        Commands::Apply { args, dry_run } => commands::cmd_apply(&args, dry_run)?,
        Commands::Config { config } => {
            commands::cmd_config(config.as_deref())?;
            return Ok(());
        }
    };

    if let OrderResult::Incomplete { .. } = result {
        std::process::exit(EXIT_INCOMPLETE);
    }
    Ok(())
}
