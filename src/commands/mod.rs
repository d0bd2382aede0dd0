// src/commands/mod.rs
//! Command handlers for the orderly CLI

pub mod progress;

use crate::cli::TransactionArgs;
use anyhow::{Context, Result};
use orderly::{
    ActionItem, ArchiveDir, Config, DependencyGraph, DpkgBackend, Executor, OrderResult,
    PackageManager, RecordingBackend, Snapshot, StaticArchives,
};
use progress::CliProgress;
use std::path::Path;
use tracing::info;

/// Archive cache used when no directory is given
const DEFAULT_ARCHIVE_DIR: &str = "/var/cache/apt/archives";

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn load_graph(path: &Path) -> Result<DependencyGraph> {
    let snapshot = Snapshot::load(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    Ok(snapshot.build()?)
}

/// Order a snapshot and print the resulting actions
pub fn cmd_plan(args: &TransactionArgs, json: bool, show_batches: bool) -> Result<OrderResult> {
    let config = load_config(args.config.as_deref())?;
    let graph = load_graph(&args.snapshot)?;

    let mut pm = PackageManager::new(&graph, config.clone());
    match &args.archive_dir {
        Some(dir) => {
            let missing = pm.get_archives(&ArchiveDir::new(dir));
            if missing > 0 {
                println!("{} archives missing from {}", missing, dir.display());
            }
        }
        // Planning only needs plausible paths
        None => {
            pm.get_archives(&StaticArchives::for_all(&graph, Path::new(DEFAULT_ARCHIVE_DIR)));
        }
    }

    let result = pm.order_install()?;
    info!("Transaction {} planned", pm.transaction_id());

    if json {
        let actions: Vec<serde_json::Value> = pm
            .actions()
            .items()
            .iter()
            .map(|item| {
                let mut value = serde_json::json!({ "operation": item.operation() });
                if let Some(pkg) = item.package() {
                    value["package"] = serde_json::json!(graph.full_name(pkg));
                }
                if let ActionItem::Install { archive, .. } = item {
                    value["archive"] = serde_json::json!(archive.display().to_string());
                }
                value
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&actions)?);
    } else if pm.actions().is_empty() {
        println!("Nothing to do.");
    } else {
        for (index, action) in pm.describe_actions().iter().enumerate() {
            println!("{:4}  {}", index + 1, action);
        }
    }

    if show_batches {
        let backend = RecordingBackend::new();
        let plan = Executor::new(&config).plan(&graph, pm.actions(), &backend);
        println!();
        println!("Back-end batches:");
        for batch in plan {
            let packages: Vec<String> = batch.packages().map(|p| graph.full_name(p)).collect();
            println!("  {} {}", batch.operation, packages.join(" "));
        }
    }

    if let OrderResult::Incomplete { reason, actions } = &result {
        println!("Plan is incomplete after {} actions: {}", actions, reason);
    }
    Ok(result)
}

/// Order a snapshot and run it through the installer back-end
pub fn cmd_apply(args: &TransactionArgs, dry_run: bool) -> Result<OrderResult> {
    let config = load_config(args.config.as_deref())?;
    let graph = load_graph(&args.snapshot)?;

    let archive_dir = args
        .archive_dir
        .clone()
        .unwrap_or_else(|| DEFAULT_ARCHIVE_DIR.into());
    let mut pm = PackageManager::new(&graph, config.clone());
    let missing = pm.get_archives(&ArchiveDir::new(&archive_dir));
    if missing > 0 {
        println!(
            "{} archives missing from {}; the run will stop before them",
            missing,
            archive_dir.display()
        );
    }

    let progress = CliProgress::new();
    let result = if dry_run {
        let mut backend = RecordingBackend::new();
        let result = pm.do_install(&mut backend, &progress)?;
        for batch in backend.batches() {
            println!("{} {}", batch.operation, batch.packages.join(" "));
        }
        result
    } else {
        let mut backend = DpkgBackend::new(&config.dpkg)?;
        pm.do_install(&mut backend, &progress)?
    };

    match &result {
        OrderResult::Completed => println!(
            "Transaction {} completed: {} actions",
            pm.transaction_id(),
            pm.actions().len()
        ),
        OrderResult::Incomplete { reason, actions } => println!(
            "Transaction {} incomplete after {} actions: {}",
            pm.transaction_id(),
            actions,
            reason
        ),
    }
    Ok(result)
}

/// Print the effective configuration as TOML
pub fn cmd_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
