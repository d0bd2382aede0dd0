// src/backend/mod.rs

//! Installer back-ends and batch execution
//!
//! The scheduler only emits actions. The [`Executor`] cuts them into
//! batches and hands each batch to an [`InstallerBackend`], which performs
//! the work (dpkg in production, a recorder in tests) and reports per-package
//! state changes through a [`StatusTracker`].

pub mod dpkg;
pub mod status;

pub use dpkg::DpkgBackend;
pub use status::{StatusEvent, StatusTracker, expected_states};

use crate::action::{ActionItem, ActionLog, Batch, BatchLimits, Operation, batches};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::progress::{ExecutionPhase, ProgressTracker};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Outcome of one back-end invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub exit_code: Option<i32>,
    /// Per-package errors reported on the status channel
    pub errors: Vec<String>,
}

impl BatchReport {
    pub fn ok() -> Self {
        Self {
            exit_code: Some(0),
            errors: Vec::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Something that can carry out batches of installer actions
pub trait InstallerBackend {
    fn name(&self) -> &str;

    /// Bytes one action contributes to the command line
    fn arg_size(&self, graph: &DependencyGraph, item: &ActionItem) -> usize {
        match item {
            ActionItem::Install { archive, .. } => archive.as_os_str().len() + 1,
            other => other
                .package()
                .map(|p| graph.full_name(p).len() + 1)
                .unwrap_or(0),
        }
    }

    fn run_batch(
        &mut self,
        graph: &DependencyGraph,
        batch: &Batch,
        status: &mut StatusTracker<'_>,
    ) -> Result<BatchReport>;
}

/// What happened while running a transaction's actions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub batches_run: usize,
    pub batches_total: usize,
    /// Action items handed to the back-end by successful batches
    pub actions_run: usize,
    pub cancelled: bool,
}

/// Drives an installer back-end through an action log
pub struct Executor {
    limits: BatchLimits,
    triggers_pending: bool,
    configure_pending: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl Executor {
    pub fn new(config: &Config) -> Self {
        Self {
            limits: BatchLimits {
                max_args: config.dpkg.max_args,
                max_arg_bytes: config.dpkg.max_arg_bytes,
            },
            triggers_pending: config.dpkg.triggers_pending,
            configure_pending: config.configure_pending(),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Option<Arc<AtomicBool>>) -> Self {
        self.cancel = cancel;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Batches the back-end will be asked to run
    pub fn plan(&self, graph: &DependencyGraph, actions: &ActionLog, backend: &dyn InstallerBackend) -> Vec<Batch> {
        let mut items = actions.items().to_vec();
        if self.configure_pending {
            items.push(ActionItem::ConfigurePending);
        }
        batches(&items, self.triggers_pending, self.limits, |item| {
            backend.arg_size(graph, item)
        })
    }

    /// Run every batch in order
    ///
    /// Cancellation is honored before each install, remove or purge batch and
    /// yields a report with `cancelled` set. A failed batch is an error.
    pub fn run(
        &self,
        graph: &DependencyGraph,
        actions: &ActionLog,
        backend: &mut dyn InstallerBackend,
        progress: &dyn ProgressTracker,
    ) -> Result<ExecutionReport> {
        let plan = self.plan(graph, actions, &*backend);
        let mut report = ExecutionReport {
            batches_total: plan.len(),
            ..ExecutionReport::default()
        };
        if plan.is_empty() {
            progress.finish_with_message("Nothing to do");
            return Ok(report);
        }

        let mut status = StatusTracker::new(progress);
        for batch in &plan {
            for pkg in batch.packages() {
                status.expect(&graph.full_name(pkg), batch.operation);
            }
        }
        progress.set_length(status.total_steps());

        for (index, batch) in plan.iter().enumerate() {
            if batch.operation.is_destructive() && self.is_cancelled() {
                warn!(
                    "Cancelled before batch {} of {} ({})",
                    index + 1,
                    plan.len(),
                    batch.operation
                );
                progress.finish_with_error("Cancelled");
                report.cancelled = true;
                return Ok(report);
            }

            progress.set_phase(phase_of(batch.operation));
            info!(
                "Running {} {} with {} items ({}/{})",
                backend.name(),
                batch.operation,
                batch.items.len(),
                index + 1,
                plan.len()
            );

            let outcome = backend.run_batch(graph, batch, &mut status)?;
            if !outcome.success() {
                let mut message = match outcome.exit_code {
                    Some(code) => format!("exited with status {}", code),
                    None => "terminated by signal".to_string(),
                };
                if !outcome.errors.is_empty() {
                    message = format!("{}: {}", message, outcome.errors.join("; "));
                }
                progress.finish_with_error(&message);
                return Err(Error::Backend {
                    operation: batch.operation.to_string(),
                    message,
                });
            }
            report.batches_run += 1;
            report.actions_run += batch.items.len();
        }

        progress.finish_with_message("Transaction complete");
        Ok(report)
    }
}

fn phase_of(operation: Operation) -> ExecutionPhase {
    match operation {
        Operation::Install => ExecutionPhase::Unpacking,
        Operation::Configure | Operation::ConfigurePending => ExecutionPhase::Configuring,
        Operation::Remove | Operation::Purge => ExecutionPhase::Removing,
        Operation::TriggersPending => ExecutionPhase::Triggers,
    }
}

/// One batch as seen by [`RecordingBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBatch {
    pub operation: Operation,
    /// `name:arch` for every package in the batch
    pub packages: Vec<String>,
}

/// Back-end that records batches instead of running them
///
/// Status lines for the expected states are fed to the tracker, so progress
/// behaves as with a real back-end.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    batches: Vec<RecordedBatch>,
    fail_at: Option<usize>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the batch with this index (0-based)
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn batches(&self) -> &[RecordedBatch] {
        &self.batches
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.batches.iter().map(|b| b.operation).collect()
    }
}

impl InstallerBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recorder"
    }

    fn run_batch(
        &mut self,
        graph: &DependencyGraph,
        batch: &Batch,
        status: &mut StatusTracker<'_>,
    ) -> Result<BatchReport> {
        let index = self.batches.len();
        let packages: Vec<String> = batch.packages().map(|p| graph.full_name(p)).collect();
        self.batches.push(RecordedBatch {
            operation: batch.operation,
            packages: packages.clone(),
        });

        if self.fail_at == Some(index) {
            if let Some(first) = packages.first() {
                status.handle_line(&format!("status: {}: error: simulated failure", first));
            }
            return Ok(BatchReport {
                exit_code: Some(1),
                errors: status.take_errors().into_iter().map(|(p, m)| format!("{}: {}", p, m)).collect(),
            });
        }

        for package in &packages {
            for state in expected_states(batch.operation) {
                status.handle_line(&format!("status: {}: {}", package, state));
            }
        }
        Ok(BatchReport::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{PackageRecord, Snapshot, VersionRecord};
    use crate::progress::SilentProgress;
    use std::path::PathBuf;

    fn graph() -> DependencyGraph {
        Snapshot::new("amd64")
            .package(PackageRecord::new("a").candidate(VersionRecord::new("1")).install())
            .package(PackageRecord::new("b").installed(VersionRecord::new("1")).remove())
            .build()
            .unwrap()
    }

    fn log(graph: &DependencyGraph) -> ActionLog {
        let a = graph.lookup("a").unwrap();
        let b = graph.lookup("b").unwrap();
        let mut log = ActionLog::new();
        log.push(ActionItem::Remove(b));
        log.push(ActionItem::Install {
            package: a,
            archive: PathBuf::from("/pool/a_1_amd64.deb"),
        });
        log.push(ActionItem::Configure(a));
        log
    }

    #[test]
    fn test_executor_runs_batches_in_order() {
        let graph = graph();
        let progress = SilentProgress::new();
        let mut backend = RecordingBackend::new();

        let report = Executor::new(&Config::default())
            .run(&graph, &log(&graph), &mut backend, &progress)
            .unwrap();

        assert_eq!(report.batches_run, 3);
        assert_eq!(report.actions_run, 3);
        assert!(!report.cancelled);
        assert_eq!(
            backend.operations(),
            vec![Operation::Remove, Operation::Install, Operation::Configure]
        );
        assert_eq!(backend.batches()[1].packages, vec!["a:amd64"]);
        assert_eq!(progress.position(), progress.length());
        assert!(progress.is_finished());
    }

    #[test]
    fn test_configure_pending_appended_in_smart_mode() {
        let graph = graph();
        let mut config = Config::default();
        config.scheduler.configure = crate::config::ConfigureMode::Smart;
        let mut backend = RecordingBackend::new();

        Executor::new(&config)
            .run(&graph, &log(&graph), &mut backend, &SilentProgress::new())
            .unwrap();
        assert_eq!(backend.operations().last(), Some(&Operation::ConfigurePending));
    }

    #[test]
    fn test_failed_batch_is_backend_error() {
        let graph = graph();
        let mut backend = RecordingBackend::new().failing_at(1);

        let err = Executor::new(&Config::default())
            .run(&graph, &log(&graph), &mut backend, &SilentProgress::new())
            .unwrap_err();
        match err {
            Error::Backend { operation, message } => {
                assert_eq!(operation, "install");
                assert!(message.contains("simulated failure"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(backend.batches().len(), 2);
    }

    #[test]
    fn test_cancel_before_destructive_batch() {
        let graph = graph();
        let cancel = Arc::new(AtomicBool::new(true));
        let mut backend = RecordingBackend::new();

        let report = Executor::new(&Config::default())
            .with_cancel(Some(cancel))
            .run(&graph, &log(&graph), &mut backend, &SilentProgress::new())
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.batches_run, 0);
        assert_eq!(report.actions_run, 0);
        assert!(backend.batches().is_empty());
    }

    #[test]
    fn test_default_arg_size() {
        let graph = graph();
        let backend = RecordingBackend::new();
        let a = graph.lookup("a").unwrap();
        assert_eq!(backend.arg_size(&graph, &ActionItem::Configure(a)), "a:amd64".len() + 1);
        assert_eq!(backend.arg_size(&graph, &ActionItem::ConfigurePending), 0);
    }
}
