// src/scheduler/mod.rs

//! Transaction scheduler
//!
//! `PackageManager` turns the decisions recorded in a [`DependencyGraph`]
//! into a safe sequence of installer actions. The transaction list is sorted
//! first; then every entry is unpacked or removed in that order, and each
//! step pulls in whatever it needs on the fly:
//!
//! - pre-dependencies are unpacked and configured first
//! - installed packages that conflict are upgraded out of the way or removed
//! - packages the new version breaks are upgraded first where possible
//! - `Multi-Arch: same` siblings are unpacked in lock-step
//!
//! Cycles are broken through the [`ObligationStack`]: a package whose work
//! is already in flight further up counts as transiently satisfied. A final
//! sweep configures everything still left unpacked.

mod configure;
pub mod obligation;
mod remove;
mod unpack;

pub use obligation::{Obligation, ObligationStack, Phase};

use crate::action::{ActionItem, ActionLog};
use crate::archive::ArchiveSource;
use crate::backend::{Executor, InstallerBackend};
use crate::config::{Config, ConfigureMode, SchedulerConfig};
use crate::error::{Error, Result};
use crate::graph::{DepKind, DependencyGraph, DesiredAction, Needs, PackageId, VersionId};
use crate::order::{EntryState, TransactionList, order_configure, order_critical, order_unpack};
use crate::progress::{ExecutionPhase, ProgressTracker};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// How a transaction run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderResult {
    /// Every entry reached its final state
    Completed,
    /// The run stopped cleanly; work done so far is kept and the caller may resume
    Incomplete {
        reason: String,
        /// Actions emitted (ordering) or run (execution) before the stop
        actions: usize,
    },
}

impl OrderResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, OrderResult::Completed)
    }
}

/// A dependency that kept a package from being configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blocker {
    pub package: PackageId,
    /// The alternative that was tried last and could not be configured
    pub target: PackageId,
    pub kind: DepKind,
    /// Somewhere down the chain a dependency was waiting on in-flight work
    pub in_cycle: bool,
}

/// Outcome of an attempt to bring a package forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The package reached the requested state
    Done,
    /// The same work is already in flight further up; treat as satisfied
    Deferred,
    /// A dependency could not be satisfied now
    Blocked(Blocker),
}

/// Stack reserved for each nested obligation on the scheduler thread
const STACK_PER_OBLIGATION: usize = 32 * 1024;

/// Stack for everything below the first obligation
const BASE_STACK: usize = 1024 * 1024;

fn scheduler_stack_size(config: &SchedulerConfig) -> usize {
    BASE_STACK.saturating_add(config.max_depth.saturating_mul(STACK_PER_OBLIGATION))
}

/// Total obligations a run may start before it is considered stuck
fn step_budget(config: &SchedulerConfig, entries: usize) -> u64 {
    config.max_loop_count.saturating_mul(entries as u64 + 1)
}

/// Schedules one transaction over a dependency graph
pub struct PackageManager<'g> {
    graph: &'g DependencyGraph,
    config: Config,
    list: TransactionList,
    archives: HashMap<PackageId, PathBuf>,
    actions: ActionLog,
    obligations: ObligationStack,
    transaction_id: Uuid,
    cancel: Option<Arc<AtomicBool>>,
    /// Bumped on every entry state change; resolution loops repeat while it moves
    transitions: u64,
}

impl<'g> PackageManager<'g> {
    /// Build the transaction list for the graph's decisions
    pub fn new(graph: &'g DependencyGraph, config: Config) -> Self {
        let list = TransactionList::build(graph, &config.scheduler);
        let obligations = ObligationStack::new(
            config.scheduler.max_depth,
            step_budget(&config.scheduler, list.len()),
        );
        let actions = ActionLog::new().with_triggers_pending(config.dpkg.triggers_pending);

        Self {
            graph,
            config,
            list,
            archives: HashMap::new(),
            actions,
            obligations,
            transaction_id: Uuid::new_v4(),
            cancel: None,
            transitions: 0,
        }
    }

    /// Observe a cancellation token between obligations and before destructive batches
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.obligations = ObligationStack::new(
            self.config.scheduler.max_depth,
            step_budget(&self.config.scheduler, self.list.len()),
        )
        .with_cancel(Some(cancel.clone()));
        self.cancel = Some(cancel);
        self
    }

    pub fn graph(&self) -> &'g DependencyGraph {
        self.graph
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn list(&self) -> &TransactionList {
        &self.list
    }

    pub fn actions(&self) -> &ActionLog {
        &self.actions
    }

    pub fn transaction_id(&self) -> Uuid {
        self.transaction_id
    }

    pub fn archive(&self, pkg: PackageId) -> Option<&PathBuf> {
        self.archives.get(&pkg)
    }

    /// Total obligations started so far
    pub fn steps(&self) -> u64 {
        self.obligations.steps()
    }

    /// Human readable action sequence, e.g. `Install(a:amd64)`
    pub fn describe_actions(&self) -> Vec<String> {
        self.actions
            .items()
            .iter()
            .map(|item| item.describe(self.graph))
            .collect()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Ask the archive source for every entry that has to be unpacked
    ///
    /// Returns the number of archives that could not be located. Missing
    /// archives are not an error here; the run stops at them.
    pub fn get_archives(&mut self, source: &dyn ArchiveSource) -> usize {
        let mut missing = 0;
        for pkg in self.list.packages() {
            if !self.needs_archive(pkg) {
                continue;
            }
            let Some(ver) = self.install_version(pkg) else {
                continue;
            };
            match source.locate(self.graph, pkg, ver) {
                Some(path) => {
                    debug!("Archive for {}: {}", self.graph.display(pkg), path.display());
                    self.archives.insert(pkg, path);
                }
                None => {
                    debug!("No archive for {}", self.graph.display(pkg));
                    missing += 1;
                }
            }
        }
        missing
    }

    /// The version this package ends with, honoring entries adopted for removal
    pub(crate) fn install_version(&self, pkg: PackageId) -> Option<VersionId> {
        if self.list.is_delete(pkg) {
            return None;
        }
        self.graph.install_version(pkg)
    }

    /// Already unpacked on disk and only waiting for configuration
    fn configure_only(&self, pkg: PackageId) -> bool {
        let package = self.graph.package(pkg);
        package.state.needs() == Needs::Configure
            && package.desired != DesiredAction::Reinstall
            && self.install_version(pkg).is_some()
            && self.install_version(pkg) == package.current
            && !self.list.is_removed(pkg)
    }

    fn needs_archive(&self, pkg: PackageId) -> bool {
        self.list.contains(pkg)
            && !self.list.is_delete(pkg)
            && self.install_version(pkg).is_some()
            && !self.configure_only(pkg)
    }

    fn archive_missing(&self, pkg: PackageId) -> bool {
        self.needs_archive(pkg) && !self.archives.contains_key(&pkg)
    }

    /// Installed, configured, untouched by the transaction and at the right version
    fn is_settled(&self, pkg: PackageId, ver: VersionId) -> bool {
        let package = self.graph.package(pkg);
        !self.list.contains(pkg)
            && package.current == Some(ver)
            && self.install_version(pkg) == Some(ver)
            && package.state.needs() == Needs::Nothing
    }

    fn transition(&mut self, pkg: PackageId, to: EntryState) -> Result<()> {
        self.list.transition(self.graph, pkg, to)?;
        self.transitions += 1;
        Ok(())
    }

    fn emit(&mut self, item: ActionItem) {
        debug!(
            "{}{}",
            obligation::indent(self.obligations.depth()),
            item.describe(self.graph)
        );
        self.actions.push(item);
    }

    /// Order and schedule the whole transaction
    pub fn order_install(&mut self) -> Result<OrderResult> {
        let span = info_span!("transaction", id = %self.transaction_id);
        self.on_scheduler_stack(move |pm| {
            let _enter = span.enter();
            pm.run_order()
        })
    }

    /// Run scheduler work on a thread whose stack fits `max_depth` nested obligations
    fn on_scheduler_stack<T, F>(&mut self, work: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut Self) -> Result<T> + Send,
    {
        let stack_size = scheduler_stack_size(&self.config.scheduler);
        thread::scope(|scope| {
            let worker = thread::Builder::new()
                .name("orderly-scheduler".to_string())
                .stack_size(stack_size)
                .spawn_scoped(scope, move || work(self))?;
            worker
                .join()
                .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
        })
    }

    fn run_order(&mut self) -> Result<OrderResult> {
        if self.list.is_empty() {
            info!("Nothing to do");
            return Ok(OrderResult::Completed);
        }

        info!("Ordering {} packages", self.list.len());
        let graph = self.graph;
        let missing: HashSet<PackageId> = self
            .list
            .packages()
            .into_iter()
            .filter(|&p| self.archive_missing(p))
            .collect();

        if self.config.scheduler.unpack_all {
            order_unpack(graph, &mut self.list, &missing)?;
        } else {
            order_critical(graph, &mut self.list, &missing)?;
        }

        let order = self.list.packages();
        for pkg in order {
            if self.is_cancelled() {
                return Ok(self.incomplete("cancelled by operator"));
            }

            match self.order_step(pkg) {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {}
                Err(Error::MissingArchive(_)) if self.actions.is_empty() => {
                    return Err(Error::internal(
                        "ordering was unable to handle the media swap",
                    ));
                }
                Err(e @ (Error::MissingArchive(_) | Error::Cancelled(_))) => {
                    warn!("{}", e);
                    return Ok(self.incomplete(&e.to_string()));
                }
                Err(e) => return Err(e),
            }

            if self.config.scheduler.immediate_configure_all {
                self.configure_unpacked()?;
            }
        }

        self.configure_unpacked()?;

        for entry in self.list.entries() {
            let finished = match entry.state() {
                EntryState::Configured => true,
                EntryState::Removed => entry.is_delete(),
                _ => false,
            };
            if !finished {
                return Err(Error::internal(format!(
                    "package {} left {} at the end of the run",
                    graph.display(entry.package),
                    entry.state()
                )));
            }
        }

        info!(
            "Ordered {} actions in {} steps",
            self.actions.len(),
            self.obligations.steps()
        );
        Ok(OrderResult::Completed)
    }

    fn incomplete(&self, reason: &str) -> OrderResult {
        info!(
            "Stopping after {} actions: {}",
            self.actions.len(),
            reason
        );
        OrderResult::Incomplete {
            reason: reason.to_string(),
            actions: self.actions.len(),
        }
    }

    /// One top-level entry; `Some` ends the run early
    fn order_step(&mut self, pkg: PackageId) -> Result<Option<OrderResult>> {
        let graph = self.graph;

        if !self.list.is_now(pkg) {
            if self.config.scheduler.immediate_configure && self.list.is_unpacked(pkg) {
                if let Resolution::Blocked(blocker) = self.smart_configure(pkg)? {
                    if self.config.scheduler.immediate_configure_all {
                        return Err(self.unconfigurable(blocker));
                    }
                    debug!("Deferring configuration of {}", graph.display(pkg));
                }
            }
            return Ok(None);
        }

        if self.list.is_delete(pkg) && self.list.is_removed(pkg) {
            return Ok(None);
        }

        if self.archive_missing(pkg) {
            if !self.actions.is_empty() {
                return Ok(Some(self.incomplete(&format!(
                    "no archive available for {}",
                    graph.display(pkg)
                ))));
            }
            return Err(Error::internal(
                "ordering was unable to handle the media swap",
            ));
        }

        let package = graph.package(pkg);
        let keep = self
            .list
            .get(pkg)
            .is_some_and(|e| e.action == DesiredAction::Keep);
        if keep && package.state.needs() == Needs::Nothing {
            return Err(Error::internal(format!(
                "trying to manipulate kept package {}",
                graph.display(pkg)
            )));
        }

        info!("Processing {}", graph.display(pkg));
        if self.list.is_delete(pkg) {
            self.smart_remove(pkg)?;
        } else {
            let immediate = self.list.is_immediate(pkg);
            self.smart_unpack(pkg, immediate)?;
        }
        Ok(None)
    }

    /// Configure every entry left unpacked, in dependency order
    pub fn configure_all(&mut self) -> Result<()> {
        self.on_scheduler_stack(|pm| pm.configure_unpacked())
    }

    fn configure_unpacked(&mut self) -> Result<()> {
        let graph = self.graph;
        let pending: Vec<PackageId> = self
            .list
            .entries()
            .iter()
            .filter(|e| e.state() == EntryState::Unpacked)
            .map(|e| e.package)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        debug!("Configuring {} remaining packages", pending.len());
        let order = order_configure(graph, &self.list, &pending);
        for pkg in order {
            if self.list.state(pkg) != Some(EntryState::Unpacked) {
                continue;
            }

            if self.config.scheduler.configure == ConfigureMode::All {
                if let Resolution::Blocked(blocker) = self.smart_configure(pkg)? {
                    return Err(self.unconfigurable(blocker));
                }
            } else {
                self.transition(pkg, EntryState::Configuring)?;
                self.transition(pkg, EntryState::Configured)?;
            }
        }
        Ok(())
    }

    fn unconfigurable(&self, blocker: Blocker) -> Error {
        Error::Unconfigurable {
            package: self.graph.full_name(blocker.package),
            target: self.graph.full_name(blocker.target),
            kind: blocker.kind,
        }
    }

    /// Schedule the transaction, then run the actions through a back-end
    pub fn do_install(
        &mut self,
        backend: &mut dyn InstallerBackend,
        progress: &dyn ProgressTracker,
    ) -> Result<OrderResult> {
        progress.set_phase(ExecutionPhase::Ordering);
        let result = self.order_install()?;

        let span = info_span!("transaction", id = %self.transaction_id);
        let _enter = span.enter();

        let report = Executor::new(&self.config)
            .with_cancel(self.cancel.clone())
            .run(self.graph, &self.actions, backend, progress)?;

        if report.cancelled {
            return Ok(OrderResult::Incomplete {
                reason: format!("cancelled after {} back-end batches", report.batches_run),
                actions: report.actions_run,
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Operation;
    use crate::archive::StaticArchives;
    use crate::graph::{PackageRecord, Snapshot, VersionRecord};
    use std::path::Path;

    fn manager(graph: &DependencyGraph) -> PackageManager<'_> {
        let mut pm = PackageManager::new(graph, Config::default());
        pm.get_archives(&StaticArchives::for_all(graph, Path::new("/pool")));
        pm
    }

    #[test]
    fn test_empty_transaction_completes() {
        let graph = Snapshot::new("amd64")
            .package(PackageRecord::new("a").installed(VersionRecord::new("1")))
            .build()
            .unwrap();
        let mut pm = manager(&graph);
        assert_eq!(pm.order_install().unwrap(), OrderResult::Completed);
        assert!(pm.actions().is_empty());
    }

    #[test]
    fn test_depends_are_unpacked_first() {
        let graph = Snapshot::new("amd64")
            .package(PackageRecord::new("app").candidate(VersionRecord::new("1").depends("lib")).install())
            .package(PackageRecord::new("lib").candidate(VersionRecord::new("1")).install())
            .build()
            .unwrap();
        let app = graph.lookup("app").unwrap();
        let lib = graph.lookup("lib").unwrap();
        let mut pm = manager(&graph);

        assert!(pm.order_install().unwrap().is_completed());
        let actions = pm.actions();
        assert!(actions.position(Operation::Install, lib) < actions.position(Operation::Install, app));
        assert!(actions.position(Operation::Configure, lib) < actions.position(Operation::Configure, app));
        assert!(pm.list().is_configured(app));
        assert!(pm.list().is_configured(lib));
    }

    #[test]
    fn test_configure_only_entry_gets_no_install() {
        let graph = Snapshot::new("amd64")
            .package(
                PackageRecord::new("half")
                    .installed(VersionRecord::new("1"))
                    .state(crate::graph::InstallState::Unpacked),
            )
            .build()
            .unwrap();
        let half = graph.lookup("half").unwrap();
        let mut pm = PackageManager::new(&graph, Config::default());

        assert_eq!(pm.get_archives(&StaticArchives::new()), 0);
        assert!(pm.order_install().unwrap().is_completed());
        assert_eq!(pm.describe_actions(), vec!["Configure(half:amd64)"]);
        assert!(pm.list().is_configured(half));
    }

    #[test]
    fn test_missing_archive_before_any_action_is_fatal() {
        let graph = Snapshot::new("amd64")
            .package(PackageRecord::new("a").candidate(VersionRecord::new("1")).install())
            .build()
            .unwrap();
        let mut pm = PackageManager::new(&graph, Config::default());
        assert_eq!(pm.get_archives(&StaticArchives::new()), 1);

        let err = pm.order_install().unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::FatalInternal);
    }

    #[test]
    fn test_missing_archive_after_progress_is_incomplete() {
        let graph = Snapshot::new("amd64")
            .package(PackageRecord::new("a").candidate(VersionRecord::new("1")).install())
            .package(PackageRecord::new("b").candidate(VersionRecord::new("1")).install())
            .build()
            .unwrap();
        let mut pm = PackageManager::new(&graph, Config::default());
        pm.get_archives(&StaticArchives::new().with("a:amd64", "/pool/a_1_amd64.deb"));

        let result = pm.order_install().unwrap();
        assert!(matches!(result, OrderResult::Incomplete { actions: 1, .. }));
        assert_eq!(pm.describe_actions(), vec!["Install(a:amd64)"]);
        assert_eq!(pm.list().state(graph.lookup("a").unwrap()), Some(EntryState::Unpacked));
        assert_eq!(pm.list().state(graph.lookup("b").unwrap()), Some(EntryState::Pending));
    }

    #[test]
    fn test_cancelled_run_is_incomplete() {
        let graph = Snapshot::new("amd64")
            .package(PackageRecord::new("a").candidate(VersionRecord::new("1")).install())
            .build()
            .unwrap();
        let cancel = Arc::new(AtomicBool::new(true));
        let mut pm = manager(&graph).with_cancel(cancel);

        let result = pm.order_install().unwrap();
        assert!(matches!(result, OrderResult::Incomplete { .. }));
        assert!(pm.actions().is_empty());
    }

    #[test]
    fn test_smart_mode_defers_configure_actions() {
        let graph = Snapshot::new("amd64")
            .package(PackageRecord::new("a").candidate(VersionRecord::new("1")).install())
            .build()
            .unwrap();
        let mut config = Config::default();
        config.scheduler.configure = ConfigureMode::Smart;
        let mut pm = PackageManager::new(&graph, config);
        pm.get_archives(&StaticArchives::for_all(&graph, Path::new("/pool")));

        assert!(pm.order_install().unwrap().is_completed());
        assert_eq!(pm.describe_actions(), vec!["Install(a:amd64)"]);
        assert!(pm.list().is_configured(graph.lookup("a").unwrap()));
    }

    #[test]
    fn test_purge_entry_emits_purge() {
        let graph = Snapshot::new("amd64")
            .package(PackageRecord::new("old").installed(VersionRecord::new("1")).purge())
            .build()
            .unwrap();
        let mut pm = manager(&graph);
        assert!(pm.order_install().unwrap().is_completed());
        assert_eq!(pm.describe_actions(), vec!["Purge(old:amd64)"]);
        assert!(pm.list().is_removed(graph.lookup("old").unwrap()));
    }

    fn breaks_scheduled_removal(essential: bool) -> DependencyGraph {
        let base = PackageRecord::new("base").installed(VersionRecord::new("1")).remove();
        Snapshot::new("amd64")
            .package(PackageRecord::new("a").candidate(VersionRecord::new("1").breaks("base")).install())
            .package(if essential { base.essential() } else { base })
            .build()
            .unwrap()
    }

    #[test]
    fn test_unpack_removes_broken_package_first() {
        let graph = breaks_scheduled_removal(false);
        let a = graph.lookup("a").unwrap();
        let mut pm = manager(&graph);

        assert_eq!(pm.smart_unpack(a, false).unwrap(), Resolution::Done);
        assert_eq!(pm.describe_actions(), vec!["Remove(base:amd64)", "Install(a:amd64)"]);
        assert!(pm.list().is_removed(graph.lookup("base").unwrap()));
    }

    #[test]
    fn test_breaks_on_essential_needs_override() {
        let graph = breaks_scheduled_removal(true);
        let a = graph.lookup("a").unwrap();
        let mut pm = manager(&graph);

        let err = pm.smart_unpack(a, false).unwrap_err();
        assert!(matches!(err, Error::EssentialRemoval { kind: DepKind::Breaks, .. }));
        assert!(pm.actions().is_empty());
    }

    #[test]
    fn test_breaks_on_essential_is_left_to_dpkg_with_override() {
        let graph = breaks_scheduled_removal(true);
        let a = graph.lookup("a").unwrap();
        let mut config = Config::default();
        config.scheduler.force_loop_break = true;
        let mut pm = PackageManager::new(&graph, config);
        pm.get_archives(&StaticArchives::for_all(&graph, Path::new("/pool")));

        assert_eq!(pm.smart_unpack(a, false).unwrap(), Resolution::Done);
        assert_eq!(pm.describe_actions(), vec!["Install(a:amd64)"]);
        assert_eq!(pm.list().state(graph.lookup("base").unwrap()), Some(EntryState::Pending));
    }

    #[test]
    fn test_blocker_names_the_alternative_that_was_tried() {
        let graph = Snapshot::new("amd64")
            .package(
                PackageRecord::new("app")
                    .candidate(VersionRecord::new("1").depends("x (>= 2) | y"))
                    .install(),
            )
            .package(PackageRecord::new("x").installed(VersionRecord::new("1")))
            .package(PackageRecord::new("y").candidate(VersionRecord::new("1")).install())
            .build()
            .unwrap();
        let app = graph.lookup("app").unwrap();
        let y = graph.lookup("y").unwrap();
        let mut pm = manager(&graph);
        pm.transition(app, EntryState::Unpacking).unwrap();
        pm.transition(app, EntryState::Unpacked).unwrap();
        assert!(pm.obligations.push(&graph, y, Phase::Unpack).unwrap());

        match pm.smart_configure(app).unwrap() {
            Resolution::Blocked(blocker) => {
                assert_eq!(blocker.package, app);
                assert_eq!(blocker.target, y);
                assert_eq!(blocker.kind, DepKind::Depends);
                assert!(blocker.in_cycle);
            }
            other => panic!("expected a blocker, got {:?}", other),
        }
        assert!(pm.actions().is_empty());
    }

    #[test]
    fn test_scheduler_stack_grows_with_depth() {
        let mut config = SchedulerConfig::default();
        let small = scheduler_stack_size(&config);
        config.max_depth *= 2;
        assert!(scheduler_stack_size(&config) > small);
        assert!(small >= BASE_STACK + STACK_PER_OBLIGATION);
    }
}
