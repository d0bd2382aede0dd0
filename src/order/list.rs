// src/order/list.rs

//! Transaction list construction
//!
//! The list holds one entry per package that must change state, in graph
//! order until a sort pass reorders it. The immediate set (packages that
//! must be configured right after unpacking) is kept separately because it
//! also covers packages outside the list.

use super::entry::{EntryState, TransactionEntry};
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, DesiredAction, InstallState, Needs, PackageId, VersionId};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Ordered set of packages that change state in this transaction
#[derive(Debug, Default)]
pub struct TransactionList {
    entries: Vec<TransactionEntry>,
    index: HashMap<PackageId, usize>,
    immediate: HashSet<PackageId>,
}

impl TransactionList {
    /// Build the list and the immediate set from the graph's decisions
    pub fn build(graph: &DependencyGraph, config: &SchedulerConfig) -> Self {
        let mut list = Self::default();

        for (id, package) in graph.packages() {
            if package.versions.is_empty() {
                continue;
            }

            if config.immediate_configure_all
                || ((package.essential || package.important) && config.immediate_configure)
            {
                if list.immediate.insert(id) {
                    debug!("Immediate configuration for essential closure of {}", graph.display(id));
                }
                list.immediate_add(graph, graph.install_version(id));
                list.immediate_add(graph, package.current);
            }

            let install_ver = graph.install_version(id);
            let unchanged = package.desired == DesiredAction::Keep || install_ver == package.current;
            let purging_leftovers =
                package.desired == DesiredAction::Purge && package.state == InstallState::ConfigFiles;

            if unchanged
                && package.state.needs() == Needs::Nothing
                && package.desired != DesiredAction::Reinstall
                && !purging_leftovers
            {
                continue;
            }

            list.push(TransactionEntry::new(id, package.desired));
        }

        debug!(
            "Transaction list has {} entries, {} immediate packages",
            list.entries.len(),
            list.immediate.len()
        );
        list
    }

    /// Mark the Depends/PreDepends closure of a version as immediate
    fn immediate_add(&mut self, graph: &DependencyGraph, start: Option<VersionId>) {
        let mut work: Vec<VersionId> = start.into_iter().collect();

        while let Some(ver) = work.pop() {
            for group in &graph.version(ver).depends {
                if !group.kind.is_critical() {
                    continue;
                }
                for edge in &group.alternatives {
                    let mut reached = vec![edge.target];
                    reached.extend(
                        graph
                            .providers(edge.target)
                            .iter()
                            .map(|&v| graph.version(v).package),
                    );

                    for pkg in reached {
                        if !self.immediate.insert(pkg) {
                            continue;
                        }
                        debug!("Immediate add of {}", graph.display(pkg));
                        work.extend(graph.install_version(pkg));
                        work.extend(graph.package(pkg).current);
                    }
                }
            }
        }
    }

    fn push(&mut self, entry: TransactionEntry) -> usize {
        let position = self.entries.len();
        self.index.insert(entry.package, position);
        self.entries.push(entry);
        position
    }

    /// Bring a package that was not part of the plan into the list
    pub fn adopt(&mut self, package: PackageId, action: DesiredAction) {
        if self.index.contains_key(&package) {
            return;
        }
        let mut entry = TransactionEntry::new(package, action);
        entry.adopted = true;
        self.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TransactionEntry] {
        &self.entries
    }

    /// Packages in current list order
    pub fn packages(&self) -> Vec<PackageId> {
        self.entries.iter().map(|e| e.package).collect()
    }

    pub fn contains(&self, package: PackageId) -> bool {
        self.index.contains_key(&package)
    }

    pub fn get(&self, package: PackageId) -> Option<&TransactionEntry> {
        self.index.get(&package).map(|&i| &self.entries[i])
    }

    pub fn position(&self, package: PackageId) -> Option<usize> {
        self.index.get(&package).copied()
    }

    pub fn state(&self, package: PackageId) -> Option<EntryState> {
        self.get(package).map(|e| e.state())
    }

    pub fn is_immediate(&self, package: PackageId) -> bool {
        self.immediate.contains(&package)
    }

    pub fn is_delete(&self, package: PackageId) -> bool {
        self.get(package).is_some_and(|e| e.is_delete())
    }

    pub fn is_configured(&self, package: PackageId) -> bool {
        self.state(package) == Some(EntryState::Configured)
    }

    pub fn is_removed(&self, package: PackageId) -> bool {
        self.state(package) == Some(EntryState::Removed)
    }

    /// Unpacked in this run and not yet configured
    pub fn is_unpacked(&self, package: PackageId) -> bool {
        self.state(package).is_some_and(EntryState::is_unpacked)
    }

    /// Still waiting for its own step; packages outside the list always are
    pub fn is_now(&self, package: PackageId) -> bool {
        !matches!(
            self.state(package),
            Some(
                EntryState::Unpacking
                    | EntryState::Unpacked
                    | EntryState::Configuring
                    | EntryState::Configured
            )
        )
    }

    /// Move an entry to a new state through the transition table
    pub fn transition(&mut self, graph: &DependencyGraph, package: PackageId, to: EntryState) -> Result<()> {
        let position = self.index.get(&package).copied().ok_or_else(|| {
            Error::internal(format!("{} is not part of the transaction", graph.display(package)))
        })?;
        let name = graph.full_name(package);
        self.entries[position].transition(to, &name)?;
        debug!("{} -> {}", name, to);
        Ok(())
    }

    /// Replace the entry order; every entry must appear exactly once
    pub(crate) fn reorder(&mut self, order: &[PackageId]) -> Result<()> {
        if order.len() != self.entries.len() {
            return Err(Error::internal("ordering pass lost or duplicated entries"));
        }

        let unique: HashSet<PackageId> = order.iter().copied().collect();
        if unique.len() != order.len() {
            return Err(Error::internal("ordering pass duplicated an entry"));
        }

        let mut reordered = Vec::with_capacity(order.len());
        for package in order {
            let position = self
                .index
                .get(package)
                .copied()
                .ok_or_else(|| Error::internal("ordering pass produced an unknown package"))?;
            reordered.push(self.entries[position].clone());
        }

        self.entries = reordered;
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.package, i))
            .collect();
        Ok(())
    }
}
