// src/scheduler/remove.rs

//! Scheduled and early removals

use super::PackageManager;
use super::obligation::{Phase, indent};
use crate::action::ActionItem;
use crate::error::{Error, Result};
use crate::graph::{DepKind, DesiredAction, PackageId};
use crate::order::EntryState;
use tracing::{debug, warn};

impl PackageManager<'_> {
    /// Remove `pkg` ahead of its place in the order so `requested_by` can be unpacked
    ///
    /// Essential and important packages, and packages an essential package
    /// depends on, are refused unless `force_loop_break` is set. A package
    /// outside the transaction is added to it as a removal.
    pub(crate) fn early_remove(&mut self, pkg: PackageId, requested_by: PackageId, kind: DepKind) -> Result<()> {
        let graph = self.graph;
        if !self.list.is_now(pkg) || self.list.is_removed(pkg) {
            return Ok(());
        }

        let package = graph.package(pkg);
        let essential = package.essential || package.important || self.essential_depends_on(pkg);
        if essential {
            if !self.config.scheduler.force_loop_break {
                return Err(Error::EssentialRemoval {
                    package: graph.full_name(pkg),
                    required_by: graph.full_name(requested_by),
                    kind,
                });
            }
            if kind == DepKind::Breaks {
                // dpkg deconfigures it on its own
                debug!(
                    "{}Leaving essential {} to dpkg's deconfiguration",
                    indent(self.obligations.depth()),
                    graph.display(pkg)
                );
                return Ok(());
            }
            warn!(
                "Temporarily removing essential package {} because of {} with {}",
                graph.display(pkg),
                kind,
                graph.display(requested_by)
            );
        }

        if !self.list.contains(pkg) {
            warn!(
                "Removing {} to resolve a {} with {}",
                graph.display(pkg),
                kind,
                graph.display(requested_by)
            );
            self.list.adopt(pkg, DesiredAction::Remove);
        }

        debug!(
            "{}EarlyRemove {} for {}",
            indent(self.obligations.depth()),
            graph.display(pkg),
            graph.display(requested_by)
        );
        self.smart_remove(pkg)
    }

    /// An essential package's current or install version directly depends on `pkg`
    fn essential_depends_on(&self, pkg: PackageId) -> bool {
        let graph = self.graph;
        graph.reverse_depends(pkg).iter().any(|&rdep| {
            let source = graph.version(rdep.source).package;
            let parent = graph.package(source);
            (parent.essential || parent.important)
                && source != pkg
                && graph.group_of(rdep).kind.is_critical()
                && (parent.current == Some(rdep.source)
                    || self.install_version(source) == Some(rdep.source))
        })
    }

    /// Remove or purge a listed package
    pub(crate) fn smart_remove(&mut self, pkg: PackageId) -> Result<()> {
        if !self.list.is_now(pkg) || self.list.is_removed(pkg) {
            return Ok(());
        }
        let Some(entry) = self.list.get(pkg) else {
            return Err(Error::internal(format!(
                "{} is not part of the transaction",
                self.graph.display(pkg)
            )));
        };
        let purge = entry.action == DesiredAction::Purge;

        if !self.obligations.push(self.graph, pkg, Phase::Remove)? {
            return Ok(());
        }
        let result = self.remove_obligation(pkg, purge);
        self.obligations.pop();
        result
    }

    fn remove_obligation(&mut self, pkg: PackageId, purge: bool) -> Result<()> {
        self.transition(pkg, EntryState::Removing)?;
        if purge {
            self.emit(ActionItem::Purge(pkg));
        } else {
            self.emit(ActionItem::Remove(pkg));
        }
        self.transition(pkg, EntryState::Removed)
    }
}
