// src/scheduler/unpack.rs

//! Unpacking a package together with everything its unpack depends on

use super::obligation::{Phase, indent};
use super::{PackageManager, Resolution};
use crate::action::ActionItem;
use crate::error::{Error, Result};
use crate::graph::{DepEdge, DepGroup, DepKind, DesiredAction, MultiArch, Needs, PackageId, VersionId};
use crate::order::EntryState;
use crate::version::DebVersion;
use std::path::PathBuf;
use tracing::{debug, warn};

impl PackageManager<'_> {
    /// Make `pkg` unpackable, unpack it and, when `immediate`, configure it
    ///
    /// Returns [`Resolution::Deferred`] when the unpack of `pkg` is already in
    /// flight further up the stack.
    pub(crate) fn smart_unpack(&mut self, pkg: PackageId, immediate: bool) -> Result<Resolution> {
        if !self.list.is_now(pkg) {
            return Ok(Resolution::Done);
        }
        if !self.obligations.push(self.graph, pkg, Phase::Unpack)? {
            debug!(
                "{}Unpack of {} already in flight",
                indent(self.obligations.depth()),
                self.graph.display(pkg)
            );
            return Ok(Resolution::Deferred);
        }

        let result = self.unpack_obligation(pkg, immediate);
        self.obligations.pop();
        result
    }

    fn unpack_obligation(&mut self, pkg: PackageId, immediate: bool) -> Result<Resolution> {
        let graph = self.graph;
        debug!(
            "{}SmartUnpack {} (immediate: {})",
            indent(self.obligations.depth()),
            graph.display(pkg),
            immediate
        );

        if !self.list.contains(pkg) {
            return Err(Error::internal(format!(
                "{} is not part of the transaction",
                graph.display(pkg)
            )));
        }
        let Some(ver) = self.install_version(pkg) else {
            return Err(Error::internal(format!(
                "{} has no version to unpack",
                graph.display(pkg)
            )));
        };

        let limit = self.config.scheduler.max_loop_count;
        let mut rounds = 0u64;
        loop {
            rounds += 1;
            if rounds > limit {
                return Err(Error::LoopLimit {
                    package: graph.full_name(pkg),
                    phase: Phase::Unpack.to_string(),
                    limit,
                });
            }

            let before = self.transitions;
            self.unpack_pre_depends(pkg, ver)?;
            self.unpack_conflicts(pkg, ver)?;
            self.unpack_breaks(pkg, ver)?;
            if self.transitions == before {
                break;
            }
        }

        if !self.list.is_now(pkg) {
            return Ok(Resolution::Done);
        }

        self.check_reverse_conflicts(pkg, ver)?;
        self.unpack_with_siblings(pkg, ver)?;

        if immediate {
            if let Resolution::Blocked(blocker) = self.smart_configure(pkg)? {
                warn!(
                    "Could not perform immediate configuration on {}: {} on {} is not ready, \
                     it will be configured later",
                    graph.display(pkg),
                    blocker.kind,
                    graph.display(blocker.target)
                );
            }
        }
        Ok(Resolution::Done)
    }

    /// Bring every pre-dependency of `ver` into a configured state
    fn unpack_pre_depends(&mut self, pkg: PackageId, ver: VersionId) -> Result<()> {
        let graph = self.graph;

        for group in &graph.version(ver).depends {
            if group.kind != DepKind::PreDepends {
                continue;
            }
            if self.group_settled(group) {
                continue;
            }

            let mut satisfied = false;
            'alternatives: for edge in &group.alternatives {
                for target in graph.all_targets(edge) {
                    let dep = graph.version(target).package;
                    if dep == pkg {
                        satisfied = true;
                        break 'alternatives;
                    }
                    if !self.list.contains(dep) || self.install_version(dep) != Some(target) {
                        continue;
                    }
                    if self.resolve_pre_depend(pkg, dep)? {
                        satisfied = true;
                        break 'alternatives;
                    }
                }
            }

            if !satisfied {
                return Err(Error::Unsatisfiable {
                    package: graph.full_name(pkg),
                    target: describe_group(self, group),
                    kind: DepKind::PreDepends,
                });
            }
        }
        Ok(())
    }

    /// Some alternative is already installed, configured and staying put
    fn group_settled(&self, group: &DepGroup) -> bool {
        let graph = self.graph;
        group.alternatives.iter().any(|edge| {
            graph.all_targets(edge).into_iter().any(|target| {
                let dep = graph.version(target).package;
                self.is_settled(dep, target)
            })
        })
    }

    fn resolve_pre_depend(&mut self, pkg: PackageId, dep: PackageId) -> Result<bool> {
        let graph = self.graph;
        if self.list.is_configured(dep) {
            return Ok(true);
        }
        if self.obligations.is_in_flight(dep) {
            debug!(
                "{}Pre-dependency {} of {} is in flight, treating as satisfied",
                indent(self.obligations.depth()),
                graph.display(dep),
                graph.display(pkg)
            );
            return Ok(true);
        }

        if !self.list.is_unpacked(dep) {
            match self.smart_unpack(dep, true) {
                Ok(_) => {}
                Err(e) if e.is_local() => {
                    debug!("Cannot use {} for {}: {}", graph.display(dep), graph.display(pkg), e);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
            if self.list.is_configured(dep) {
                return Ok(true);
            }
            if !self.list.is_unpacked(dep) {
                return Ok(false);
            }
        }

        match self.smart_configure(dep)? {
            Resolution::Done | Resolution::Deferred => Ok(true),
            Resolution::Blocked(blocker)
                if blocker.in_cycle || self.obligations.is_in_flight(blocker.target) =>
            {
                debug!(
                    "{}{} waits on {} inside a pre-dependency loop, treating as satisfied",
                    indent(self.obligations.depth()),
                    graph.display(dep),
                    graph.display(blocker.target)
                );
                Ok(true)
            }
            Resolution::Blocked(_) => Ok(false),
        }
    }

    /// Get installed packages that conflict with `ver` out of the way
    fn unpack_conflicts(&mut self, pkg: PackageId, ver: VersionId) -> Result<()> {
        let graph = self.graph;

        for group in &graph.version(ver).depends {
            if !matches!(group.kind, DepKind::Conflicts | DepKind::Obsoletes) {
                continue;
            }
            for edge in &group.alternatives {
                for target in graph.all_targets(edge) {
                    let cp = graph.version(target).package;
                    if graph.is_ignorable(pkg, target)
                        || graph.package(cp).current != Some(target)
                        || !self.list.is_now(cp)
                        || self.list.is_removed(cp)
                    {
                        continue;
                    }

                    if self.can_upgrade_away(cp, edge) {
                        debug!(
                            "{}Unpacking {} to avoid a conflict with {}",
                            indent(self.obligations.depth()),
                            graph.display(cp),
                            graph.display(pkg)
                        );
                        match self.smart_unpack(cp, false) {
                            Ok(_) => continue,
                            Err(e) if e.is_local() => {
                                debug!("Unpacking {} failed: {}, removing it instead", graph.display(cp), e);
                            }
                            Err(e) => return Err(e),
                        }
                        if !self.list.is_now(cp) {
                            continue;
                        }
                    }

                    self.early_remove(cp, pkg, group.kind)?;
                }
            }
        }
        Ok(())
    }

    /// Whether `other` will move to a version the edge no longer matches
    fn can_upgrade_away(&self, other: PackageId, edge: &DepEdge) -> bool {
        if self.obligations.is_in_flight(other)
            || !self.list.contains(other)
            || self.list.is_delete(other)
        {
            return false;
        }
        match self.install_version(other) {
            Some(next) => {
                Some(next) != self.graph.package(other).current && !self.graph.satisfies(edge, next)
            }
            None => false,
        }
    }

    /// Upgrade or remove installed packages that `ver` breaks
    fn unpack_breaks(&mut self, pkg: PackageId, ver: VersionId) -> Result<()> {
        let graph = self.graph;

        for group in &graph.version(ver).depends {
            if group.kind != DepKind::Breaks {
                continue;
            }
            for edge in &group.alternatives {
                for target in graph.all_targets(edge) {
                    let bp = graph.version(target).package;
                    if graph.is_ignorable(pkg, target)
                        || graph.package(bp).current != Some(target)
                        || !self.list.contains(bp)
                        || !self.list.is_now(bp)
                        || self.list.is_removed(bp)
                    {
                        continue;
                    }

                    if self.list.is_delete(bp) {
                        debug!(
                            "{}Removing {} which {} breaks",
                            indent(self.obligations.depth()),
                            graph.display(bp),
                            graph.display(pkg)
                        );
                        self.early_remove(bp, pkg, DepKind::Breaks)?;
                        continue;
                    }

                    if !self.can_upgrade_away(bp, edge) {
                        continue;
                    }
                    if let Some(next) = self.install_version(bp)
                        && self.pre_depends_on(next, pkg)
                    {
                        debug!(
                            "{}{} pre-depends on {}, accepting the breakage",
                            indent(self.obligations.depth()),
                            graph.display(bp),
                            graph.display(pkg)
                        );
                        continue;
                    }

                    match self.smart_unpack(bp, false) {
                        Ok(_) => {}
                        Err(e) if e.is_local() => {
                            debug!("Could not unpack broken {} first: {}", graph.display(bp), e);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(())
    }

    fn pre_depends_on(&self, ver: VersionId, pkg: PackageId) -> bool {
        let graph = self.graph;
        graph
            .version(ver)
            .depends
            .iter()
            .filter(|g| g.kind == DepKind::PreDepends)
            .flat_map(|g| g.alternatives.iter())
            .any(|edge| {
                edge.target == pkg
                    || graph
                        .all_targets(edge)
                        .into_iter()
                        .any(|t| graph.version(t).package == pkg)
            })
    }

    /// Remove installed packages whose conflicts match `ver` or one of its provides
    pub(crate) fn check_reverse_conflicts(&mut self, pkg: PackageId, ver: VersionId) -> Result<()> {
        let graph = self.graph;
        let version = graph.version(ver);

        let mut aliases: Vec<(PackageId, Option<&DebVersion>)> =
            vec![(pkg, Some(&version.version))];
        for provide in &version.provides {
            if graph.package(provide.target).name == graph.package(pkg).name {
                continue;
            }
            aliases.push((provide.target, provide.version.as_ref()));
        }

        for (alias, alias_version) in aliases {
            for &rdep in graph.reverse_depends(alias) {
                let group = graph.group_of(rdep);
                if !matches!(group.kind, DepKind::Conflicts | DepKind::Obsoletes) {
                    continue;
                }

                let source = graph.version(rdep.source).package;
                if source == pkg
                    || graph.package(source).name == graph.package(pkg).name
                    || graph.package(source).current != Some(rdep.source)
                    || !self.list.is_now(source)
                    || self.list.is_removed(source)
                {
                    continue;
                }

                let edge = &group.alternatives[rdep.alternative];
                let hit = match alias_version {
                    Some(v) => edge.constraint.satisfies(v),
                    None => edge.constraint.is_any(),
                };
                if hit {
                    debug!(
                        "{}{} conflicts with {}, removing it first",
                        indent(self.obligations.depth()),
                        graph.display(source),
                        graph.display(pkg)
                    );
                    self.early_remove(source, pkg, group.kind)?;
                }
            }
        }
        Ok(())
    }

    /// Emit the unpack of `pkg`, keeping `Multi-Arch: same` siblings in lock-step
    fn unpack_with_siblings(&mut self, pkg: PackageId, ver: VersionId) -> Result<()> {
        let graph = self.graph;
        let configure_only = self.configure_only(pkg);
        let archive = if configure_only {
            None
        } else {
            Some(
                self.archives
                    .get(&pkg)
                    .cloned()
                    .ok_or_else(|| Error::MissingArchive(graph.full_name(pkg)))?,
            )
        };

        let mut installed_cohort = Vec::new();
        let mut new_cohort = Vec::new();
        if graph.version(ver).multi_arch == MultiArch::Same {
            for sibling in graph.siblings(pkg) {
                if !self.sibling_eligible(sibling) {
                    continue;
                }
                if graph.package(sibling).current.is_some() {
                    installed_cohort.push(sibling);
                } else {
                    new_cohort.push(sibling);
                }
            }
        }

        self.transition(pkg, EntryState::Unpacking)?;

        let pkg_installed = graph.package(pkg).current.is_some();
        let mut emitted = false;
        let result = (|| -> Result<()> {
            if pkg_installed {
                self.emit_unpack(pkg, archive.clone());
                emitted = true;
            }
            for &sibling in &installed_cohort {
                self.smart_unpack(sibling, false)?;
            }
            if !pkg_installed {
                self.emit_unpack(pkg, archive.clone());
                emitted = true;
            }
            for &sibling in &new_cohort {
                self.smart_unpack(sibling, false)?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => self.transition(pkg, EntryState::Unpacked),
            Err(e) => {
                if emitted {
                    self.transition(pkg, EntryState::Unpacked)?;
                } else {
                    self.transition(pkg, EntryState::Pending)?;
                }
                Err(e)
            }
        }
    }

    fn emit_unpack(&mut self, pkg: PackageId, archive: Option<PathBuf>) {
        match archive {
            Some(archive) => self.emit(ActionItem::Install { package: pkg, archive }),
            None => debug!(
                "{}{} is already unpacked",
                indent(self.obligations.depth()),
                self.graph.display(pkg)
            ),
        }
    }

    /// A sibling that changes in this run and is waiting to be unpacked
    fn sibling_eligible(&self, sibling: PackageId) -> bool {
        let package = self.graph.package(sibling);
        let waiting = matches!(
            self.list.state(sibling),
            Some(EntryState::Pending | EntryState::Removed)
        );
        let changes = match self.install_version(sibling) {
            Some(next) => {
                Some(next) != package.current
                    || package.desired == DesiredAction::Reinstall
                    || package.state.needs() != Needs::Nothing
            }
            None => false,
        };
        waiting && changes && !self.list.is_delete(sibling) && !self.obligations.is_in_flight(sibling)
    }
}

/// `a (>= 1) | b` style text for error messages
fn describe_group(pm: &PackageManager<'_>, group: &DepGroup) -> String {
    group
        .alternatives
        .iter()
        .map(|edge| {
            let name = pm.graph.display(edge.target).to_string();
            if edge.constraint.is_any() {
                name
            } else {
                format!("{} ({})", name, edge.constraint)
            }
        })
        .collect::<Vec<_>>()
        .join(" | ")
}
