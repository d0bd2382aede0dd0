// src/scheduler/configure.rs

//! Configuring an unpacked package once its dependencies allow it

use super::obligation::{Phase, indent};
use super::{Blocker, PackageManager, Resolution};
use crate::action::ActionItem;
use crate::config::ConfigureMode;
use crate::error::{Error, Result};
use crate::graph::{DepGroup, MultiArch, PackageId, VersionId};
use crate::order::EntryState;
use tracing::debug;

impl PackageManager<'_> {
    /// Bring an unpacked package to `Configured`
    ///
    /// Every `Depends`/`PreDepends` group of the install version must be
    /// satisfied by a package that is settled, already configured, or can be
    /// configured now. A dependency whose configuration is already in flight
    /// counts as satisfied; dpkg configures such cycles together.
    pub(crate) fn smart_configure(&mut self, pkg: PackageId) -> Result<Resolution> {
        if self.list.is_configured(pkg) {
            return Ok(Resolution::Done);
        }
        if self.list.state(pkg) != Some(EntryState::Unpacked) {
            if self.obligations.is_phase_in_flight(pkg, Phase::Unpack)
                || self.obligations.is_phase_in_flight(pkg, Phase::Configure)
            {
                return Ok(Resolution::Deferred);
            }
            return Err(Error::internal(format!(
                "{} must be unpacked before it is configured (it is {})",
                self.graph.display(pkg),
                self.list
                    .state(pkg)
                    .map(|s| s.as_str())
                    .unwrap_or("not part of the transaction")
            )));
        }
        if !self.obligations.push(self.graph, pkg, Phase::Configure)? {
            return Ok(Resolution::Deferred);
        }

        let result = self.configure_obligation(pkg);
        self.obligations.pop();
        result
    }

    fn configure_obligation(&mut self, pkg: PackageId) -> Result<Resolution> {
        let graph = self.graph;
        debug!(
            "{}SmartConfigure {}",
            indent(self.obligations.depth()),
            graph.display(pkg)
        );

        let Some(ver) = self.install_version(pkg) else {
            return Err(Error::internal(format!(
                "{} has no version to configure",
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
                    phase: Phase::Configure.to_string(),
                    limit,
                });
            }

            let before = self.transitions;
            let mut blocker = None;
            for group in &graph.version(ver).depends {
                if !group.kind.is_critical() {
                    continue;
                }
                if let GroupCheck::Unmet { target, in_cycle } = self.configure_group(pkg, group)? {
                    blocker = Some(Blocker {
                        package: pkg,
                        target,
                        kind: group.kind,
                        in_cycle,
                    });
                    break;
                }
            }

            match blocker {
                None => break,
                Some(blocker) if self.transitions == before => {
                    debug!(
                        "{}Cannot configure {}: {} on {}",
                        indent(self.obligations.depth()),
                        graph.display(pkg),
                        blocker.kind,
                        graph.display(blocker.target)
                    );
                    return Ok(Resolution::Blocked(blocker));
                }
                Some(_) => {}
            }
        }

        if self.config.scheduler.configure != ConfigureMode::No
            || self.config.scheduler.immediate_configure_all
        {
            self.emit(ActionItem::Configure(pkg));
        }
        self.transition(pkg, EntryState::Configuring)?;
        self.transition(pkg, EntryState::Configured)?;

        self.configure_siblings(pkg, ver)?;
        Ok(Resolution::Done)
    }

    /// Try each alternative of a group until one is satisfied
    fn configure_group(&mut self, pkg: PackageId, group: &DepGroup) -> Result<GroupCheck> {
        let graph = self.graph;

        let mut candidates: Vec<(PackageId, VersionId)> = Vec::new();
        for edge in &group.alternatives {
            for target in graph.all_targets(edge) {
                candidates.push((graph.version(target).package, target));
            }
        }

        let mut failed = None;
        let mut in_cycle = false;

        for &(dep, target) in &candidates {
            if dep == pkg || self.is_settled(dep, target) {
                return Ok(GroupCheck::Satisfied);
            }
            if self.install_version(dep) != Some(target) || !self.list.contains(dep) {
                continue;
            }
            if self.list.is_configured(dep) {
                return Ok(GroupCheck::Satisfied);
            }
            if self.list.is_unpacked(dep) {
                if self.obligations.is_phase_in_flight(dep, Phase::Configure) {
                    return Ok(GroupCheck::Satisfied);
                }
                match self.smart_configure(dep)? {
                    Resolution::Done | Resolution::Deferred => return Ok(GroupCheck::Satisfied),
                    Resolution::Blocked(blocker) => {
                        failed = Some(dep);
                        in_cycle |= blocker.in_cycle;
                    }
                }
            }
        }

        for &(dep, target) in &candidates {
            if self.install_version(dep) != Some(target) || !self.list.contains(dep) {
                continue;
            }
            if self.obligations.is_in_flight(dep) {
                failed = Some(dep);
                in_cycle = true;
                continue;
            }
            if !self.list.is_now(dep) {
                continue;
            }

            debug!(
                "{}Unpacking {} so {} can be configured",
                indent(self.obligations.depth()),
                graph.display(dep),
                graph.display(pkg)
            );
            match self.smart_unpack(dep, true) {
                Ok(_) => {}
                Err(e) if e.is_local() => {
                    debug!("Cannot use {}: {}", graph.display(dep), e);
                    failed = Some(dep);
                    continue;
                }
                Err(e) => return Err(e),
            }
            if self.list.is_configured(dep) {
                return Ok(GroupCheck::Satisfied);
            }
            failed = Some(dep);
            if self.list.is_unpacked(dep) {
                match self.smart_configure(dep)? {
                    Resolution::Done | Resolution::Deferred => return Ok(GroupCheck::Satisfied),
                    Resolution::Blocked(blocker) => in_cycle |= blocker.in_cycle,
                }
            }
        }

        let target = failed
            .or_else(|| group.alternatives.first().map(|e| e.target))
            .unwrap_or(pkg);
        Ok(GroupCheck::Unmet { target, in_cycle })
    }

    /// Configure unpacked `Multi-Arch: same` siblings together with `pkg`
    fn configure_siblings(&mut self, pkg: PackageId, ver: VersionId) -> Result<()> {
        let graph = self.graph;
        if graph.version(ver).multi_arch != MultiArch::Same {
            return Ok(());
        }

        let siblings: Vec<PackageId> = graph
            .siblings(pkg)
            .filter(|&s| {
                self.list.state(s) == Some(EntryState::Unpacked) && !self.obligations.is_in_flight(s)
            })
            .collect();
        for sibling in siblings {
            if let Resolution::Blocked(blocker) = self.smart_configure(sibling)? {
                debug!(
                    "{}Sibling {} waits on {}",
                    indent(self.obligations.depth()),
                    graph.display(sibling),
                    graph.display(blocker.target)
                );
            }
        }
        Ok(())
    }
}

/// Outcome of checking one dependency group for configuration
enum GroupCheck {
    Satisfied,
    /// `target` is the alternative that was tried last
    Unmet { target: PackageId, in_cycle: bool },
}
