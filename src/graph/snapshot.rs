// src/graph/snapshot.rs

//! Serializable description of a system state and the decisions made for it
//!
//! A snapshot lists every package with its dpkg state, installed version,
//! candidate version and desired action. Relationship fields are written in
//! Debian control syntax and resolved to graph handles when the snapshot is
//! built.

use super::relation::{Relation, parse_relations};
use super::{DepGroup, DependencyGraph, DepKind, DesiredAction, InstallState, MultiArch, PackageId, VersionId};
use crate::error::{Error, Result};
use crate::version::{DebVersion, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// A whole system snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub native_arch: String,
    #[serde(default)]
    pub packages: Vec<PackageRecord>,
}

/// One package in a snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageRecord {
    pub name: String,
    /// Defaults to the native architecture; `all` is mapped to it as well
    pub arch: Option<String>,
    pub essential: bool,
    pub important: bool,
    pub state: InstallState,
    pub desired: DesiredAction,
    pub current: Option<VersionRecord>,
    pub candidate: Option<VersionRecord>,
}

/// One version in a snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionRecord {
    pub version: String,
    pub multi_arch: MultiArch,
    pub depends: String,
    pub pre_depends: String,
    pub conflicts: String,
    pub breaks: String,
    pub replaces: String,
    pub obsoletes: String,
    pub provides: String,
    pub recommends: String,
    pub suggests: String,
    pub enhances: String,
}

impl Snapshot {
    pub fn new(native_arch: impl Into<String>) -> Self {
        Self {
            native_arch: native_arch.into(),
            packages: Vec::new(),
        }
    }

    pub fn package(mut self, record: PackageRecord) -> Self {
        self.packages.push(record);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Resolve the snapshot into a dependency graph
    pub fn build(&self) -> Result<DependencyGraph> {
        let mut graph = DependencyGraph::new(self.native_arch.clone());
        let mut pending: Vec<(VersionId, &VersionRecord)> = Vec::new();

        // Packages first, so relations can resolve against real packages
        let ids: Vec<PackageId> = self
            .packages
            .iter()
            .map(|record| {
                if record.name.is_empty() {
                    return Err(Error::Parse("package record without a name".into()));
                }
                Ok(graph.add_package(&record.name, self.arch_of(record)))
            })
            .collect::<Result<_>>()?;

        for (record, &id) in self.packages.iter().zip(&ids) {
            let mut seen: HashMap<String, VersionId> = HashMap::new();
            let is_all = record.arch.as_deref() == Some("all");

            for (slot, ver) in [(0, &record.current), (1, &record.candidate)] {
                let Some(ver) = ver else { continue };

                let version_id = match seen.get(&ver.version) {
                    Some(&existing) => existing,
                    None => {
                        let parsed = DebVersion::parse(&ver.version)?;
                        let multi_arch = if is_all { MultiArch::All } else { ver.multi_arch };
                        let created = graph.add_version(id, parsed, multi_arch);
                        seen.insert(ver.version.clone(), created);
                        pending.push((created, ver));
                        created
                    }
                };

                let package = graph.package_mut(id);
                if slot == 0 {
                    package.current = Some(version_id);
                } else {
                    package.candidate = Some(version_id);
                }
            }

            let package = graph.package_mut(id);
            package.essential = record.essential;
            package.important = record.important;
            package.state = record.state;
            package.desired = record.desired;
            if package.current.is_some() && package.state == InstallState::NotInstalled {
                package.state = InstallState::Installed;
            }
        }

        for (version_id, record) in pending {
            resolve_version(&mut graph, version_id, record)?;
        }

        debug!(
            "Built dependency graph with {} packages from snapshot",
            graph.len()
        );
        Ok(graph)
    }

    fn arch_of<'a>(&'a self, record: &'a PackageRecord) -> &'a str {
        match record.arch.as_deref() {
            None | Some("all") => &self.native_arch,
            Some(arch) => arch,
        }
    }
}

fn resolve_version(graph: &mut DependencyGraph, version_id: VersionId, record: &VersionRecord) -> Result<()> {
    let fields = [
        (DepKind::PreDepends, &record.pre_depends),
        (DepKind::Depends, &record.depends),
        (DepKind::Conflicts, &record.conflicts),
        (DepKind::Breaks, &record.breaks),
        (DepKind::Replaces, &record.replaces),
        (DepKind::Obsoletes, &record.obsoletes),
        (DepKind::Recommends, &record.recommends),
        (DepKind::Suggests, &record.suggests),
        (DepKind::Enhances, &record.enhances),
    ];

    for (kind, field) in fields {
        for alternatives in parse_relations(field)? {
            let mut group = DepGroup::new(kind);
            for relation in alternatives {
                let target = resolve_target(graph, version_id, &relation);
                group = group.with_alternative(target, relation.constraint);
            }
            graph.add_dependency(version_id, group);
        }
    }

    for alternatives in parse_relations(&record.provides)? {
        for relation in alternatives {
            let provided = match relation.constraint {
                VersionConstraint::Any => None,
                VersionConstraint::Exact(v) => Some(v),
                other => {
                    return Err(Error::Parse(format!(
                        "Provides only allows '=' versions, got '{}' on {}",
                        other, relation.name
                    )));
                }
            };
            let source_arch = graph.package(graph.version(version_id).package).arch.clone();
            let target = graph.add_package(&relation.name, &source_arch);
            graph.add_provide(version_id, target, provided);
        }
    }

    Ok(())
}

/// Map a relation to a package handle
///
/// Explicit architectures are honored; `any` and unqualified names prefer
/// the source architecture, then fall back to a `Multi-Arch: foreign` (or
/// `allowed` for `:any`) package of another architecture. Names that match
/// nothing become virtual packages of the source architecture.
fn resolve_target(graph: &mut DependencyGraph, source: VersionId, relation: &Relation) -> PackageId {
    let source_arch = graph.package(graph.version(source).package).arch.clone();

    let arch = match relation.arch.as_deref() {
        Some("native") => graph.native_arch().to_string(),
        Some("any") | None => source_arch,
        Some(explicit) => return graph.add_package(&relation.name, explicit),
    };

    if let Some(same) = graph.find(&relation.name, &arch) {
        return same;
    }

    let accepts_any = relation.arch.as_deref() == Some("any");
    let foreign = graph.group(&relation.name).iter().copied().find(|&p| {
        graph.package(p).versions.iter().any(|&v| {
            matches!(
                (graph.version(v).multi_arch, accepts_any),
                (MultiArch::Foreign, _) | (MultiArch::All, _) | (MultiArch::Allowed, true)
            )
        })
    });

    foreign.unwrap_or_else(|| graph.add_package(&relation.name, &arch))
}

impl PackageRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn essential(mut self) -> Self {
        self.essential = true;
        self
    }

    pub fn important(mut self) -> Self {
        self.important = true;
        self
    }

    pub fn state(mut self, state: InstallState) -> Self {
        self.state = state;
        self
    }

    /// Mark a version as installed and configured
    pub fn installed(mut self, version: VersionRecord) -> Self {
        self.current = Some(version);
        self.state = InstallState::Installed;
        self
    }

    pub fn candidate(mut self, version: VersionRecord) -> Self {
        self.candidate = Some(version);
        self
    }

    pub fn desired(mut self, desired: DesiredAction) -> Self {
        self.desired = desired;
        self
    }

    pub fn install(self) -> Self {
        self.desired(DesiredAction::Install)
    }

    pub fn reinstall(self) -> Self {
        self.desired(DesiredAction::Reinstall)
    }

    pub fn remove(self) -> Self {
        self.desired(DesiredAction::Remove)
    }

    pub fn purge(self) -> Self {
        self.desired(DesiredAction::Purge)
    }
}

impl VersionRecord {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn multi_arch(mut self, multi_arch: MultiArch) -> Self {
        self.multi_arch = multi_arch;
        self
    }

    pub fn depends(mut self, field: impl Into<String>) -> Self {
        self.depends = field.into();
        self
    }

    pub fn pre_depends(mut self, field: impl Into<String>) -> Self {
        self.pre_depends = field.into();
        self
    }

    pub fn conflicts(mut self, field: impl Into<String>) -> Self {
        self.conflicts = field.into();
        self
    }

    pub fn breaks(mut self, field: impl Into<String>) -> Self {
        self.breaks = field.into();
        self
    }

    pub fn replaces(mut self, field: impl Into<String>) -> Self {
        self.replaces = field.into();
        self
    }

    pub fn obsoletes(mut self, field: impl Into<String>) -> Self {
        self.obsoletes = field.into();
        self
    }

    pub fn provides(mut self, field: impl Into<String>) -> Self {
        self.provides = field.into();
        self
    }
}
