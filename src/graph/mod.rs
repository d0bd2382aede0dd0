// src/graph/mod.rs

//! In-memory dependency graph
//!
//! Packages and versions are stored in arenas and addressed by index
//! handles. A package is one (name, architecture) pair; packages sharing a
//! name form an architecture group. Dependency edges are kept per version as
//! or-groups, and a reverse index records which versions point at a package
//! so that conflicts against an installed version can be found quickly.
//!
//! The graph is read-only to the scheduler: decisions (`desired`,
//! `candidate`) are made by whoever builds it.

pub mod relation;
pub mod snapshot;

pub use relation::{Relation, parse_relations};
pub use snapshot::{PackageRecord, Snapshot, VersionRecord};

use crate::version::{DebVersion, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use strum_macros::{AsRefStr, Display, EnumString};

/// Handle to a package in a [`DependencyGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(pub(crate) usize);

impl PackageId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle to a version in a [`DependencyGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionId(pub(crate) usize);

impl VersionId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Relationship kinds between a version and a package
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum DepKind {
    Depends,
    #[strum(serialize = "Pre-Depends")]
    PreDepends,
    Conflicts,
    Breaks,
    Replaces,
    Obsoletes,
    Provides,
    Enhances,
    Suggests,
    Recommends,
}

impl DepKind {
    /// Kinds that must be satisfied before a package is configured
    pub fn is_critical(self) -> bool {
        matches!(self, DepKind::Depends | DepKind::PreDepends)
    }

    /// Kinds whose targets must not be installed at the same time
    pub fn is_negative(self) -> bool {
        matches!(self, DepKind::Conflicts | DepKind::Obsoletes | DepKind::Breaks)
    }
}

/// Multi-Arch mode of a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiArch {
    #[default]
    No,
    Same,
    Foreign,
    Allowed,
    /// Architecture-independent (`Architecture: all`)
    All,
}

/// dpkg's record of where a package currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallState {
    #[default]
    NotInstalled,
    ConfigFiles,
    HalfInstalled,
    Unpacked,
    HalfConfigured,
    TriggersAwaited,
    TriggersPending,
    Installed,
}

/// What dpkg still has to do for a package regardless of the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Needs {
    Nothing,
    Configure,
    Unpack,
}

impl InstallState {
    pub fn needs(self) -> Needs {
        match self {
            InstallState::Unpacked | InstallState::HalfConfigured => Needs::Configure,
            InstallState::HalfInstalled => Needs::Unpack,
            InstallState::NotInstalled
            | InstallState::ConfigFiles
            | InstallState::TriggersAwaited
            | InstallState::TriggersPending
            | InstallState::Installed => Needs::Nothing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallState::NotInstalled => "not-installed",
            InstallState::ConfigFiles => "config-files",
            InstallState::HalfInstalled => "half-installed",
            InstallState::Unpacked => "unpacked",
            InstallState::HalfConfigured => "half-configured",
            InstallState::TriggersAwaited => "triggers-awaited",
            InstallState::TriggersPending => "triggers-pending",
            InstallState::Installed => "installed",
        }
    }
}

/// Decision taken for a package by the resolver that built the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredAction {
    #[default]
    Keep,
    Install,
    Reinstall,
    Remove,
    Purge,
}

impl DesiredAction {
    pub fn is_delete(self) -> bool {
        matches!(self, DesiredAction::Remove | DesiredAction::Purge)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DesiredAction::Keep => "keep",
            DesiredAction::Install => "install",
            DesiredAction::Reinstall => "reinstall",
            DesiredAction::Remove => "remove",
            DesiredAction::Purge => "purge",
        }
    }
}

/// One alternative of an or-group
#[derive(Debug, Clone)]
pub struct DepEdge {
    pub target: PackageId,
    pub constraint: VersionConstraint,
}

/// An or-group of edges of a single kind
#[derive(Debug, Clone)]
pub struct DepGroup {
    pub kind: DepKind,
    pub alternatives: Vec<DepEdge>,
}

impl DepGroup {
    pub fn new(kind: DepKind) -> Self {
        Self {
            kind,
            alternatives: Vec::new(),
        }
    }

    pub fn with_alternative(mut self, target: PackageId, constraint: VersionConstraint) -> Self {
        self.alternatives.push(DepEdge { target, constraint });
        self
    }
}

/// A `Provides` entry, optionally versioned
#[derive(Debug, Clone)]
pub struct Provide {
    pub target: PackageId,
    pub version: Option<DebVersion>,
}

/// A concrete version of a package
#[derive(Debug, Clone)]
pub struct Version {
    pub package: PackageId,
    pub version: DebVersion,
    pub multi_arch: MultiArch,
    pub depends: Vec<DepGroup>,
    pub provides: Vec<Provide>,
}

/// A package, identified by name and architecture
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub arch: String,
    pub essential: bool,
    pub important: bool,
    pub state: InstallState,
    pub current: Option<VersionId>,
    pub candidate: Option<VersionId>,
    pub desired: DesiredAction,
    pub versions: Vec<VersionId>,
}

/// A dependency pointing at a package, seen from the target side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverseDep {
    pub source: VersionId,
    pub group: usize,
    pub alternative: usize,
}

/// Index-addressed package/version graph
#[derive(Debug, Default)]
pub struct DependencyGraph {
    native_arch: String,
    packages: Vec<Package>,
    versions: Vec<Version>,
    by_key: HashMap<(String, String), PackageId>,
    groups: HashMap<String, Vec<PackageId>>,
    reverse: Vec<Vec<ReverseDep>>,
    provided_by: Vec<Vec<VersionId>>,
}

impl DependencyGraph {
    /// Create a new empty graph for a system of the given native architecture
    pub fn new(native_arch: impl Into<String>) -> Self {
        Self {
            native_arch: native_arch.into(),
            ..Self::default()
        }
    }

    pub fn native_arch(&self) -> &str {
        &self.native_arch
    }

    /// Add a package, or return the existing one with this name and architecture
    pub fn add_package(&mut self, name: &str, arch: &str) -> PackageId {
        let key = (name.to_string(), arch.to_string());
        if let Some(&id) = self.by_key.get(&key) {
            return id;
        }

        let id = PackageId(self.packages.len());
        self.packages.push(Package {
            name: name.to_string(),
            arch: arch.to_string(),
            essential: false,
            important: false,
            state: InstallState::NotInstalled,
            current: None,
            candidate: None,
            desired: DesiredAction::Keep,
            versions: Vec::new(),
        });
        self.reverse.push(Vec::new());
        self.provided_by.push(Vec::new());
        self.by_key.insert(key, id);
        self.groups.entry(name.to_string()).or_default().push(id);
        id
    }

    /// Add a version to a package
    pub fn add_version(
        &mut self,
        package: PackageId,
        version: DebVersion,
        multi_arch: MultiArch,
    ) -> VersionId {
        let id = VersionId(self.versions.len());
        self.versions.push(Version {
            package,
            version,
            multi_arch,
            depends: Vec::new(),
            provides: Vec::new(),
        });
        self.packages[package.0].versions.push(id);
        id
    }

    /// Attach an or-group of dependencies to a version
    pub fn add_dependency(&mut self, version: VersionId, group: DepGroup) {
        let group_index = self.versions[version.0].depends.len();
        for (alternative, edge) in group.alternatives.iter().enumerate() {
            self.reverse[edge.target.0].push(ReverseDep {
                source: version,
                group: group_index,
                alternative,
            });
        }
        self.versions[version.0].depends.push(group);
    }

    /// Declare that a version provides another (usually virtual) package
    pub fn add_provide(&mut self, version: VersionId, target: PackageId, provided: Option<DebVersion>) {
        self.provided_by[target.0].push(version);
        self.versions[version.0].provides.push(Provide {
            target,
            version: provided,
        });
    }

    pub fn package(&self, id: PackageId) -> &Package {
        &self.packages[id.0]
    }

    pub fn package_mut(&mut self, id: PackageId) -> &mut Package {
        &mut self.packages[id.0]
    }

    pub fn version(&self, id: VersionId) -> &Version {
        &self.versions[id.0]
    }

    /// Iterate packages in graph order
    pub fn packages(&self) -> impl Iterator<Item = (PackageId, &Package)> {
        self.packages
            .iter()
            .enumerate()
            .map(|(i, p)| (PackageId(i), p))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn find(&self, name: &str, arch: &str) -> Option<PackageId> {
        self.by_key
            .get(&(name.to_string(), arch.to_string()))
            .copied()
    }

    /// Look up a package by `name` or `name:arch`, defaulting to the native architecture
    pub fn lookup(&self, spec: &str) -> Option<PackageId> {
        match spec.split_once(':') {
            Some((name, arch)) => self.find(name, arch),
            None => self
                .find(spec, &self.native_arch)
                .or_else(|| self.group(spec).first().copied()),
        }
    }

    /// All packages sharing this name across architectures
    pub fn group(&self, name: &str) -> &[PackageId] {
        self.groups.get(name).map(|g| g.as_slice()).unwrap_or(&[])
    }

    /// Other architectures of the same package name
    pub fn siblings(&self, pkg: PackageId) -> impl Iterator<Item = PackageId> + '_ {
        self.group(&self.packages[pkg.0].name)
            .iter()
            .copied()
            .filter(move |&p| p != pkg)
    }

    /// A package with no versions exists only as a `Provides` target
    pub fn is_virtual(&self, pkg: PackageId) -> bool {
        self.packages[pkg.0].versions.is_empty()
    }

    /// The version the transaction ends with, if any
    pub fn install_version(&self, pkg: PackageId) -> Option<VersionId> {
        let package = &self.packages[pkg.0];
        match package.desired {
            DesiredAction::Install | DesiredAction::Reinstall => package.candidate,
            DesiredAction::Keep => package.current,
            DesiredAction::Remove | DesiredAction::Purge => None,
        }
    }

    /// Versions pointing at this package through any relationship
    pub fn reverse_depends(&self, pkg: PackageId) -> &[ReverseDep] {
        &self.reverse[pkg.0]
    }

    /// Versions providing this package
    pub fn providers(&self, pkg: PackageId) -> &[VersionId] {
        &self.provided_by[pkg.0]
    }

    pub fn group_of(&self, dep: ReverseDep) -> &DepGroup {
        &self.versions[dep.source.0].depends[dep.group]
    }

    /// Whether a version satisfies an edge, directly or through a provide
    pub fn satisfies(&self, edge: &DepEdge, ver: VersionId) -> bool {
        let version = &self.versions[ver.0];
        if version.package == edge.target && edge.constraint.satisfies(&version.version) {
            return true;
        }

        version.provides.iter().any(|p| {
            p.target == edge.target
                && match &p.version {
                    Some(v) => edge.constraint.satisfies(v),
                    None => edge.constraint.is_any(),
                }
        })
    }

    /// Every version that satisfies an edge
    pub fn all_targets(&self, edge: &DepEdge) -> Vec<VersionId> {
        let mut targets: Vec<VersionId> = self.packages[edge.target.0]
            .versions
            .iter()
            .copied()
            .filter(|&v| edge.constraint.satisfies(&self.versions[v.0].version))
            .collect();

        for &provider in &self.provided_by[edge.target.0] {
            if !targets.contains(&provider) && self.satisfies(edge, provider) {
                targets.push(provider);
            }
        }

        targets
    }

    /// Whether a negative edge from `source` to `target` can be ignored
    ///
    /// A package never conflicts with itself, and a conflict against a name
    /// in the package's own architecture group is implicit co-installation
    /// handling that the scheduler does not need to act on.
    pub fn is_ignorable(&self, source: PackageId, target: VersionId) -> bool {
        let target_pkg = self.versions[target.0].package;
        target_pkg == source || self.packages[target_pkg.0].name == self.packages[source.0].name
    }

    /// `name:arch` for logs and back-end arguments
    pub fn full_name(&self, pkg: PackageId) -> String {
        let p = &self.packages[pkg.0];
        format!("{}:{}", p.name, p.arch)
    }

    /// Display helper for a package
    pub fn display(&self, pkg: PackageId) -> PackageDisplay<'_> {
        PackageDisplay { graph: self, pkg }
    }
}

/// Formats a package as `name:arch`
pub struct PackageDisplay<'a> {
    graph: &'a DependencyGraph,
    pkg: PackageId,
}

impl fmt::Display for PackageDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.graph.package(self.pkg);
        write!(f, "{}:{}", p.name, p.arch)
    }
}
