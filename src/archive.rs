// src/archive.rs

//! Locating downloaded archives for packages about to be unpacked
//!
//! Fetching and verification happen elsewhere; the scheduler only asks
//! where the archive for a version lives. A `None` answer means the input
//! is missing (e.g. removable media not inserted) and stops the run as
//! incomplete instead of failing it.

use crate::graph::{DependencyGraph, MultiArch, PackageId, VersionId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolves a version to a local archive file
pub trait ArchiveSource {
    fn locate(&self, graph: &DependencyGraph, pkg: PackageId, version: VersionId) -> Option<PathBuf>;
}

/// Archives stored flat in a directory using Debian pool file names
#[derive(Debug, Clone)]
pub struct ArchiveDir {
    root: PathBuf,
}

impl ArchiveDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<name>_<version>_<arch>.deb`, with the epoch colon encoded as `%3a`
    pub fn file_name(graph: &DependencyGraph, pkg: PackageId, version: VersionId) -> String {
        let package = graph.package(pkg);
        let ver = graph.version(version);
        let arch = if ver.multi_arch == MultiArch::All {
            "all"
        } else {
            package.arch.as_str()
        };
        format!(
            "{}_{}_{}.deb",
            package.name,
            ver.version.to_string().replace(':', "%3a"),
            arch
        )
    }
}

impl ArchiveSource for ArchiveDir {
    fn locate(&self, graph: &DependencyGraph, pkg: PackageId, version: VersionId) -> Option<PathBuf> {
        let path = self.root.join(Self::file_name(graph, pkg, version));
        if !path.is_file() {
            debug!("No archive at {}", path.display());
            return None;
        }
        std::path::absolute(&path).ok()
    }
}

/// Explicit `name:arch` to path map
#[derive(Debug, Clone, Default)]
pub struct StaticArchives {
    paths: HashMap<String, PathBuf>,
}

impl StaticArchives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, package: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.insert(package, path);
        self
    }

    pub fn insert(&mut self, package: impl Into<String>, path: impl Into<PathBuf>) {
        self.paths.insert(package.into(), path.into());
    }

    /// An archive for every package the graph installs, under a fake pool
    pub fn for_all(graph: &DependencyGraph, root: &Path) -> Self {
        let mut archives = Self::new();
        for (id, _) in graph.packages() {
            if let Some(ver) = graph.install_version(id) {
                archives.insert(graph.full_name(id), root.join(ArchiveDir::file_name(graph, id, ver)));
            }
        }
        archives
    }
}

impl ArchiveSource for StaticArchives {
    fn locate(&self, graph: &DependencyGraph, pkg: PackageId, _version: VersionId) -> Option<PathBuf> {
        self.paths.get(&graph.full_name(pkg)).cloned()
    }
}
