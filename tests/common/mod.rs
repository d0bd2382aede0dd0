// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use orderly::{
    Config, DependencyGraph, Operation, PackageId, PackageManager, Snapshot, StaticArchives,
};
use std::path::Path;

/// Build a graph from a snapshot, panicking on malformed fixtures
pub fn graph(snapshot: Snapshot) -> DependencyGraph {
    snapshot.build().unwrap()
}

/// Package manager with an archive for everything the graph installs
pub fn manager(graph: &DependencyGraph, config: Config) -> PackageManager<'_> {
    let mut pm = PackageManager::new(graph, config);
    assert_eq!(pm.get_archives(&StaticArchives::for_all(graph, Path::new("/pool"))), 0);
    pm
}

pub fn id(graph: &DependencyGraph, spec: &str) -> PackageId {
    graph
        .lookup(spec)
        .unwrap_or_else(|| panic!("no package {} in fixture", spec))
}

/// Index of an action in the log, panicking when it was never emitted
pub fn position(pm: &PackageManager<'_>, operation: Operation, spec: &str) -> usize {
    let pkg = id(pm.graph(), spec);
    pm.actions()
        .position(operation, pkg)
        .unwrap_or_else(|| panic!("{}({}) not emitted: {:?}", operation, spec, pm.describe_actions()))
}

/// Config that allows essential packages to be removed to break loops
pub fn force_loop_break() -> Config {
    let mut config = Config::default();
    config.scheduler.force_loop_break = true;
    config
}
