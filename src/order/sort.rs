// src/order/sort.rs

//! Ordering passes over the transaction list
//!
//! Each pass is a depth-first topological sort: for every entry the
//! packages that should be handled first are visited before it. Roots are
//! taken by descending score, ties by their position in the list. Back edges
//! of cycles are dropped; the scheduler resolves those dynamically.

use super::list::TransactionList;
use crate::error::Result;
use crate::graph::{DepGroup, DepKind, DependencyGraph, PackageId};
use std::collections::{HashMap, HashSet};
use tracing::debug;

const SCORE_ESSENTIAL: u32 = 200;
const SCORE_PRE_DEPENDED: u32 = 100;
const SCORE_IMMEDIATE: u32 = 10;

/// Which edges a pass honors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// Depends, PreDepends and removal edges
    Unpack,
    /// PreDepends and removal edges only
    Critical,
}

/// Full unpack order over every entry
pub fn order_unpack(graph: &DependencyGraph, list: &mut TransactionList, missing: &HashSet<PackageId>) -> Result<()> {
    sort_list(graph, list, missing, SortMode::Unpack)
}

/// Order only what is needed to avoid unresolvable breakage
pub fn order_critical(graph: &DependencyGraph, list: &mut TransactionList, missing: &HashSet<PackageId>) -> Result<()> {
    sort_list(graph, list, missing, SortMode::Critical)
}

fn sort_list(
    graph: &DependencyGraph,
    list: &mut TransactionList,
    missing: &HashSet<PackageId>,
    mode: SortMode,
) -> Result<()> {
    let order = {
        let view: &TransactionList = list;
        let scores = score(graph, view);
        depth_first(&view.packages(), &scores, |pkg| predecessors(graph, view, pkg, mode))
    };

    // Entries without an archive go last, so the run stops at them
    let (mut ready, waiting): (Vec<_>, Vec<_>) = order.into_iter().partition(|p| !missing.contains(p));
    if !waiting.is_empty() {
        debug!("{} entries have no archive and are ordered last", waiting.len());
    }
    ready.extend(waiting);

    list.reorder(&ready)?;
    debug!("Ordered {} entries ({:?})", ready.len(), mode);
    Ok(())
}

/// Configuration order for a subset of the list
pub fn order_configure(graph: &DependencyGraph, list: &TransactionList, subset: &[PackageId]) -> Vec<PackageId> {
    let members: HashSet<PackageId> = subset.iter().copied().collect();
    let scores = score(graph, list);

    depth_first(subset, &scores, |pkg| {
        let Some(ver) = graph.install_version(pkg) else {
            return Vec::new();
        };
        let mut before = Vec::new();
        for group in &graph.version(ver).depends {
            if !group.kind.is_critical() {
                continue;
            }
            for edge in &group.alternatives {
                for target in graph.all_targets(edge) {
                    let owner = graph.version(target).package;
                    if owner != pkg && members.contains(&owner) && !before.contains(&owner) {
                        before.push(owner);
                    }
                }
            }
        }
        before
    })
}

fn score(graph: &DependencyGraph, list: &TransactionList) -> HashMap<PackageId, u32> {
    let mut scores: HashMap<PackageId, u32> = HashMap::new();

    for entry in list.entries() {
        let package = graph.package(entry.package);
        let mut value = 0;
        if package.essential || package.important {
            value += SCORE_ESSENTIAL;
        }
        if list.is_immediate(entry.package) {
            value += SCORE_IMMEDIATE;
        }
        *scores.entry(entry.package).or_default() += value;
    }

    // Pre-depended upon by something this transaction installs
    let mut pre_depended: HashSet<PackageId> = HashSet::new();
    for entry in list.entries() {
        let Some(ver) = graph.install_version(entry.package) else {
            continue;
        };
        for group in &graph.version(ver).depends {
            if group.kind != DepKind::PreDepends {
                continue;
            }
            for edge in &group.alternatives {
                for target in graph.all_targets(edge) {
                    pre_depended.insert(graph.version(target).package);
                }
            }
        }
    }
    for pkg in pre_depended {
        if let Some(value) = scores.get_mut(&pkg) {
            *value += SCORE_PRE_DEPENDED;
        }
    }

    scores
}

/// Packages that should be handled before `pkg`
fn predecessors(graph: &DependencyGraph, list: &TransactionList, pkg: PackageId, mode: SortMode) -> Vec<PackageId> {
    let mut before = Vec::new();

    if list.is_delete(pkg) {
        // Whatever still depends on the removed version goes first
        for rdep in graph.reverse_depends(pkg) {
            let kind = graph.group_of(*rdep).kind;
            let relevant = match mode {
                SortMode::Unpack => kind.is_critical(),
                SortMode::Critical => kind == DepKind::PreDepends,
            };
            let owner = graph.version(rdep.source).package;
            if relevant
                && owner != pkg
                && list.contains(owner)
                && graph.package(owner).current == Some(rdep.source)
                && !before.contains(&owner)
            {
                before.push(owner);
            }
        }
        return before;
    }

    let Some(ver) = graph.install_version(pkg) else {
        return before;
    };

    for group in &graph.version(ver).depends {
        let relevant = match (mode, group.kind) {
            (_, DepKind::PreDepends) => true,
            (SortMode::Unpack, DepKind::Depends) => true,
            (_, kind) => kind.is_negative(),
        };
        if !relevant {
            continue;
        }

        if group.kind.is_negative() {
            for edge in &group.alternatives {
                for target in graph.all_targets(edge) {
                    let owner = graph.version(target).package;
                    if graph.is_ignorable(pkg, target) {
                        continue;
                    }
                    if graph.package(owner).current == Some(target)
                        && list.is_delete(owner)
                        && !before.contains(&owner)
                    {
                        before.push(owner);
                    }
                }
            }
            continue;
        }

        if satisfied_by_unchanged(graph, list, group) {
            continue;
        }

        let provider = group.alternatives.iter().find_map(|edge| {
            graph.all_targets(edge).into_iter().find_map(|target| {
                let owner = graph.version(target).package;
                let will_satisfy = list.contains(owner)
                    && !list.is_delete(owner)
                    && graph.install_version(owner) == Some(target);
                (will_satisfy && owner != pkg).then_some(owner)
            })
        });
        if let Some(owner) = provider
            && !before.contains(&owner)
        {
            before.push(owner);
        }
    }

    before
}

/// A group already satisfied by an installed package that is not changing
fn satisfied_by_unchanged(graph: &DependencyGraph, list: &TransactionList, group: &DepGroup) -> bool {
    group.alternatives.iter().any(|edge| {
        graph.all_targets(edge).into_iter().any(|target| {
            let owner = graph.version(target).package;
            graph.package(owner).current == Some(target) && !list.contains(owner)
        })
    })
}

/// Iterative depth-first post-order over `nodes`
fn depth_first<F>(nodes: &[PackageId], scores: &HashMap<PackageId, u32>, mut edges: F) -> Vec<PackageId>
where
    F: FnMut(PackageId) -> Vec<PackageId>,
{
    let position: HashMap<PackageId, usize> = nodes.iter().enumerate().map(|(i, &p)| (p, i)).collect();
    let rank = |p: &PackageId| {
        (
            std::cmp::Reverse(scores.get(p).copied().unwrap_or(0)),
            position.get(p).copied().unwrap_or(usize::MAX),
        )
    };

    let mut roots = nodes.to_vec();
    roots.sort_by_key(rank);

    let mut done: HashSet<PackageId> = HashSet::new();
    let mut on_stack: HashSet<PackageId> = HashSet::new();
    let mut order = Vec::with_capacity(nodes.len());

    for root in roots {
        if done.contains(&root) {
            continue;
        }

        let mut stack: Vec<(PackageId, Vec<PackageId>)> = Vec::new();
        let mut first = edges(root);
        first.sort_by_key(rank);
        first.reverse();
        on_stack.insert(root);
        stack.push((root, first));

        while let Some((node, pending)) = stack.last_mut() {
            match pending.pop() {
                Some(next) => {
                    if done.contains(&next) || on_stack.contains(&next) || !position.contains_key(&next) {
                        continue;
                    }
                    let mut succ = edges(next);
                    succ.sort_by_key(rank);
                    succ.reverse();
                    on_stack.insert(next);
                    stack.push((next, succ));
                }
                None => {
                    let node = *node;
                    stack.pop();
                    on_stack.remove(&node);
                    done.insert(node);
                    order.push(node);
                }
            }
        }
    }

    order
}
