// src/action/mod.rs

//! Action log and batching
//!
//! The scheduler appends atomic actions as it decides them; nothing is ever
//! retracted. The log is then cut into back-end invocations: contiguous
//! actions of the same kind form one batch, split further when a batch
//! would exceed the argument limits.

use crate::graph::{DependencyGraph, PackageId};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// Kind of back-end operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Install,
    Configure,
    Remove,
    Purge,
    ConfigurePending,
    TriggersPending,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Install => "install",
            Operation::Configure => "configure",
            Operation::Remove => "remove",
            Operation::Purge => "purge",
            Operation::ConfigurePending => "configure-pending",
            Operation::TriggersPending => "triggers-pending",
        }
    }

    /// Operations that change what is on disk; cancellation is honored before them
    pub fn is_destructive(self) -> bool {
        matches!(self, Operation::Install | Operation::Remove | Operation::Purge)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One atomic back-end action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionItem {
    Install { package: PackageId, archive: PathBuf },
    Configure(PackageId),
    Remove(PackageId),
    Purge(PackageId),
    ConfigurePending,
    TriggersPending,
}

impl ActionItem {
    pub fn operation(&self) -> Operation {
        match self {
            ActionItem::Install { .. } => Operation::Install,
            ActionItem::Configure(_) => Operation::Configure,
            ActionItem::Remove(_) => Operation::Remove,
            ActionItem::Purge(_) => Operation::Purge,
            ActionItem::ConfigurePending => Operation::ConfigurePending,
            ActionItem::TriggersPending => Operation::TriggersPending,
        }
    }

    pub fn package(&self) -> Option<PackageId> {
        match self {
            ActionItem::Install { package, .. } => Some(*package),
            ActionItem::Configure(p) | ActionItem::Remove(p) | ActionItem::Purge(p) => Some(*p),
            ActionItem::ConfigurePending | ActionItem::TriggersPending => None,
        }
    }

    /// Human readable form such as `Install(foo:amd64)`
    pub fn describe(&self, graph: &DependencyGraph) -> String {
        match self {
            ActionItem::Install { package, .. } => format!("Install({})", graph.display(*package)),
            ActionItem::Configure(p) => format!("Configure({})", graph.display(*p)),
            ActionItem::Remove(p) => format!("Remove({})", graph.display(*p)),
            ActionItem::Purge(p) => format!("Purge({})", graph.display(*p)),
            ActionItem::ConfigurePending => "ConfigurePending".to_string(),
            ActionItem::TriggersPending => "TriggersPending".to_string(),
        }
    }
}

/// Append-only log of emitted actions
#[derive(Debug, Clone, Default)]
pub struct ActionLog {
    items: Vec<ActionItem>,
    triggers_pending: bool,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow every configure with trigger processing
    pub fn with_triggers_pending(mut self, enabled: bool) -> Self {
        self.triggers_pending = enabled;
        self
    }

    pub fn push(&mut self, item: ActionItem) {
        debug!("Emit {:?}", item.operation());
        let configure = matches!(item, ActionItem::Configure(_));
        self.items.push(item);
        if configure && self.triggers_pending {
            self.items.push(ActionItem::TriggersPending);
        }
    }

    pub fn items(&self) -> &[ActionItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Position of the first action of `operation` on `package`
    pub fn position(&self, operation: Operation, package: PackageId) -> Option<usize> {
        self.items
            .iter()
            .position(|i| i.operation() == operation && i.package() == Some(package))
    }

    /// Batches for the back-end, see [`batches`]
    pub fn batches<F>(&self, limits: BatchLimits, arg_size: F) -> Vec<Batch>
    where
        F: Fn(&ActionItem) -> usize,
    {
        batches(&self.items, self.triggers_pending, limits, arg_size)
    }
}

/// Per-invocation argument limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_args: usize,
    pub max_arg_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_args: 8192,
            max_arg_bytes: 32768,
        }
    }
}

/// A run of same-kind actions handed to the back-end in one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub operation: Operation,
    pub items: Vec<ActionItem>,
}

impl Batch {
    pub fn packages(&self) -> impl Iterator<Item = PackageId> + '_ {
        self.items.iter().filter_map(ActionItem::package)
    }
}

/// Cut a list of actions into back-end batches
///
/// Contiguous actions of one kind share a batch. With trigger processing
/// after configure enabled, a `TriggersPending` lying between two runs of the
/// same kind is absorbed into the run instead of splitting it. Batches with
/// arguments are split at `max_args` items or `max_arg_bytes` bytes as
/// reported by `arg_size`.
pub fn batches<F>(items: &[ActionItem], triggers_pending: bool, limits: BatchLimits, arg_size: F) -> Vec<Batch>
where
    F: Fn(&ActionItem) -> usize,
{
    let mut result = Vec::new();
    let mut i = 0;

    while i < items.len() {
        let operation = items[i].operation();
        let mut run: Vec<ActionItem> = Vec::new();
        let mut j = i;

        while j < items.len() {
            let op = items[j].operation();
            if op == operation {
                run.push(items[j].clone());
                j += 1;
                continue;
            }
            let absorbable = triggers_pending
                && op == Operation::TriggersPending
                && items.get(j + 1).is_some_and(|next| next.operation() == operation);
            if !absorbable {
                break;
            }
            j += 1;
        }

        if matches!(operation, Operation::ConfigurePending | Operation::TriggersPending) {
            result.push(Batch {
                operation,
                items: vec![items[i].clone()],
            });
        } else {
            let mut current: Vec<ActionItem> = Vec::new();
            let mut bytes = 0usize;
            for item in run {
                let size = arg_size(&item);
                if !current.is_empty() && (current.len() >= limits.max_args || bytes + size > limits.max_arg_bytes) {
                    result.push(Batch {
                        operation,
                        items: std::mem::take(&mut current),
                    });
                    bytes = 0;
                }
                bytes += size;
                current.push(item);
            }
            if !current.is_empty() {
                result.push(Batch { operation, items: current });
            }
        }

        i = j;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(i: usize) -> PackageId {
        PackageId(i)
    }

    fn install(i: usize) -> ActionItem {
        ActionItem::Install {
            package: p(i),
            archive: PathBuf::from(format!("/pool/p{}.deb", i)),
        }
    }

    fn ops(batches: &[Batch]) -> Vec<(Operation, usize)> {
        batches.iter().map(|b| (b.operation, b.items.len())).collect()
    }

    #[test]
    fn test_contiguous_runs() {
        let items = vec![
            install(0),
            install(1),
            ActionItem::Configure(p(0)),
            ActionItem::Configure(p(1)),
            ActionItem::Remove(p(2)),
            install(3),
        ];
        let result = batches(&items, false, BatchLimits::default(), |_| 1);
        assert_eq!(
            ops(&result),
            vec![
                (Operation::Install, 2),
                (Operation::Configure, 2),
                (Operation::Remove, 1),
                (Operation::Install, 1)
            ]
        );
    }

    #[test]
    fn test_triggers_pending_after_configure() {
        let mut log = ActionLog::new().with_triggers_pending(true);
        log.push(install(0));
        log.push(ActionItem::Configure(p(0)));
        log.push(ActionItem::Configure(p(1)));
        assert_eq!(log.len(), 5);
        assert_eq!(log.items()[2], ActionItem::TriggersPending);

        // The trigger run between the two configures is absorbed
        let result = log.batches(BatchLimits::default(), |_| 1);
        assert_eq!(
            ops(&result),
            vec![
                (Operation::Install, 1),
                (Operation::Configure, 2),
                (Operation::TriggersPending, 1)
            ]
        );
    }

    #[test]
    fn test_split_on_limits() {
        let items: Vec<ActionItem> = (0..5).map(install).collect();
        let by_count = batches(
            &items,
            false,
            BatchLimits { max_args: 2, max_arg_bytes: 1000 },
            |_| 1,
        );
        assert_eq!(by_count.len(), 3);

        let by_bytes = batches(
            &items,
            false,
            BatchLimits { max_args: 100, max_arg_bytes: 25 },
            |_| 10,
        );
        assert_eq!(ops(&by_bytes), vec![(Operation::Install, 2), (Operation::Install, 2), (Operation::Install, 1)]);
    }

    #[test]
    fn test_position_lookup() {
        let mut log = ActionLog::new();
        log.push(ActionItem::Remove(p(1)));
        log.push(install(0));
        assert_eq!(log.position(Operation::Install, p(0)), Some(1));
        assert_eq!(log.position(Operation::Remove, p(1)), Some(0));
        assert_eq!(log.position(Operation::Configure, p(0)), None);
    }
}
