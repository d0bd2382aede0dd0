// src/order/entry.rs

//! Transaction entries and their state machine
//!
//! Every entry moves through a closed set of transitions:
//!
//! ```text
//! Pending -> Unpacking -> Unpacked -> Configuring -> Configured
//!    |          |
//!    |          +-> Pending          (attempt abandoned)
//!    +-> Removing -> Removed -> Unpacking   (early removal, reinstall later)
//! ```
//!
//! Anything else is an internal error.

use crate::error::{Error, Result};
use crate::graph::{DesiredAction, PackageId};
use std::fmt;

/// Lifecycle of a single transaction entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    Pending,
    Unpacking,
    Unpacked,
    Configuring,
    Configured,
    Removing,
    Removed,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Pending => "pending",
            EntryState::Unpacking => "unpacking",
            EntryState::Unpacked => "unpacked",
            EntryState::Configuring => "configuring",
            EntryState::Configured => "configured",
            EntryState::Removing => "removing",
            EntryState::Removed => "removed",
        }
    }

    /// Whether the package has been unpacked in this run and not yet configured
    pub fn is_unpacked(self) -> bool {
        matches!(self, EntryState::Unpacked | EntryState::Configuring)
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One package requiring action in the transaction
#[derive(Debug, Clone)]
pub struct TransactionEntry {
    pub package: PackageId,
    pub action: DesiredAction,
    state: EntryState,
    /// Added during scheduling to resolve a conflict
    pub adopted: bool,
}

impl TransactionEntry {
    pub fn new(package: PackageId, action: DesiredAction) -> Self {
        Self {
            package,
            action,
            state: EntryState::Pending,
            adopted: false,
        }
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn is_delete(&self) -> bool {
        self.action.is_delete()
    }

    /// Check a transition against the table without applying it
    pub fn can_transition(&self, to: EntryState) -> bool {
        use EntryState::*;
        match (self.state, to) {
            (Pending, Unpacking)
            | (Pending, Removing)
            | (Unpacking, Unpacked)
            | (Unpacking, Pending)
            | (Unpacked, Configuring)
            | (Configuring, Configured)
            | (Removing, Removed) => true,
            (Removed, Unpacking) => !self.is_delete(),
            _ => false,
        }
    }

    /// Apply a transition, failing on anything outside the table
    pub fn transition(&mut self, to: EntryState, name: &str) -> Result<()> {
        if !self.can_transition(to) {
            return Err(Error::IllegalTransition {
                package: name.to_string(),
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }
}
