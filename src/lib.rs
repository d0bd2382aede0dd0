// src/lib.rs

//! orderly: package transaction ordering and execution
//!
//! Given the desired end state of every package on a Debian-style system,
//! orderly works out a safe sequence of unpack, configure and remove
//! operations and drives an installer back-end through it.
//!
//! # Architecture
//!
//! - Dependency graph: index-addressed packages, versions and relationship edges
//! - Transaction list: one entry per changing package, each with its own state machine
//! - Ordering: a topological pass, then on-the-fly resolution of what the sort leaves open
//! - Obligations: in-flight work is tracked explicitly, which is how cycles are broken
//! - Actions: an append-only log, batched into back-end invocations
//!
//! ```no_run
//! use orderly::{Config, PackageManager, RecordingBackend, SilentProgress, Snapshot, StaticArchives};
//! use std::path::Path;
//!
//! # fn main() -> orderly::Result<()> {
//! let graph = Snapshot::load(Path::new("system.json"))?.build()?;
//! let mut pm = PackageManager::new(&graph, Config::default());
//! pm.get_archives(&StaticArchives::for_all(&graph, Path::new("/var/cache/apt/archives")));
//! let result = pm.do_install(&mut RecordingBackend::new(), &SilentProgress::new())?;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod archive;
pub mod backend;
pub mod config;
mod error;
pub mod graph;
pub mod order;
pub mod progress;
pub mod scheduler;
pub mod version;

pub use action::{ActionItem, ActionLog, Batch, BatchLimits, Operation};
pub use archive::{ArchiveDir, ArchiveSource, StaticArchives};
pub use backend::{
    BatchReport, DpkgBackend, ExecutionReport, Executor, InstallerBackend, RecordingBackend,
    StatusEvent, StatusTracker,
};
pub use config::{Config, ConfigureMode, DpkgConfig, SchedulerConfig};
pub use error::{Error, ErrorClass, Result};
pub use graph::{
    DepKind, DependencyGraph, DesiredAction, InstallState, MultiArch, PackageId, PackageRecord,
    Snapshot, VersionId, VersionRecord,
};
pub use order::{EntryState, TransactionEntry, TransactionList};
pub use progress::{
    CallbackProgress, ExecutionPhase, LogProgress, ProgressEvent, ProgressTracker, SilentProgress,
};
pub use scheduler::{Blocker, OrderResult, PackageManager, Resolution};
pub use version::{DebVersion, VersionConstraint};
