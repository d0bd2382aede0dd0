// src/backend/status.rs

//! Back-end status lines and progress accounting
//!
//! dpkg writes machine-readable lines to its status file descriptor:
//!
//! ```text
//! status: libfoo:amd64: half-installed
//! status: libfoo:amd64: error: trying to overwrite '/usr/bin/foo'
//! status: /etc/foo.conf : conffile-prompt : 'old' 'new' 1 1
//! processing: configure: libfoo:amd64
//! ```
//!
//! Each operation walks a package through a known sequence of states. The
//! tracker counts those steps for user-facing progress only; scheduling
//! never depends on them.

use crate::action::Operation;
use crate::progress::ProgressTracker;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

const INSTALL_STATES: &[&str] = &["half-installed", "unpacked"];
const CONFIGURE_STATES: &[&str] = &["unpacked", "half-configured", "installed"];
const REMOVE_STATES: &[&str] = &["half-configured", "half-installed", "config-files"];
const PURGE_STATES: &[&str] = &["config-files", "not-installed"];

/// States a package passes through for an operation
pub fn expected_states(operation: Operation) -> &'static [&'static str] {
    match operation {
        Operation::Install => INSTALL_STATES,
        Operation::Configure => CONFIGURE_STATES,
        Operation::Remove => REMOVE_STATES,
        Operation::Purge => PURGE_STATES,
        Operation::ConfigurePending | Operation::TriggersPending => &[],
    }
}

/// A parsed status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Status { package: String, state: String },
    Error { package: String, message: String },
    ConffilePrompt { path: String, details: String },
    Processing { action: String, target: String },
}

impl StatusEvent {
    /// Parse one line; unknown lines yield `None`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();

        if let Some(rest) = line.strip_prefix("processing: ") {
            let (action, target) = rest.split_once(": ")?;
            return Some(StatusEvent::Processing {
                action: action.trim().to_string(),
                target: target.trim().to_string(),
            });
        }

        let rest = line.strip_prefix("status: ")?;

        if let Some((path, details)) = rest.split_once(" : conffile-prompt : ") {
            return Some(StatusEvent::ConffilePrompt {
                path: path.trim().to_string(),
                details: details.trim().to_string(),
            });
        }

        let (package, tail) = rest.split_once(": ")?;
        let package = package.trim().to_string();
        if let Some(message) = tail.strip_prefix("error: ") {
            return Some(StatusEvent::Error {
                package,
                message: message.trim().to_string(),
            });
        }

        Some(StatusEvent::Status {
            package,
            state: tail.trim().to_string(),
        })
    }
}

/// Tracks expected per-package state transitions and drives progress
pub struct StatusTracker<'a> {
    progress: &'a dyn ProgressTracker,
    expected: HashMap<String, VecDeque<&'static str>>,
    /// Bare name to `name:arch` when the name is unambiguous
    aliases: HashMap<String, Option<String>>,
    errors: Vec<(String, String)>,
    total: u64,
}

impl<'a> StatusTracker<'a> {
    pub fn new(progress: &'a dyn ProgressTracker) -> Self {
        Self {
            progress,
            expected: HashMap::new(),
            aliases: HashMap::new(),
            errors: Vec::new(),
            total: 0,
        }
    }

    /// Register that `package` (as `name:arch`) will go through `operation`
    pub fn expect(&mut self, package: &str, operation: Operation) {
        let states = expected_states(operation);
        self.total += states.len() as u64;
        self.expected
            .entry(package.to_string())
            .or_default()
            .extend(states.iter().copied());

        if let Some((name, _)) = package.split_once(':') {
            self.aliases
                .entry(name.to_string())
                .and_modify(|existing| {
                    if existing.as_deref() != Some(package) {
                        *existing = None;
                    }
                })
                .or_insert_with(|| Some(package.to_string()));
        }
    }

    /// Total number of steps registered so far
    pub fn total_steps(&self) -> u64 {
        self.total
    }

    pub fn errors(&self) -> &[(String, String)] {
        &self.errors
    }

    /// Take the errors reported since the last call
    pub fn take_errors(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.errors)
    }

    pub fn handle_line(&mut self, line: &str) {
        match StatusEvent::parse(line) {
            Some(event) => self.handle(event),
            None => debug!("Ignoring back-end output: {}", line),
        }
    }

    pub fn handle(&mut self, event: StatusEvent) {
        match event {
            StatusEvent::Status { package, state } => self.advance(&package, &state),
            StatusEvent::Error { package, message } => {
                warn!("{}: {}", package, message);
                self.progress.set_message(&format!("Error in {}", package));
                self.errors.push((package, message));
            }
            StatusEvent::ConffilePrompt { path, .. } => {
                self.progress
                    .set_message(&format!("Configuration file prompt for {}", path));
            }
            StatusEvent::Processing { action, target } => {
                debug!("processing {} {}", action, target);
            }
        }
    }

    fn resolve(&self, package: &str) -> Option<String> {
        if self.expected.contains_key(package) {
            return Some(package.to_string());
        }
        self.aliases.get(package).cloned().flatten()
    }

    fn advance(&mut self, package: &str, state: &str) {
        let Some(key) = self.resolve(package) else {
            debug!("Status for unexpected package {}: {}", package, state);
            return;
        };
        let Some(queue) = self.expected.get_mut(&key) else {
            return;
        };
        let Some(position) = queue.iter().position(|s| *s == state) else {
            return;
        };

        let steps = position as u64 + 1;
        queue.drain(..=position);
        self.progress.increment(steps);
        self.progress.set_message(&format!("{}: {}", key, state));
    }
}
