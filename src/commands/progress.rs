// src/commands/progress.rs
//! Terminal progress for transaction runs
//!
//! An overall bar counts the per-package state changes reported by the
//! back-end, with a status line below showing the current phase or package.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use orderly::{ExecutionPhase, ProgressTracker};
use std::time::Duration;

/// indicatif-backed [`ProgressTracker`]
pub struct CliProgress {
    _multi: MultiProgress,
    overall: ProgressBar,
    status: ProgressBar,
}

impl CliProgress {
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let overall = ProgressBar::new(0);
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{msg} ({pos}/{len}) [{bar:40.green/dim}] {percent}%")
                .map(|style| style.progress_chars("##-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        overall.set_message("Ordering transaction");

        let status = ProgressBar::new_spinner();
        status.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        status.enable_steady_tick(Duration::from_millis(100));

        let overall = multi.add(overall);
        let status = multi.add(status);

        Self {
            _multi: multi,
            overall,
            status,
        }
    }
}

impl ProgressTracker for CliProgress {
    fn set_message(&self, message: &str) {
        self.status.set_message(message.to_string());
    }

    fn increment(&self, amount: u64) {
        self.overall.inc(amount);
    }

    fn set_position(&self, position: u64) {
        self.overall.set_position(position);
    }

    fn set_length(&self, length: u64) {
        self.overall.set_length(length);
    }

    fn position(&self) -> u64 {
        self.overall.position()
    }

    fn length(&self) -> u64 {
        self.overall.length().unwrap_or(0)
    }

    fn finish_with_message(&self, message: &str) {
        self.status.finish_and_clear();
        self.overall.finish_with_message(message.to_string());
    }

    fn finish_with_error(&self, message: &str) {
        self.status.finish_and_clear();
        self.overall.abandon_with_message(message.to_string());
    }

    fn is_finished(&self) -> bool {
        self.overall.is_finished()
    }

    fn set_phase(&self, phase: ExecutionPhase) {
        self.overall.set_message(phase.to_string());
    }
}
