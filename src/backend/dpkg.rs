// src/backend/dpkg.rs

//! dpkg command back-end
//!
//! Each batch becomes one dpkg invocation:
//!
//! | Operation          | Arguments                                          |
//! |--------------------|----------------------------------------------------|
//! | install            | `--unpack --auto-deconfigure <archives>`           |
//! | configure          | `--configure <packages>`                           |
//! | configure-pending  | `--configure --pending`                            |
//! | triggers-pending   | `--triggers-only --pending`                        |
//! | remove / purge     | `--force-depends --force-remove-essential --remove` / `--purge` |
//!
//! Every invocation also gets `--status-fd 1` so per-package state changes
//! arrive on stdout and can drive progress.

use super::{BatchReport, InstallerBackend, StatusTracker};
use crate::action::{ActionItem, Batch, Operation};
use crate::config::DpkgConfig;
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Runs batches through the dpkg binary
#[derive(Debug, Clone)]
pub struct DpkgBackend {
    config: DpkgConfig,
    binary: PathBuf,
}

impl DpkgBackend {
    /// Locate the configured dpkg binary in PATH
    pub fn new(config: &DpkgConfig) -> Result<Self> {
        let binary = which::which(&config.binary).map_err(|e| Error::Backend {
            operation: "locate".to_string(),
            message: format!("{} not found: {}", config.binary, e),
        })?;
        info!("Using dpkg at {}", binary.display());
        Ok(Self::with_binary(config, binary))
    }

    /// Use an explicit binary without looking it up
    pub fn with_binary(config: &DpkgConfig, binary: impl Into<PathBuf>) -> Self {
        Self {
            config: config.clone(),
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn package_arg(&self, graph: &DependencyGraph, item: &ActionItem) -> Option<String> {
        let pkg = item.package()?;
        if self.config.qualify_architecture {
            Some(graph.full_name(pkg))
        } else {
            Some(graph.package(pkg).name.clone())
        }
    }

    /// Archive path as seen from inside the chroot
    fn archive_arg(&self, archive: &Path) -> Result<String> {
        if !archive.is_absolute() {
            return Err(Error::Backend {
                operation: Operation::Install.to_string(),
                message: format!("archive path {} is not absolute", archive.display()),
            });
        }

        let path = match &self.config.chroot_directory {
            Some(root) => match archive.strip_prefix(root) {
                Ok(inner) => Path::new("/").join(inner),
                Err(_) => {
                    return Err(Error::Backend {
                        operation: Operation::Install.to_string(),
                        message: format!(
                            "archive {} is outside the chroot {}",
                            archive.display(),
                            root.display()
                        ),
                    });
                }
            },
            None => archive.to_path_buf(),
        };
        Ok(path.to_string_lossy().into_owned())
    }

    /// Full argument list for one batch, without the binary
    pub fn command_args(&self, graph: &DependencyGraph, batch: &Batch) -> Result<Vec<String>> {
        let mut args: Vec<String> = self.config.options.clone();
        args.push("--status-fd".to_string());
        args.push("1".to_string());
        if self.config.no_triggers {
            args.push("--no-triggers".to_string());
        }

        match batch.operation {
            Operation::Install => {
                args.push("--unpack".to_string());
                args.push("--auto-deconfigure".to_string());
                for item in &batch.items {
                    if let ActionItem::Install { archive, .. } = item {
                        args.push(self.archive_arg(archive)?);
                    }
                }
            }
            Operation::Configure => {
                args.push("--configure".to_string());
                args.extend(batch.items.iter().filter_map(|i| self.package_arg(graph, i)));
            }
            Operation::ConfigurePending => {
                args.push("--configure".to_string());
                args.push("--pending".to_string());
            }
            Operation::TriggersPending => {
                args.push("--triggers-only".to_string());
                args.push("--pending".to_string());
            }
            Operation::Remove | Operation::Purge => {
                args.push("--force-depends".to_string());
                args.push("--force-remove-essential".to_string());
                args.push(if batch.operation == Operation::Purge {
                    "--purge".to_string()
                } else {
                    "--remove".to_string()
                });
                args.extend(batch.items.iter().filter_map(|i| self.package_arg(graph, i)));
            }
        }

        Ok(args)
    }
}

impl InstallerBackend for DpkgBackend {
    fn name(&self) -> &str {
        "dpkg"
    }

    fn arg_size(&self, graph: &DependencyGraph, item: &ActionItem) -> usize {
        match item {
            ActionItem::Install { archive, .. } => archive.as_os_str().len() + 1,
            other => self
                .package_arg(graph, other)
                .map(|a| a.len() + 1)
                .unwrap_or(0),
        }
    }

    fn run_batch(
        &mut self,
        graph: &DependencyGraph,
        batch: &Batch,
        status: &mut StatusTracker<'_>,
    ) -> Result<BatchReport> {
        let args = self.command_args(graph, batch)?;
        debug!("Running {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| Error::Backend {
            operation: batch.operation.to_string(),
            message: "failed to capture dpkg output".to_string(),
        })?;
        let mut stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel();
        let reader = std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(|line| line.ok()) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        let stderr_reader = std::thread::spawn(move || {
            let mut text = String::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_string(&mut text);
            }
            text
        });

        let deadline = self.config.timeout().map(|t| Instant::now() + t);
        loop {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(line) => status.handle_line(&line),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(Error::Backend {
                            operation: batch.operation.to_string(),
                            message: format!(
                                "dpkg timed out after {} seconds",
                                self.config.timeout_secs.unwrap_or_default()
                            ),
                        });
                    }
                }
            }
        }
        let _ = reader.join();

        let exit = match deadline {
            Some(d) => {
                let remaining = d.saturating_duration_since(Instant::now());
                match child.wait_timeout(remaining)? {
                    Some(exit) => exit,
                    None => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(Error::Backend {
                            operation: batch.operation.to_string(),
                            message: "dpkg did not exit after closing its output".to_string(),
                        });
                    }
                }
            }
            None => child.wait()?,
        };

        let stderr_text = stderr_reader.join().unwrap_or_default();
        for line in stderr_text.lines().filter(|l| !l.trim().is_empty()) {
            warn!("dpkg: {}", line);
        }

        let errors = status
            .take_errors()
            .into_iter()
            .map(|(package, message)| format!("{}: {}", package, message))
            .collect();
        Ok(BatchReport {
            exit_code: exit.code(),
            errors,
        })
    }
}
