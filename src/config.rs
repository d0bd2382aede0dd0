// src/config.rs
//! Configuration file parsing
//!
//! Supports TOML configuration files with the following sections:
//! - [scheduler] - Immediate configuration policy, loop guards
//! - [dpkg] - Installer back-end binary, options and batching limits
//!
//! Every field has a default, so an empty file (or no file) is valid.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub dpkg: DpkgConfig,
}

/// When the scheduler emits configure actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigureMode {
    /// Configure every package explicitly
    #[default]
    All,
    /// Configure only what ordering requires; the rest via `--configure --pending`
    Smart,
    /// Leave configuration to `--configure --pending`
    No,
}

/// Scheduler section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Configure essential packages and their dependencies right after unpacking
    #[serde(default = "default_true")]
    pub immediate_configure: bool,

    /// Configure every package right after unpacking
    #[serde(default)]
    pub immediate_configure_all: bool,

    /// Allow temporary removal of essential packages to break loops
    #[serde(default)]
    pub force_loop_break: bool,

    /// Use the full unpack order instead of the critical-only order
    #[serde(default = "default_true")]
    pub unpack_all: bool,

    #[serde(default)]
    pub configure: ConfigureMode,

    /// Iteration guard for the per-package resolution loops
    #[serde(default = "default_max_loop_count")]
    pub max_loop_count: u64,

    /// Maximum nesting of scheduler obligations
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            immediate_configure: true,
            immediate_configure_all: false,
            force_loop_break: false,
            unpack_all: true,
            configure: ConfigureMode::All,
            max_loop_count: default_max_loop_count(),
            max_depth: default_max_depth(),
        }
    }
}

/// dpkg back-end section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DpkgConfig {
    /// dpkg binary, looked up in PATH when not absolute
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Extra options passed before the action
    #[serde(default)]
    pub options: Vec<String>,

    /// Root the back-end runs in; stripped from archive paths
    #[serde(default)]
    pub chroot_directory: Option<PathBuf>,

    /// Run trigger processing after every configure batch
    #[serde(default)]
    pub triggers_pending: bool,

    /// Finish with `--configure --pending`; defaults to on unless configure mode is `all`
    #[serde(default)]
    pub configure_pending: Option<bool>,

    /// Pass `--no-triggers` to every invocation
    #[serde(default)]
    pub no_triggers: bool,

    /// Maximum package arguments per invocation
    #[serde(default = "default_max_args")]
    pub max_args: usize,

    /// Maximum argument bytes per invocation
    #[serde(default = "default_max_arg_bytes")]
    pub max_arg_bytes: usize,

    /// Pass `name:arch` instead of bare names
    #[serde(default = "default_true")]
    pub qualify_architecture: bool,

    /// Kill an invocation that runs longer than this
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for DpkgConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            options: Vec::new(),
            chroot_directory: None,
            triggers_pending: false,
            configure_pending: None,
            no_triggers: false,
            max_args: default_max_args(),
            max_arg_bytes: default_max_arg_bytes(),
            qualify_architecture: true,
            timeout_secs: None,
        }
    }
}

impl DpkgConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Upper bound for `scheduler.max_depth`; the scheduler thread stack grows with it
const MAX_DEPTH: usize = 16384;

fn default_true() -> bool {
    true
}

fn default_max_loop_count() -> u64 {
    5000
}

fn default_max_depth() -> usize {
    1024
}

fn default_binary() -> String {
    "dpkg".to_string()
}

fn default_max_args() -> usize {
    8192
}

fn default_max_arg_bytes() -> usize {
    32768
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_loop_count == 0 {
            return Err(Error::InvalidConfig(
                "scheduler.max_loop_count must be at least 1".into(),
            ));
        }
        if self.scheduler.max_depth == 0 || self.scheduler.max_depth > MAX_DEPTH {
            return Err(Error::InvalidConfig(format!(
                "scheduler.max_depth must be between 1 and {}",
                MAX_DEPTH
            )));
        }
        if self.dpkg.max_args == 0 || self.dpkg.max_arg_bytes == 0 {
            return Err(Error::InvalidConfig(
                "dpkg.max_args and dpkg.max_arg_bytes must be positive".into(),
            ));
        }
        if self.dpkg.binary.trim().is_empty() {
            return Err(Error::InvalidConfig("dpkg.binary must not be empty".into()));
        }
        Ok(())
    }

    /// Whether the run ends with `--configure --pending`
    pub fn configure_pending(&self) -> bool {
        self.dpkg
            .configure_pending
            .unwrap_or(self.scheduler.configure != ConfigureMode::All)
    }
}
