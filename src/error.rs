// src/error.rs

use crate::graph::DepKind;
use thiserror::Error;

/// Broad classes of failure a transaction can end with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// An ordering invariant was violated; indicates a bug
    FatalInternal,
    /// A correct refusal (essential package removal without override)
    FatalPolicy,
    /// Required input is missing or the run was interrupted; resumable
    Incomplete,
    /// A dependency or conflict could not be resolved
    Unsatisfiable,
    /// I/O, configuration, snapshot or back-end failures
    Environment,
}

/// Core error types for orderly
#[derive(Error, Debug)]
pub enum Error {
    /// Internal ordering or bookkeeping error
    #[error("Internal error: {0}")]
    Internal(String),

    /// A bounded scheduler loop ran out of iterations
    #[error("Internal error: loop limit of {limit} reached in {phase} for {package}, aborting")]
    LoopLimit {
        package: String,
        phase: String,
        limit: u64,
    },

    /// Obligation nesting exceeded the configured depth
    #[error("Internal error: obligation depth limit of {limit} reached at {package}")]
    DepthLimit { package: String, limit: usize },

    /// Illegal entry state transition
    #[error("Internal error: illegal state transition {from} -> {to} for {package}")]
    IllegalTransition {
        package: String,
        from: String,
        to: String,
    },

    /// Removing an essential package needs an explicit override
    #[error(
        "This installation run will require temporarily removing the essential package {package} \
         due to a {kind} loop with {required_by}. Set scheduler.force_loop_break to allow it"
    )]
    EssentialRemoval {
        package: String,
        required_by: String,
        kind: DepKind,
    },

    /// A pre-dependency could not be brought into a configured state
    #[error("Couldn't configure pre-depend {target} for {package}, probably a dependency cycle")]
    Unsatisfiable {
        package: String,
        target: String,
        kind: DepKind,
    },

    /// A package could not be configured in the final sweep
    #[error("Could not configure '{package}': {kind} on {target} cannot be satisfied")]
    Unconfigurable {
        package: String,
        target: String,
        kind: DepKind,
    },

    /// No archive is available for a package that must be unpacked
    #[error("No archive available for {0}")]
    MissingArchive(String),

    /// Operator requested cancellation
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// The installer back-end reported a failed batch
    #[error("Installer back-end failed during {operation}: {message}")]
    Backend { operation: String, message: String },

    /// Invalid version string
    #[error("Invalid version '{0}': {1}")]
    InvalidVersion(String, String),

    /// Malformed relationship field or snapshot content
    #[error("Parse error: {0}")]
    Parse(String),

    /// Package lookup failed
    #[error("Unknown package: {0}")]
    UnknownPackage(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Snapshot (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map this error onto the transaction failure taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Internal(_)
            | Error::LoopLimit { .. }
            | Error::DepthLimit { .. }
            | Error::IllegalTransition { .. } => ErrorClass::FatalInternal,
            Error::EssentialRemoval { .. } => ErrorClass::FatalPolicy,
            Error::MissingArchive(_) | Error::Cancelled(_) => ErrorClass::Incomplete,
            Error::Unsatisfiable { .. } | Error::Unconfigurable { .. } => {
                ErrorClass::Unsatisfiable
            }
            Error::Backend { .. }
            | Error::InvalidVersion(..)
            | Error::Parse(_)
            | Error::UnknownPackage(_)
            | Error::Config(_)
            | Error::InvalidConfig(_)
            | Error::Json(_)
            | Error::Io(_) => ErrorClass::Environment,
        }
    }

    /// Whether a caller may try another alternative after this error
    pub(crate) fn is_local(&self) -> bool {
        self.class() == ErrorClass::Unsatisfiable
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using orderly's Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(Error::internal("x").class(), ErrorClass::FatalInternal);
        assert_eq!(Error::Cancelled("unpack".into()).class(), ErrorClass::Incomplete);
        assert_eq!(
            Error::MissingArchive("a:amd64".into()).class(),
            ErrorClass::Incomplete
        );

        let policy = Error::EssentialRemoval {
            package: "libc6:amd64".into(),
            required_by: "newlibc:amd64".into(),
            kind: DepKind::Conflicts,
        };
        assert_eq!(policy.class(), ErrorClass::FatalPolicy);
        assert!(!policy.is_local());

        let unsat = Error::Unsatisfiable {
            package: "a:amd64".into(),
            target: "b".into(),
            kind: DepKind::PreDepends,
        };
        assert!(unsat.is_local());
        assert!(unsat.to_string().contains("probably a dependency cycle"));
    }
}
