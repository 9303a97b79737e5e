//! Jail Error Types
//!
//! Per-tenant failures are values, not panics: every step of a tenant's
//! reconciliation converts its error into a [`FailureReason`] that ends up in
//! the run summary. Only [`ReconcileError`] aborts a whole run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tenant input that can never be acted on until an operator fixes it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid login name {login:?}: {reason}")]
    InvalidLoginName { login: String, reason: &'static str },

    #[error("invalid document root {path:?}: {reason}")]
    InvalidDocumentRoot { path: PathBuf, reason: &'static str },

    #[error("tenant {tenant_id} conflicts with another tenant in this snapshot: {reason}")]
    Duplicate { tenant_id: u64, reason: String },
}

/// The filesystem truth for a tenant could not be established
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("cannot inspect {path:?}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("jail root {0:?} exists but is not a directory")]
    NotADirectory(PathBuf),

    #[error("cannot read mount table {path:?}: {message}")]
    MountTable { path: PathBuf, message: String },
}

/// A privileged helper could not be run to completion
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} exited with code {code:?}: {stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("timeout: {program} did not finish within {after:?}")]
    Timeout { program: String, after: Duration },

    #[error("{operation} {path:?} failed: {message}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        message: String,
    },

    /// The tenant's worker task panicked or was cancelled mid-flight
    #[error("tenant worker aborted: {message}")]
    Aborted { message: String },
}

impl ProcessError {
    /// Whether an unmount failure only says the target was not mounted
    pub fn is_not_mounted(&self) -> bool {
        match self {
            ProcessError::Exit { stderr, .. } => {
                let stderr = stderr.to_lowercase();
                stderr.contains("not mounted") || stderr.contains("no mount point specified")
            }
            _ => false,
        }
    }
}

/// The state store rejected a write or delete
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistError {
    #[error("failed to write state for tenant {tenant_id}: {message}")]
    Write { tenant_id: u64, message: String },

    #[error("failed to delete state for tenant {tenant_id}: {message}")]
    Delete { tenant_id: u64, message: String },

    #[error("failed to read state for tenant {tenant_id}: {message}")]
    Read { tenant_id: u64, message: String },

    #[error("failed to list state directory {dir:?}: {message}")]
    List { dir: PathBuf, message: String },
}

/// Why a tenant's reconciliation did not succeed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("ValidationError: {0}")]
    Validation(#[from] ValidationError),

    #[error("ProbeError: {0}")]
    Probe(#[from] ProbeError),

    #[error("ProcessError: {0}")]
    Process(#[from] ProcessError),

    #[error("PersistError: {0}")]
    Persist(#[from] PersistError),
}

impl FailureReason {
    pub fn kind(&self) -> FailureKind {
        match self {
            FailureReason::Validation(_) => FailureKind::Validation,
            FailureReason::Probe(_) => FailureKind::Probe,
            FailureReason::Process(_) => FailureKind::Process,
            FailureReason::Persist(_) => FailureKind::Persist,
        }
    }

    /// Validation failures repeat identically until the tenant data changes
    pub fn is_retriable(&self) -> bool {
        !matches!(self, FailureReason::Validation(_))
    }
}

/// Serializable discriminant of [`FailureReason`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Probe,
    Process,
    Persist,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Validation => write!(f, "validation"),
            FailureKind::Probe => write!(f, "probe"),
            FailureKind::Process => write!(f, "process"),
            FailureKind::Persist => write!(f, "persist"),
        }
    }
}

/// The tenant snapshot could not be obtained
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read tenant snapshot {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse tenant snapshot: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("tenant export command failed: {0}")]
    Command(#[from] ProcessError),
}

/// Errors that abort a whole run
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("FatalConfigError: {0}")]
    FatalConfig(#[from] SourceError),
}

/// Errors taking the run-level lock
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another reconciliation run holds {0:?}")]
    Held(PathBuf),

    #[error("failed to open lock file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
