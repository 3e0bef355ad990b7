//! GAO-Dev error taxonomy (§7).
//!
//! Every component raises a typed error; the Orchestrator is the only
//! component allowed to translate an error into a plan-level outcome.
//! Errors carry a machine code (`E001`-`E099`) and a human string, in the
//! spirit of the teacher's `StructuredError` (recovery-oriented, agent
//! and human readable).

use std::path::PathBuf;
use thiserror::Error;

pub type GaoResult<T> = Result<T, GaoError>;

/// Top-level error type. Each variant names its §7 kind so callers can
/// branch on `.kind()` without string-matching the message.
#[derive(Error, Debug)]
pub enum GaoError {
    // -- PreconditionError: fatal, the core does not start --------------
    #[error("[E001] GAO-Dev source tree detected at {path}; run this command from your project's working tree instead")]
    SourceTreeDetected { path: PathBuf },

    #[error("[E002] schema version mismatch: store is at {found}, binary expects {expected}")]
    SchemaMismatch { found: String, expected: String },

    #[error("[E003] instance lock held by pid {pid} on {host}; refusing to start")]
    InstanceLocked { pid: u32, host: String },

    #[error("[E004] missing dependency: {0}")]
    MissingDependency(String),

    // -- TransientError: retried with bounded backoff at Orchestrator ---
    #[error("[E010] transient failure in {operation}: {message}")]
    Transient { operation: String, message: String },

    // -- DataInvariantError: rolled back, not retried --------------------
    #[error("[E020] data invariant violated: {message}")]
    DataInvariant { message: String },

    // -- PolicyDenial: non-fatal, recorded, surfaced --------------------
    #[error("[E030] ceremony denied: {reason}")]
    PolicyDenial { reason: String },

    // -- AgentFailure: handled per §4.9 failure policy -------------------
    #[error("[E040] agent call failed: {message}")]
    AgentFailure { message: String },

    #[error("[E041] agent produced unparseable output: {message}")]
    UnparseableOutput { message: String },

    // -- MigrationError: restore backup + checkpoint, refuse to continue -
    #[error("[E050] migration failed at phase '{phase}' (target version {target}): {message}")]
    MigrationFailed {
        phase: String,
        target: String,
        message: String,
    },

    // -- CancellationError: not a failure, reported as outcome cancelled -
    #[error("[E060] orchestration cancelled")]
    Cancelled,

    // -- Infrastructure -------------------------------------------------
    #[error("[E070] sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("[E071] already in a transaction")]
    InTransaction,

    #[error("[E072] git operation '{operation}' failed: {message}")]
    Git { operation: String, message: String },

    #[error("[E073] io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[E074] serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("[E080] plan graph contains a cycle")]
    PlanCycle,

    #[error("[E081] config error: {message}")]
    Config { message: String },
}

/// Coarse-grained error kind, for branching at the Orchestrator boundary
/// per §7's propagation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Precondition,
    Transient,
    DataInvariant,
    PolicyDenial,
    AgentFailure,
    Migration,
    Cancellation,
    Infrastructure,
}

impl GaoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceTreeDetected { .. }
            | Self::SchemaMismatch { .. }
            | Self::InstanceLocked { .. }
            | Self::MissingDependency(_) => ErrorKind::Precondition,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::DataInvariant { .. } => ErrorKind::DataInvariant,
            Self::PolicyDenial { .. } => ErrorKind::PolicyDenial,
            Self::AgentFailure { .. } | Self::UnparseableOutput { .. } => ErrorKind::AgentFailure,
            Self::MigrationFailed { .. } => ErrorKind::Migration,
            Self::Cancelled => ErrorKind::Cancellation,
            Self::Sqlite(_)
            | Self::InTransaction
            | Self::Git { .. }
            | Self::Io(_)
            | Self::Serde(_)
            | Self::PlanCycle
            | Self::Config { .. } => ErrorKind::Infrastructure,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Git {
            operation: operation.into(),
            message: message.into(),
        }
    }
}
