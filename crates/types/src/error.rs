// crates/types/src/error.rs
//! Error taxonomy for the whole pipeline.
//!
//! Every error carries a stable machine-readable code (`ErrorCode`), a
//! human message via `Display`, an optional remediation hint, and the
//! offending change ids where that applies. Stack traces are never
//! embedded.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::change::ChangeStatus;
use crate::ids::{ChangeId, SessionId};

/// Stable machine-readable codes, one per error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Validation
    SchemaInvalid,
    PolicyViolation,
    SensitiveDataRejected,
    Unauthorized,
    // Governor
    RateLimitExceeded,
    QuotaExceeded,
    ResourceExhausted,
    // Consolidation
    ConflictUnresolved,
    OrderingViolation,
    MergeInfeasible,
    TimedOut,
    // Store
    DuplicateId,
    UnknownId,
    IllegalTransition,
    // Persistence
    Corrupt,
    ChecksumMismatch,
    WriteFailed,
    MigrationFailed,
    // Query
    InvalidPredicate,
    UnknownField,
    // System
    Cancelled,
    InternalInvariantViolation,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SchemaInvalid => "schema_invalid",
            ErrorCode::PolicyViolation => "policy_violation",
            ErrorCode::SensitiveDataRejected => "sensitive_data_rejected",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            ErrorCode::QuotaExceeded => "quota_exceeded",
            ErrorCode::ResourceExhausted => "resource_exhausted",
            ErrorCode::ConflictUnresolved => "conflict_unresolved",
            ErrorCode::OrderingViolation => "ordering_violation",
            ErrorCode::MergeInfeasible => "merge_infeasible",
            ErrorCode::TimedOut => "timed_out",
            ErrorCode::DuplicateId => "duplicate_id",
            ErrorCode::UnknownId => "unknown_id",
            ErrorCode::IllegalTransition => "illegal_transition",
            ErrorCode::Corrupt => "corrupt",
            ErrorCode::ChecksumMismatch => "checksum_mismatch",
            ErrorCode::WriteFailed => "write_failed",
            ErrorCode::MigrationFailed => "migration_failed",
            ErrorCode::InvalidPredicate => "invalid_predicate",
            ErrorCode::UnknownField => "unknown_field",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::InternalInvariantViolation => "internal_invariant_violation",
        }
    }

    /// A remediation hint, where one exists.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ErrorCode::RateLimitExceeded => {
                Some("wait for the reported backoff interval before resubmitting")
            }
            ErrorCode::OrderingViolation => {
                Some("accept the change this one depends on first")
            }
            ErrorCode::Unauthorized => Some("register the producer before submitting"),
            ErrorCode::ChecksumMismatch | ErrorCode::Corrupt => {
                Some("recovery will fall back to the previous snapshot")
            }
            _ => None,
        }
    }
}

/// Result of an accept/reject call: whether anything actually changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    /// The record was already in the requested state; no event emitted.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("structurally invalid change: {reason}")]
    SchemaInvalid { reason: String },

    #[error("forbidden content matched rule {rule:?}")]
    PolicyViolation { rule: String },

    #[error("sensitive data rejected by producer policy (rule {rule:?})")]
    SensitiveDataRejected { rule: String },

    #[error("producer {producer:?} is not authorized")]
    Unauthorized { producer: String },
}

impl ValidationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ValidationError::SchemaInvalid { .. } => ErrorCode::SchemaInvalid,
            ValidationError::PolicyViolation { .. } => ErrorCode::PolicyViolation,
            ValidationError::SensitiveDataRejected { .. } => ErrorCode::SensitiveDataRejected,
            ValidationError::Unauthorized { .. } => ErrorCode::Unauthorized,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GovernorError {
    #[error("rate limit exceeded for producer {producer:?}; retry in {backoff_ms} ms")]
    RateLimitExceeded { producer: String, backoff_ms: u64 },

    #[error("quota exceeded for producer {producer:?}")]
    QuotaExceeded { producer: String },

    #[error("resource pool {pool:?} exhausted ({requested} requested, {available} available)")]
    ResourceExhausted {
        pool: String,
        requested: u64,
        available: u64,
    },
}

impl GovernorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GovernorError::RateLimitExceeded { .. } => ErrorCode::RateLimitExceeded,
            GovernorError::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
            GovernorError::ResourceExhausted { .. } => ErrorCode::ResourceExhausted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsolidationError {
    #[error("conflict set {change_ids:?} could not be resolved")]
    ConflictUnresolved { change_ids: Vec<ChangeId> },

    #[error("change {change_id} accepted out of order (depends on {depends_on})")]
    OrderingViolation {
        change_id: ChangeId,
        depends_on: ChangeId,
    },

    #[error("merge infeasible: {reason}")]
    MergeInfeasible { reason: String },

    #[error("consolidation budget of {budget_ms} ms exceeded; degraded to priority resolution")]
    TimedOut { budget_ms: u64 },
}

impl ConsolidationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConsolidationError::ConflictUnresolved { .. } => ErrorCode::ConflictUnresolved,
            ConsolidationError::OrderingViolation { .. } => ErrorCode::OrderingViolation,
            ConsolidationError::MergeInfeasible { .. } => ErrorCode::MergeInfeasible,
            ConsolidationError::TimedOut { .. } => ErrorCode::TimedOut,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("change {0} already exists")]
    DuplicateId(ChangeId),

    #[error("unknown change id {0}")]
    UnknownId(ChangeId),

    #[error("illegal status transition {from} -> {to} for change {change_id}")]
    IllegalTransition {
        change_id: ChangeId,
        from: ChangeStatus,
        to: ChangeStatus,
    },
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::DuplicateId(_) => ErrorCode::DuplicateId,
            StoreError::UnknownId(_) => ErrorCode::UnknownId,
            StoreError::IllegalTransition { .. } => ErrorCode::IllegalTransition,
        }
    }

    pub fn change_id(&self) -> ChangeId {
        match self {
            StoreError::DuplicateId(id)
            | StoreError::UnknownId(id)
            | StoreError::IllegalTransition { change_id: id, .. } => *id,
        }
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("session {session_id} is corrupt: {reason}")]
    Corrupt {
        session_id: SessionId,
        reason: String,
    },

    #[error("checksum mismatch for {path}: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        computed: String,
    },

    #[error("write failed for {path}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("migration from v{from} toward v{to} failed at v{failed_at}: {reason}")]
    MigrationFailed {
        from: u32,
        to: u32,
        failed_at: u32,
        reason: String,
    },

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StateError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StateError::Corrupt { .. } => ErrorCode::Corrupt,
            StateError::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            StateError::WriteFailed { .. } | StateError::Serialize(_) => ErrorCode::WriteFailed,
            StateError::MigrationFailed { .. } => ErrorCode::MigrationFailed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("invalid predicate: {reason}")]
    InvalidPredicate { reason: String },

    #[error("unknown field {field:?}")]
    UnknownField { field: String },
}

impl QueryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            QueryError::InvalidPredicate { .. } => ErrorCode::InvalidPredicate,
            QueryError::UnknownField { .. } => ErrorCode::UnknownField,
        }
    }
}

/// Top-level error for the pipeline facade.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Governor(#[from] GovernorError),

    #[error(transparent)]
    Consolidation(#[from] ConsolidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("operation cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("internal invariant violated: {message}")]
    InternalInvariantViolation { message: String },
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::Validation(e) => e.code(),
            PipelineError::Governor(e) => e.code(),
            PipelineError::Consolidation(e) => e.code(),
            PipelineError::Store(e) => e.code(),
            PipelineError::State(e) => e.code(),
            PipelineError::Query(e) => e.code(),
            PipelineError::Cancelled { .. } => ErrorCode::Cancelled,
            PipelineError::InternalInvariantViolation { .. } => {
                ErrorCode::InternalInvariantViolation
            }
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}
