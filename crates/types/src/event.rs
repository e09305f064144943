// crates/types/src/event.rs
//! Lifecycle events carried by the pipeline's in-process bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChangeId, GroupId, SessionId, SubmissionId};

/// Topic names used for subscription routing. One per event variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    ChangeSubmitted,
    ChangeAdmitted,
    ChangeSuperseded,
    ChangeAccepted,
    ChangeRejected,
    ClusterUpdated,
    BatchCreated,
    BatchFinalized,
    SessionStarted,
    SessionEnded,
    MigrationStarted,
    MigrationCompleted,
    MigrationFailed,
    RollbackCompleted,
    QuotaExceeded,
    Throttled,
    SensitiveDataDetected,
    PolicyViolation,
    OperationCancelled,
    InvariantViolation,
}

/// A lifecycle event. Every variant names its subject and carries the
/// event time assigned by the mutator loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum PipelineEvent {
    ChangeSubmitted {
        session_id: SessionId,
        submission_id: SubmissionId,
        change_id: ChangeId,
        at: DateTime<Utc>,
    },
    ChangeAdmitted {
        session_id: SessionId,
        change_id: ChangeId,
        at: DateTime<Utc>,
    },
    ChangeSuperseded {
        session_id: SessionId,
        change_id: ChangeId,
        superseded_by: ChangeId,
        at: DateTime<Utc>,
    },
    ChangeAccepted {
        session_id: SessionId,
        change_id: ChangeId,
        actor: String,
        at: DateTime<Utc>,
    },
    ChangeRejected {
        session_id: SessionId,
        change_id: ChangeId,
        actor: String,
        at: DateTime<Utc>,
    },
    ClusterUpdated {
        session_id: SessionId,
        cluster_count: usize,
        at: DateTime<Utc>,
    },
    BatchCreated {
        session_id: SessionId,
        group_id: GroupId,
        member_count: usize,
        at: DateTime<Utc>,
    },
    BatchFinalized {
        session_id: SessionId,
        group_id: GroupId,
        at: DateTime<Utc>,
    },
    SessionStarted {
        session_id: SessionId,
        document_key: String,
        at: DateTime<Utc>,
    },
    SessionEnded {
        session_id: SessionId,
        at: DateTime<Utc>,
    },
    MigrationStarted {
        session_id: SessionId,
        from_version: u32,
        to_version: u32,
        at: DateTime<Utc>,
    },
    MigrationCompleted {
        session_id: SessionId,
        from_version: u32,
        to_version: u32,
        at: DateTime<Utc>,
    },
    MigrationFailed {
        session_id: SessionId,
        at_version: u32,
        message: String,
        at: DateTime<Utc>,
    },
    RollbackCompleted {
        session_id: SessionId,
        restored_version: u32,
        at: DateTime<Utc>,
    },
    QuotaExceeded {
        producer: String,
        at: DateTime<Utc>,
    },
    Throttled {
        producer: String,
        backoff_ms: u64,
        at: DateTime<Utc>,
    },
    SensitiveDataDetected {
        producer: String,
        change_id: ChangeId,
        rule: String,
        at: DateTime<Utc>,
    },
    PolicyViolation {
        producer: String,
        rule: String,
        at: DateTime<Utc>,
    },
    OperationCancelled {
        operation: String,
        reason: String,
        at: DateTime<Utc>,
    },
    InvariantViolation {
        message: String,
        at: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// The routing topic for this event.
    pub fn topic(&self) -> Topic {
        match self {
            PipelineEvent::ChangeSubmitted { .. } => Topic::ChangeSubmitted,
            PipelineEvent::ChangeAdmitted { .. } => Topic::ChangeAdmitted,
            PipelineEvent::ChangeSuperseded { .. } => Topic::ChangeSuperseded,
            PipelineEvent::ChangeAccepted { .. } => Topic::ChangeAccepted,
            PipelineEvent::ChangeRejected { .. } => Topic::ChangeRejected,
            PipelineEvent::ClusterUpdated { .. } => Topic::ClusterUpdated,
            PipelineEvent::BatchCreated { .. } => Topic::BatchCreated,
            PipelineEvent::BatchFinalized { .. } => Topic::BatchFinalized,
            PipelineEvent::SessionStarted { .. } => Topic::SessionStarted,
            PipelineEvent::SessionEnded { .. } => Topic::SessionEnded,
            PipelineEvent::MigrationStarted { .. } => Topic::MigrationStarted,
            PipelineEvent::MigrationCompleted { .. } => Topic::MigrationCompleted,
            PipelineEvent::MigrationFailed { .. } => Topic::MigrationFailed,
            PipelineEvent::RollbackCompleted { .. } => Topic::RollbackCompleted,
            PipelineEvent::QuotaExceeded { .. } => Topic::QuotaExceeded,
            PipelineEvent::Throttled { .. } => Topic::Throttled,
            PipelineEvent::SensitiveDataDetected { .. } => Topic::SensitiveDataDetected,
            PipelineEvent::PolicyViolation { .. } => Topic::PolicyViolation,
            PipelineEvent::OperationCancelled { .. } => Topic::OperationCancelled,
            PipelineEvent::InvariantViolation { .. } => Topic::InvariantViolation,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            PipelineEvent::ChangeSubmitted { at, .. }
            | PipelineEvent::ChangeAdmitted { at, .. }
            | PipelineEvent::ChangeSuperseded { at, .. }
            | PipelineEvent::ChangeAccepted { at, .. }
            | PipelineEvent::ChangeRejected { at, .. }
            | PipelineEvent::ClusterUpdated { at, .. }
            | PipelineEvent::BatchCreated { at, .. }
            | PipelineEvent::BatchFinalized { at, .. }
            | PipelineEvent::SessionStarted { at, .. }
            | PipelineEvent::SessionEnded { at, .. }
            | PipelineEvent::MigrationStarted { at, .. }
            | PipelineEvent::MigrationCompleted { at, .. }
            | PipelineEvent::MigrationFailed { at, .. }
            | PipelineEvent::RollbackCompleted { at, .. }
            | PipelineEvent::QuotaExceeded { at, .. }
            | PipelineEvent::Throttled { at, .. }
            | PipelineEvent::SensitiveDataDetected { at, .. }
            | PipelineEvent::PolicyViolation { at, .. }
            | PipelineEvent::OperationCancelled { at, .. }
            | PipelineEvent::InvariantViolation { at, .. } => *at,
        }
    }
}
