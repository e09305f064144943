// crates/types/src/lib.rs
//! Shared data model for the redline change pipeline.
//!
//! Everything here is plain data: changes, clusters, batches, sessions,
//! events, configuration, and the error taxonomy. No I/O, no engines —
//! those live in `redline-core`, `redline-store`, and `redline-state`.

pub mod batch;
pub mod change;
pub mod cluster;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod session;
pub mod submission;

pub use batch::{
    BatchOperation, ChangeGroup, GroupPriority, GroupScope, GroupStatus, GroupingStrategy,
};
pub use change::{
    Attribution, AuditAction, AuditEntry, Category, Change, ChangeContent, ChangeKind,
    ChangeStatus, Span,
};
pub use cluster::{Centroid, Cluster, ClusterMetrics, ClusterStrategyKind};
pub use config::{
    BackoffStrategy, BatchingConfig, CacheStrategy, ClusteringConfig, ConsolidationConfig,
    GovernorConfig, MemoryConfig, MemoryPressure, PersistenceConfig, PipelineConfig, QueryConfig,
};
pub use error::{
    ConsolidationError, ErrorCode, GovernorError, Outcome, PipelineError, QueryError, StateError,
    StoreError, ValidationError,
};
pub use event::{PipelineEvent, Topic};
pub use ids::{ChangeId, ClusterId, GroupId, SessionId, SnapshotId, SubmissionId};
pub use session::{Session, SessionState, SCHEMA_VERSION};
pub use submission::{
    ChangeIntention, ConflictResolution, ConflictStrategy, ProducerPolicy, SemanticContext,
    SemanticScope,
};
