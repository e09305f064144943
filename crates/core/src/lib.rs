// crates/core/src/lib.rs
//! Pure engines of the redline pipeline: position algebra, validation and
//! sanitization, consolidation, clustering, batching, and the resource
//! governor.
//!
//! Nothing here touches the filesystem or owns a clock; time enters as
//! arguments so every engine is deterministic under test.

pub mod batch;
pub mod cluster;
pub mod consolidate;
pub mod governor;
pub mod position;
pub mod sanitize;
pub mod validate;

pub use batch::{AutoGrouper, BatchDecision, PartialReview};
pub use cluster::{
    admit_single, centroid_of, cluster_changes, similarity, ClusterSet, ClusterUpdateQueue,
};
pub use consolidate::{
    ConsolidationBudget, IncomingChange, PendingEntry, Resolution, ResolutionContext, Resolved,
    Resolver,
};
pub use governor::{Admission, Preempted, ProducerState, ResourceGovernor, ResourcePool};
pub use position::{AppliedEdit, Translation};
pub use sanitize::{SanitizeOutcome, Sanitizer};
pub use validate::{ChangeProposal, ValidationReport, Validator, Warning};
