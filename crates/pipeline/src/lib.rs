// crates/pipeline/src/lib.rs
//! The redline pipeline facade: submission, consolidation, review,
//! clustering, batching, persistence, and eventing behind one explicit
//! value.
//!
//! There is no global state anywhere in this workspace — embedders
//! construct a [`Pipeline`], hand producers its registration API, and
//! drive it from their own loop via [`Pipeline::tick`].

mod bus;
mod clock;
mod pipeline;
mod producer;
mod scheduler;
mod submit;

pub use bus::{EventBus, Subscription};
pub use clock::{Clock, ManualClock, SystemClock};
pub use pipeline::Pipeline;
pub use producer::{
    AuthContext, ProducerCapabilities, ProducerManifest, ProducerRegistry, ProducerStatus,
};
pub use scheduler::{CancellationToken, Scheduler, Task, TaskKey};
pub use submit::{
    SubmissionError, SubmissionRequest, SubmissionResult, SubmissionWarning, SubmitOptions,
    ValidationMode, ValidationSummary,
};
