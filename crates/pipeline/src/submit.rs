// crates/pipeline/src/submit.rs
//! Submission request/result types for the pipeline facade.

use redline_types::{
    Attribution, BatchOperation, BatchingConfig, ChangeId, ConflictResolution, ErrorCode, GroupId,
    SemanticContext, SessionId, SubmissionId,
};
use redline_core::ChangeProposal;
use serde::Serialize;

use crate::producer::AuthContext;

/// Per-submission options. Defaults match the documented behavior:
/// strict validation on, consolidation on, no grouping, priority 3.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub session_id: Option<SessionId>,
    /// Start a session (keyed by `document_key`) when none is given.
    pub create_session: bool,
    pub document_key: Option<String>,
    pub strict_validation: bool,
    pub bypass_validation: bool,
    pub group_changes: bool,
    /// Overrides the pipeline's batching section for this submission.
    pub grouping_config: Option<BatchingConfig>,
    pub editorial_operation: Option<BatchOperation>,
    pub custom_operation_description: Option<String>,
    /// Conversation this submission came out of; copied onto the
    /// attribution when the producer did not set one itself.
    pub conversation_context: Option<String>,
    /// 1 is highest, 5 lowest.
    pub priority: u8,
    pub automated: bool,
    /// Skip governor admission (trusted internal producers only).
    pub force_processing: bool,
    pub consolidation_timeout_ms: Option<u64>,
    pub enable_consolidation: bool,
    /// Producers whose pending changes never conflict with this
    /// submission's.
    pub compatible_plugins: Vec<String>,
    pub conflict_resolution: ConflictResolution,
    pub semantic_context: Option<SemanticContext>,
    pub max_retries: Option<u32>,
    /// Pre-edit document text, when the producer has it (gap filling in
    /// merges, before-text verification).
    pub document_text: Option<String>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            create_session: true,
            document_key: None,
            strict_validation: true,
            bypass_validation: false,
            group_changes: false,
            grouping_config: None,
            editorial_operation: None,
            custom_operation_description: None,
            conversation_context: None,
            priority: 3,
            automated: false,
            force_processing: false,
            consolidation_timeout_ms: None,
            enable_consolidation: true,
            compatible_plugins: Vec::new(),
            conflict_resolution: ConflictResolution::default(),
            semantic_context: None,
            max_retries: None,
            document_text: None,
        }
    }
}

/// One producer submission.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    /// Idempotency key: repeating a submission id returns the recorded
    /// result without re-mutating.
    pub submission_id: SubmissionId,
    pub source: String,
    pub proposals: Vec<ChangeProposal>,
    pub options: SubmitOptions,
    pub attribution: Option<Attribution>,
    pub auth: Option<AuthContext>,
}

impl SubmissionRequest {
    pub fn new(source: impl Into<String>, proposals: Vec<ChangeProposal>) -> Self {
        Self {
            submission_id: SubmissionId::new(),
            source: source.into(),
            proposals,
            options: SubmitOptions::default(),
            attribution: None,
            auth: None,
        }
    }

    pub fn with_options(mut self, options: SubmitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_attribution(mut self, attribution: Attribution) -> Self {
        self.attribution = Some(attribution);
        self
    }

    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = Some(auth);
        self
    }
}

/// A machine-readable per-change failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_id: Option<ChangeId>,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl SubmissionError {
    pub fn new(change_id: Option<ChangeId>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            change_id,
            code: code.as_str().to_string(),
            message: message.into(),
            hint: code.hint().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionWarning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_id: Option<ChangeId>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    EditorialEngine,
    Standard,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationSummary {
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub validation_mode: ValidationMode,
    pub security_checks_enabled: bool,
}

/// What `submit` returns. Partial success is normal: `change_ids` holds
/// what was admitted, `errors` holds per-change failures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub change_ids: Vec<ChangeId>,
    pub errors: Vec<SubmissionError>,
    pub warnings: Vec<SubmissionWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_group_id: Option<GroupId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group_ids: Vec<GroupId>,
    pub validation_summary: ValidationSummary,
}
