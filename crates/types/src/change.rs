// crates/types/src/change.rs
//! The `Change` record and its component types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChangeId, GroupId, SessionId};

/// Half-open interval `[start, end)` into the pre-edit document.
///
/// Offsets count Unicode scalar values, not bytes. Every producer and the
/// position model agree on this one stream domain; byte offsets never
/// cross a crate boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

impl Span {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "span start must not exceed end");
        Self { start, end }
    }

    /// Zero-width span at `at` (a pure insertion point).
    pub fn caret(at: u64) -> Self {
        Self { start: at, end: at }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end
    }
}

/// What kind of edit this change proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Delete,
    Replace,
    Move,
}

/// Literal removed and inserted text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeContent {
    pub before: String,
    pub after: String,
}

impl ChangeContent {
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
        }
    }

    pub fn insert(after: impl Into<String>) -> Self {
        Self::new("", after)
    }

    pub fn delete(before: impl Into<String>) -> Self {
        Self::new(before, "")
    }

    /// Net character delta this change applies to the document.
    pub fn char_delta(&self) -> i64 {
        self.after.chars().count() as i64 - self.before.chars().count() as i64
    }

    /// A replace that changes nothing.
    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }
}

/// Editorial category of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Grammar,
    Style,
    Clarity,
    Structure,
    Formatting,
    Spelling,
    Content,
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Grammar,
        Category::Style,
        Category::Clarity,
        Category::Structure,
        Category::Formatting,
        Category::Spelling,
        Category::Content,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Grammar => "grammar",
            Category::Style => "style",
            Category::Clarity => "clarity",
            Category::Structure => "structure",
            Category::Formatting => "formatting",
            Category::Spelling => "spelling",
            Category::Content => "content",
            Category::Other => "other",
        }
    }

    /// Whether two adjacent changes of these categories may be merged into
    /// one. Mechanical fixes merge with each other; structural and
    /// content-level work never merges across category lines.
    pub fn merge_compatible(self, other: Category) -> bool {
        use Category::*;
        if self == other {
            return !matches!(self, Structure | Content);
        }
        matches!(
            (self, other),
            (Grammar, Spelling)
                | (Spelling, Grammar)
                | (Grammar, Style)
                | (Style, Grammar)
                | (Style, Clarity)
                | (Clarity, Style)
                | (Formatting, Style)
                | (Style, Formatting)
        )
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review status of a change. Transitions form a DAG: `Pending` may move
/// to any terminal state; terminal states never revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Pending,
    Accepted,
    Rejected,
    Superseded,
}

impl ChangeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChangeStatus::Pending)
    }

    pub fn can_transition_to(&self, next: ChangeStatus) -> bool {
        matches!(self, ChangeStatus::Pending) && next.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::Accepted => "accepted",
            ChangeStatus::Rejected => "rejected",
            ChangeStatus::Superseded => "superseded",
        }
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a change came from, when an AI producer supplied it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl Attribution {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }
}

/// One entry in a change's append-only audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: AuditAction,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEntry {
    pub fn new(actor: impl Into<String>, action: AuditAction, at: DateTime<Utc>) -> Self {
        Self {
            actor: actor.into(),
            action,
            at,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Submitted,
    Admitted,
    Accepted,
    Rejected,
    Superseded,
    Merged,
    Deferred,
    Redacted,
    Migrated,
}

/// An atomic edit proposal.
///
/// Immutable after admission except for `status`, `group_id`, and appends
/// to `audit`; the store mediates all three.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub session_id: SessionId,
    pub kind: ChangeKind,
    pub position: Span,
    pub content: ChangeContent,
    pub category: Category,
    /// Producer identifier; opaque to the pipeline.
    pub source: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub status: ChangeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<Attribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    /// Set on `Superseded` changes: the change that absorbed this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<ChangeId>,
    /// Sequential-resolution predecessor: this change may only be accepted
    /// after the named change reaches a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<ChangeId>,
    /// UserChoice resolution: all members of the set share this id and
    /// await an explicit external decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_group_id: Option<GroupId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audit: Vec<AuditEntry>,
}

impl Change {
    /// Construct a pending change. Validation of content-vs-kind
    /// consistency happens in `redline-core`; this is just assembly.
    pub fn new(
        session_id: SessionId,
        kind: ChangeKind,
        position: Span,
        content: ChangeContent,
        category: Category,
        source: impl Into<String>,
        confidence: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ChangeId::new(),
            session_id,
            kind,
            position,
            content,
            category,
            source: source.into(),
            confidence,
            timestamp,
            status: ChangeStatus::Pending,
            attribution: None,
            group_id: None,
            superseded_by: None,
            depends_on: None,
            conflict_group_id: None,
            audit: Vec::new(),
        }
    }

    pub fn with_attribution(mut self, attribution: Attribution) -> Self {
        self.attribution = Some(attribution);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == ChangeStatus::Pending
    }

    /// Net character delta applied to the document when accepted.
    pub fn char_delta(&self) -> i64 {
        self.content.char_delta()
    }

    /// Sort key giving the per-session total order.
    pub fn order_key(&self) -> (DateTime<Utc>, ChangeId) {
        (self.timestamp, self.id)
    }
}
