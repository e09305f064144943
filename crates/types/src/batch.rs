// crates/types/src/batch.rs
//! Batches (`ChangeGroup`s): semantic groupings with a collective
//! review lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::{ChangeStatus, Span};
use crate::ids::{ChangeId, GroupId};

/// The editorial operation a batch represents. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperation {
    CopyEditPass,
    Proofreading,
    DevelopmentalFeedback,
    StyleRefinement,
    FactChecking,
    Formatting,
    ContentExpansion,
    ContentReduction,
    Rewriting,
    Custom,
}

impl BatchOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchOperation::CopyEditPass => "copy_edit_pass",
            BatchOperation::Proofreading => "proofreading",
            BatchOperation::DevelopmentalFeedback => "developmental_feedback",
            BatchOperation::StyleRefinement => "style_refinement",
            BatchOperation::FactChecking => "fact_checking",
            BatchOperation::Formatting => "formatting",
            BatchOperation::ContentExpansion => "content_expansion",
            BatchOperation::ContentReduction => "content_reduction",
            BatchOperation::Rewriting => "rewriting",
            BatchOperation::Custom => "custom",
        }
    }
}

/// How members were chosen for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingStrategy {
    Proximity,
    OperationType,
    Semantic,
    TimeWindow,
    Mixed,
    None,
}

/// Document scope a batch applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupScope {
    Paragraph,
    Section,
    Document,
    Selection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPriority {
    High,
    Medium,
    Low,
}

/// Derived batch status: a fold over member change statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Pending,
    Accepted,
    Rejected,
    Mixed,
}

impl GroupStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GroupStatus::Pending)
    }

    /// The fold: all-accepted → Accepted; all-rejected → Rejected; any
    /// pending member alongside any decision → Mixed; disagreeing
    /// decisions → Mixed; else Pending. Superseded members are spent —
    /// they carry no vote — but a batch wholly consumed by supersession
    /// folds to Mixed so it still closes.
    pub fn fold(statuses: impl IntoIterator<Item = ChangeStatus>) -> GroupStatus {
        let mut total = 0usize;
        let mut accepted = 0usize;
        let mut rejected = 0usize;
        let mut pending = 0usize;
        for status in statuses {
            total += 1;
            match status {
                ChangeStatus::Accepted => accepted += 1,
                ChangeStatus::Rejected => rejected += 1,
                ChangeStatus::Pending => pending += 1,
                ChangeStatus::Superseded => {}
            }
        }
        if total == 0 {
            return GroupStatus::Pending;
        }
        if pending > 0 {
            if accepted + rejected > 0 {
                GroupStatus::Mixed
            } else {
                GroupStatus::Pending
            }
        } else if accepted > 0 && rejected == 0 {
            GroupStatus::Accepted
        } else if rejected > 0 && accepted == 0 {
            GroupStatus::Rejected
        } else {
            // Disagreeing decisions, or every member superseded.
            GroupStatus::Mixed
        }
    }
}

/// A semantic grouping of changes reviewed as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeGroup {
    pub group_id: GroupId,
    pub operation_type: BatchOperation,
    pub operation_description: String,
    pub grouping_strategy: GroupingStrategy,
    pub scope: GroupScope,
    /// Hull over member spans.
    pub position_range: Span,
    pub priority: GroupPriority,
    pub status: GroupStatus,
    pub member_ids: Vec<ChangeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_group_id: Option<GroupId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_group_ids: Vec<GroupId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writer_notes: Option<String>,
    pub confidence_level: f64,
    pub created_at: DateTime<Utc>,
}

impl ChangeGroup {
    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.child_group_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChangeStatus::*;

    #[test]
    fn test_fold_all_accepted() {
        assert_eq!(GroupStatus::fold([Accepted, Accepted]), GroupStatus::Accepted);
    }

    #[test]
    fn test_fold_all_rejected() {
        assert_eq!(GroupStatus::fold([Rejected, Rejected, Rejected]), GroupStatus::Rejected);
    }

    #[test]
    fn test_fold_mixed_decisions() {
        assert_eq!(GroupStatus::fold([Accepted, Rejected, Accepted]), GroupStatus::Mixed);
    }

    #[test]
    fn test_fold_pending_with_terminal_is_mixed() {
        assert_eq!(GroupStatus::fold([Accepted, Pending, Pending]), GroupStatus::Mixed);
    }

    #[test]
    fn test_fold_all_pending() {
        assert_eq!(GroupStatus::fold([Pending, Pending]), GroupStatus::Pending);
    }

    #[test]
    fn test_fold_empty_is_pending() {
        assert_eq!(GroupStatus::fold([]), GroupStatus::Pending);
    }

    #[test]
    fn test_fold_superseded_only_is_mixed() {
        assert_eq!(GroupStatus::fold([Superseded, Superseded]), GroupStatus::Mixed);
    }

    #[test]
    fn test_fold_accepted_plus_superseded_is_accepted() {
        // Superseded members are spent; the surviving decisions agree.
        assert_eq!(GroupStatus::fold([Accepted, Superseded]), GroupStatus::Accepted);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn any_status() -> impl Strategy<Value = ChangeStatus> {
            prop_oneof![
                Just(Pending),
                Just(Accepted),
                Just(Rejected),
                Just(Superseded),
            ]
        }

        proptest! {
            #[test]
            fn fold_terminal_iff_some_decision_and_no_undecided_mix(
                statuses in proptest::collection::vec(any_status(), 0..32)
            ) {
                let folded = GroupStatus::fold(statuses.iter().copied());
                let pending = statuses.iter().filter(|s| **s == Pending).count();
                let decided = statuses
                    .iter()
                    .filter(|s| matches!(s, Accepted | Rejected))
                    .count();
                // A batch with undecided members is never unanimously
                // terminal.
                if pending > 0 {
                    prop_assert!(matches!(folded, GroupStatus::Pending | GroupStatus::Mixed));
                }
                // A unanimous verdict requires at least one decision.
                if matches!(folded, GroupStatus::Accepted | GroupStatus::Rejected) {
                    prop_assert!(decided > 0);
                    prop_assert_eq!(pending, 0);
                }
            }

            #[test]
            fn fold_is_order_independent(
                mut statuses in proptest::collection::vec(any_status(), 0..16)
            ) {
                let forward = GroupStatus::fold(statuses.iter().copied());
                statuses.reverse();
                let backward = GroupStatus::fold(statuses.iter().copied());
                prop_assert_eq!(forward, backward);
            }
        }
    }
}
