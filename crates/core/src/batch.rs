// crates/core/src/batch.rs
//! Batch manager: automatic grouping of admitted changes into reviewable
//! `ChangeGroup`s, including hierarchical splitting of oversized groups.
//!
//! Grouping here is pure planning — the pipeline owns applying the
//! resulting groups to the store and emitting `BatchCreated` events.

use chrono::{DateTime, Utc};
use redline_types::{
    BatchOperation, BatchingConfig, Category, Change, ChangeGroup, ChangeId, GroupId,
    GroupPriority, GroupScope, GroupStatus, GroupingStrategy, Span,
};
use tracing::debug;

use crate::position;

/// A reviewer's verdict on one member during partial review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDecision {
    Accept,
    Reject,
}

/// Per-change decisions applied to a batch in one atomic call.
#[derive(Debug, Clone, Default)]
pub struct PartialReview {
    pub decisions: Vec<(ChangeId, BatchDecision)>,
}

impl PartialReview {
    pub fn accept(mut self, id: ChangeId) -> Self {
        self.decisions.push((id, BatchDecision::Accept));
        self
    }

    pub fn reject(mut self, id: ChangeId) -> Self {
        self.decisions.push((id, BatchDecision::Reject));
        self
    }
}

/// Automatic grouping per the configured strategy.
#[derive(Debug, Clone)]
pub struct AutoGrouper {
    config: BatchingConfig,
}

impl AutoGrouper {
    pub fn new(config: BatchingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchingConfig {
        &self.config
    }

    /// Group `changes` under the given operation. Returns every created
    /// group, parents before children.
    pub fn group(
        &self,
        changes: &[&Change],
        operation: BatchOperation,
        description: &str,
        now: DateTime<Utc>,
    ) -> Vec<ChangeGroup> {
        if !self.config.enabled || changes.is_empty() {
            return Vec::new();
        }
        let strategy = self.config.default_strategy;
        let partitions: Vec<Vec<&Change>> = match strategy {
            GroupingStrategy::None => return Vec::new(),
            GroupingStrategy::OperationType => vec![changes.to_vec()],
            GroupingStrategy::Proximity => self.partition_by_proximity(changes),
            GroupingStrategy::TimeWindow => self.partition_by_time(changes),
            GroupingStrategy::Semantic => partition_by_category(changes),
            GroupingStrategy::Mixed => {
                let mut out = Vec::new();
                for semantic in partition_by_category(changes) {
                    out.extend(self.partition_by_proximity(&semantic));
                }
                out
            }
        };

        let mut groups = Vec::new();
        for members in partitions {
            if members.len() < self.config.min_changes_for_group {
                continue;
            }
            self.emit(members, operation, strategy, description, now, &mut groups);
        }
        debug!(
            strategy = ?strategy,
            changes = changes.len(),
            groups = groups.len(),
            "auto-grouping complete"
        );
        groups
    }

    /// Build one group, splitting into a parent plus sibling sub-batches
    /// when the member count exceeds the configured maximum.
    fn emit(
        &self,
        members: Vec<&Change>,
        operation: BatchOperation,
        strategy: GroupingStrategy,
        description: &str,
        now: DateTime<Utc>,
        out: &mut Vec<ChangeGroup>,
    ) {
        let max = self.config.max_changes_per_group.max(1);
        if members.len() <= max {
            out.push(build_group(&members, operation, strategy, description, now));
            return;
        }
        if !self.config.enable_hierarchical_grouping {
            for chunk in members.chunks(max) {
                out.push(build_group(chunk, operation, strategy, description, now));
            }
            return;
        }

        // Parent spans the hull of its children; members live in leaves.
        let mut parent = build_group(&members, operation, strategy, description, now);
        parent.member_ids.clear();
        let parent_id = parent.group_id;

        let mut children = Vec::new();
        for chunk in members.chunks(max) {
            let mut child = build_group(chunk, operation, strategy, description, now);
            child.parent_group_id = Some(parent_id);
            parent.child_group_ids.push(child.group_id);
            children.push(child);
        }
        out.push(parent);
        out.extend(children);
    }

    fn partition_by_proximity<'a>(&self, changes: &[&'a Change]) -> Vec<Vec<&'a Change>> {
        let mut sorted: Vec<&Change> = changes.to_vec();
        sorted.sort_by_key(|c| (c.position.start, c.id));
        let mut partitions: Vec<Vec<&Change>> = Vec::new();
        let mut open: Vec<&Change> = Vec::new();
        for change in sorted {
            let fits = open.last().is_none_or(|last| {
                change.position.start.saturating_sub(last.position.end)
                    <= self.config.proximity_threshold
            });
            if !fits && !open.is_empty() {
                partitions.push(std::mem::take(&mut open));
            }
            open.push(change);
        }
        if !open.is_empty() {
            partitions.push(open);
        }
        partitions
    }

    fn partition_by_time<'a>(&self, changes: &[&'a Change]) -> Vec<Vec<&'a Change>> {
        let mut sorted: Vec<&Change> = changes.to_vec();
        sorted.sort_by_key(|c| (c.timestamp, c.id));
        let window = chrono::Duration::milliseconds(self.config.time_window_ms as i64);
        let mut partitions: Vec<Vec<&Change>> = Vec::new();
        let mut open: Vec<&Change> = Vec::new();
        for change in sorted {
            let fits = open
                .last()
                .is_none_or(|last| change.timestamp - last.timestamp <= window);
            if !fits && !open.is_empty() {
                partitions.push(std::mem::take(&mut open));
            }
            open.push(change);
        }
        if !open.is_empty() {
            partitions.push(open);
        }
        partitions
    }
}

fn partition_by_category<'a>(changes: &[&'a Change]) -> Vec<Vec<&'a Change>> {
    let mut by_category: std::collections::BTreeMap<Category, Vec<&Change>> =
        std::collections::BTreeMap::new();
    for change in changes {
        by_category.entry(change.category).or_default().push(change);
    }
    by_category.into_values().collect()
}

fn build_group(
    members: &[&Change],
    operation: BatchOperation,
    strategy: GroupingStrategy,
    description: &str,
    now: DateTime<Utc>,
) -> ChangeGroup {
    let position_range = position::hull_all(members.iter().map(|c| c.position))
        .unwrap_or(Span::new(0, 0));
    let confidence_level = if members.is_empty() {
        0.0
    } else {
        members.iter().map(|c| c.confidence).sum::<f64>() / members.len() as f64
    };
    ChangeGroup {
        group_id: GroupId::new(),
        operation_type: operation,
        operation_description: description.to_string(),
        grouping_strategy: strategy,
        scope: scope_for(position_range),
        position_range,
        priority: priority_for(confidence_level),
        status: GroupStatus::Pending,
        member_ids: members.iter().map(|c| c.id).collect(),
        parent_group_id: None,
        child_group_ids: Vec::new(),
        writer_notes: None,
        confidence_level,
        created_at: now,
    }
}

fn scope_for(range: Span) -> GroupScope {
    match range.len() {
        0..=200 => GroupScope::Paragraph,
        201..=2000 => GroupScope::Section,
        _ => GroupScope::Document,
    }
}

fn priority_for(confidence: f64) -> GroupPriority {
    if confidence >= 0.85 {
        GroupPriority::High
    } else if confidence >= 0.6 {
        GroupPriority::Medium
    } else {
        GroupPriority::Low
    }
}
