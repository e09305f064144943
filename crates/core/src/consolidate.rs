// crates/core/src/consolidate.rs
//! Multi-producer consolidation: conflict detection and deterministic
//! resolution of overlapping change proposals.
//!
//! The resolver is a pure function over the incoming change, the pending
//! changes it conflicts with, and the submission policies involved. It
//! decides — it never mutates. The pipeline applies the returned
//! `Resolution` to the store and emits events in the documented order.

use chrono::{DateTime, Duration, Utc};
use redline_types::{
    Change, ChangeContent, ChangeId, ConflictResolution, ConflictStrategy, ConsolidationError,
    SemanticContext, Span,
};
use tracing::{debug, warn};

use crate::position;

/// A pending change plus the submission settings it arrived under.
/// Priority and semantics are submission-scoped, so the pipeline keeps
/// them alongside the stored change and hands them back for resolution.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub change: Change,
    pub priority: u8,
    pub resolution: ConflictResolution,
    pub semantic: Option<SemanticContext>,
}

/// The incoming change with its submission settings.
#[derive(Debug, Clone)]
pub struct IncomingChange {
    pub change: Change,
    pub priority: u8,
    pub automated: bool,
    pub resolution: ConflictResolution,
    pub semantic: Option<SemanticContext>,
}

/// Context the pipeline supplies per resolution call.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    /// Pre-edit document text, when the caller has it. Only consulted to
    /// fill gaps between merged spans; merging still works without it.
    pub document: Option<String>,
}

/// Wall-clock budget for one consolidation attempt. When it expires the
/// engine degrades to priority resolution so progress is guaranteed.
#[derive(Debug, Clone, Copy)]
pub struct ConsolidationBudget {
    started: DateTime<Utc>,
    budget_ms: u64,
}

impl ConsolidationBudget {
    pub fn new(started: DateTime<Utc>, budget_ms: u64) -> Self {
        Self { started, budget_ms }
    }

    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        now - self.started >= Duration::milliseconds(self.budget_ms as i64)
    }

    pub fn budget_ms(&self) -> u64 {
        self.budget_ms
    }
}

/// What the pipeline must do with the incoming change.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// No conflicts: insert and emit `ChangeAdmitted`.
    Admit,
    /// Incoming wins: insert it, supersede the losers.
    AdmitSuperseding { losers: Vec<ChangeId> },
    /// An existing change wins: insert incoming already superseded.
    SupersededOnArrival { winner: ChangeId },
    /// Incoming yields quietly (auto-defer): reject with
    /// `DeferredToHigherPriority`.
    Defer { to: ChangeId },
    /// Semantic merge: insert `merged`, supersede every input.
    Merge {
        merged_span: Span,
        merged_content: ChangeContent,
        inputs: Vec<ChangeId>,
    },
    /// Sequential: all changes stay pending, chained in this acceptance
    /// order (each depends on its predecessor).
    Chain { order: Vec<ChangeId> },
    /// UserChoice: no automatic decision; these ids form a conflict group
    /// awaiting explicit accept/reject calls.
    Escalate { conflict_group: Vec<ChangeId> },
}

/// Outcome of `Resolver::resolve`: the resolution plus any warnings
/// (budget degradation) accumulated on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub resolution: Resolution,
    pub warnings: Vec<ConsolidationError>,
}

impl Resolved {
    fn clean(resolution: Resolution) -> Self {
        Self {
            resolution,
            warnings: Vec::new(),
        }
    }
}

pub struct Resolver;

impl Resolver {
    /// Detect which pending changes conflict with `incoming`.
    ///
    /// A conflict is an overlap, or adjacency within the incoming
    /// policy's tolerance between merge-compatible categories.
    pub fn conflicts<'a>(
        incoming: &IncomingChange,
        pending: &'a [PendingEntry],
    ) -> Vec<&'a PendingEntry> {
        let span = incoming.change.position;
        let tolerance = incoming.resolution.overlap_tolerance;
        pending
            .iter()
            .filter(|entry| {
                entry.change.is_pending()
                    && entry.change.session_id == incoming.change.session_id
                    && (position::overlaps(span, entry.change.position)
                        || (position::adjacent(span, entry.change.position, tolerance)
                            && incoming
                                .change
                                .category
                                .merge_compatible(entry.change.category)))
            })
            .collect()
    }

    /// Run the resolution pipeline in its documented order.
    pub fn resolve(
        incoming: &IncomingChange,
        conflicts: &[&PendingEntry],
        ctx: &ResolutionContext,
        budget: ConsolidationBudget,
        now: DateTime<Utc>,
    ) -> Resolved {
        // 1. Early admission.
        if conflicts.is_empty() {
            return Resolved::clean(Resolution::Admit);
        }
        debug!(
            change = %incoming.change.id,
            conflicts = conflicts.len(),
            strategy = ?incoming.resolution.strategy,
            "resolving conflict set"
        );

        // 2. Auto-defer: a polite low-priority producer yields without
        // raising a conflict.
        if incoming.resolution.auto_defer {
            let best_existing = conflicts
                .iter()
                .map(|e| e.priority)
                .min()
                .expect("conflict set is non-empty");
            if incoming.priority > best_existing {
                let to = winner_of(incoming, conflicts, true).expect("non-empty set");
                return Resolved::clean(Resolution::Defer { to });
            }
        }

        // Budget exhausted: degrade to priority resolution, whatever the
        // declared strategy, and say so.
        if budget.expired(now) {
            warn!(
                change = %incoming.change.id,
                budget_ms = budget.budget_ms(),
                "consolidation budget exceeded; degrading to priority resolution"
            );
            let mut resolved = Self::priority_wins(incoming, conflicts);
            resolved.warnings.push(ConsolidationError::TimedOut {
                budget_ms: budget.budget_ms(),
            });
            return resolved;
        }

        match incoming.resolution.strategy {
            ConflictStrategy::PriorityWins => Self::priority_wins(incoming, conflicts),
            ConflictStrategy::AutoMerge => Self::auto_merge(incoming, conflicts, ctx),
            ConflictStrategy::Sequential => Self::sequential(incoming, conflicts),
            ConflictStrategy::UserChoice => Self::user_choice(incoming, conflicts),
        }
    }

    fn priority_wins(incoming: &IncomingChange, conflicts: &[&PendingEntry]) -> Resolved {
        match winner_of(incoming, conflicts, false) {
            None => {
                // Incoming wins: every conflicting change yields.
                let losers = conflicts.iter().map(|e| e.change.id).collect();
                Resolved::clean(Resolution::AdmitSuperseding { losers })
            }
            Some(winner) => Resolved::clean(Resolution::SupersededOnArrival { winner }),
        }
    }

    fn auto_merge(
        incoming: &IncomingChange,
        conflicts: &[&PendingEntry],
        ctx: &ResolutionContext,
    ) -> Resolved {
        match Self::try_merge(incoming, conflicts, ctx) {
            Ok((merged_span, merged_content, inputs)) => Resolved::clean(Resolution::Merge {
                merged_span,
                merged_content,
                inputs,
            }),
            Err(err) => {
                // Infeasible merges fall back to priority resolution so
                // the submission still makes progress; the caller sees
                // why as a warning.
                warn!(change = %incoming.change.id, %err, "merge infeasible");
                let mut resolved = Self::priority_wins(incoming, conflicts);
                resolved.warnings.push(err);
                resolved
            }
        }
    }

    fn try_merge(
        incoming: &IncomingChange,
        conflicts: &[&PendingEntry],
        ctx: &ResolutionContext,
    ) -> Result<(Span, ChangeContent, Vec<ChangeId>), ConsolidationError> {
        let infeasible = |reason: &str| ConsolidationError::MergeInfeasible {
            reason: reason.to_string(),
        };

        if !incoming.resolution.allow_semantic_merge
            || conflicts.iter().any(|e| !e.resolution.allow_semantic_merge)
        {
            return Err(infeasible("every participant must allow semantic merge"));
        }

        // Scope compatibility: word/sentence merge, section/document never.
        let scopes: Vec<_> = std::iter::once(incoming.semantic.as_ref())
            .chain(conflicts.iter().map(|e| e.semantic.as_ref()))
            .map(|s| s.map(|s| s.scope))
            .collect();
        for window in scopes.windows(2) {
            if let (Some(a), Some(b)) = (window[0], window[1]) {
                if !a.mergeable_with(b) {
                    return Err(infeasible("scopes are not merge-compatible"));
                }
            }
        }

        // preserve_* flags must agree across participants.
        let flags: Vec<_> = std::iter::once(incoming.semantic.as_ref())
            .chain(conflicts.iter().map(|e| e.semantic.as_ref()))
            .flatten()
            .map(|s| (s.preserve_formatting, s.preserve_content))
            .collect();
        if flags.windows(2).any(|w| w[0] != w[1]) {
            return Err(infeasible("preserve flags disagree"));
        }

        // Participants in document order; ties by timestamp then id keep
        // the walk deterministic.
        let mut parts: Vec<(&Change, u8)> = Vec::with_capacity(conflicts.len() + 1);
        parts.push((&incoming.change, incoming.priority));
        for entry in conflicts {
            parts.push((&entry.change, entry.priority));
        }
        parts.sort_by_key(|(c, _)| (c.position.start, c.timestamp, c.id));

        let tolerance = incoming.resolution.overlap_tolerance;
        for pair in parts.windows(2) {
            let (a, b) = (pair[0].0.position, pair[1].0.position);
            if position::overlaps(a, b) {
                let overlap = a.end.min(b.end).saturating_sub(b.start.max(a.start));
                if overlap > tolerance {
                    return Err(infeasible("overlap exceeds tolerance"));
                }
            } else if position::distance(a, b) > tolerance {
                return Err(infeasible("gap exceeds tolerance"));
            }
        }

        let merged_span = position::hull_all(parts.iter().map(|(c, _)| c.position))
            .expect("at least one participant");

        // Hull-spanning pre-text: each participant's before, in document
        // order, overlapped prefixes dropped, gaps filled from the
        // document when we have it.
        let mut before = String::new();
        let mut covered_until = merged_span.start;
        for (change, _) in &parts {
            let span = change.position;
            if span.start > covered_until {
                if let Some(doc) = &ctx.document {
                    before.push_str(&slice_chars(doc, covered_until, span.start));
                }
                covered_until = span.start;
            }
            if span.end <= covered_until {
                continue;
            }
            let skip = covered_until.saturating_sub(span.start);
            before.push_str(&skip_chars(&change.content.before, skip));
            covered_until = span.end;
        }

        // `after`: contested character spans belong to the strongest
        // producer, so assign every hull offset its strongest covering
        // participant up front and emit by ownership interval. Ties
        // break like priority resolution (earlier timestamp, then id).
        let outranks = |a: usize, b: usize| -> bool {
            let (ca, pa) = &parts[a];
            let (cb, pb) = &parts[b];
            if pa != pb {
                return pa < pb;
            }
            (ca.timestamp, ca.id) < (cb.timestamp, cb.id)
        };
        let hull_len = (merged_span.end - merged_span.start) as usize;
        let mut owner: Vec<Option<usize>> = vec![None; hull_len];
        for (idx, (change, _)) in parts.iter().enumerate() {
            for offset in change.position.start..change.position.end {
                let slot = (offset - merged_span.start) as usize;
                if owner[slot].is_none_or(|current| outranks(idx, current)) {
                    owner[slot] = Some(idx);
                }
            }
        }
        // A participant's final owned offset also carries the tail of
        // its replacement text, so length-changing replacements survive
        // the split without losing characters.
        let mut last_owned: Vec<Option<u64>> = vec![None; parts.len()];
        for (slot, owned_by) in owner.iter().enumerate() {
            if let Some(idx) = *owned_by {
                last_owned[idx] = Some(merged_span.start + slot as u64);
            }
        }

        // Zero-width participants (pure insertions) own no characters
        // but still contribute their text at their caret offset.
        let mut inserts: Vec<(u64, usize)> = parts
            .iter()
            .enumerate()
            .filter(|(_, (change, _))| change.position.is_empty())
            .map(|(idx, (change, _))| (change.position.start, idx))
            .collect();
        inserts.sort_unstable();
        let mut inserts = inserts.into_iter().peekable();

        let mut after = String::new();
        let mut slot = 0usize;
        while slot < hull_len {
            let run_owner = owner[slot];
            let run_start = slot;
            while slot < hull_len && owner[slot] == run_owner {
                slot += 1;
            }
            let rs = merged_span.start + run_start as u64;
            let re = merged_span.start + slot as u64;
            while let Some(&(at, idx)) = inserts.peek() {
                if at > rs {
                    break;
                }
                after.push_str(&parts[idx].0.content.after);
                inserts.next();
            }
            match run_owner {
                Some(idx) => {
                    let (change, _) = &parts[idx];
                    let span = change.position;
                    let text = &change.content.after;
                    let text_len = text.chars().count() as u64;
                    let from = (rs - span.start).min(text_len);
                    let to = if last_owned[idx] == Some(re - 1) {
                        text_len.saturating_sub(span.end.saturating_sub(re))
                    } else {
                        re - span.start
                    }
                    .clamp(from, text_len);
                    after.push_str(&slice_chars(text, from, to));
                }
                None => {
                    if let Some(doc) = &ctx.document {
                        after.push_str(&slice_chars(doc, rs, re));
                    }
                }
            }
        }
        for (_, idx) in inserts {
            after.push_str(&parts[idx].0.content.after);
        }

        let inputs = parts.iter().map(|(c, _)| c.id).collect();
        Ok((merged_span, ChangeContent::new(before, after), inputs))
    }

    fn sequential(incoming: &IncomingChange, conflicts: &[&PendingEntry]) -> Resolved {
        let mut order: Vec<(u8, DateTime<Utc>, ChangeId)> = conflicts
            .iter()
            .map(|e| (e.priority, e.change.timestamp, e.change.id))
            .collect();
        order.push((
            incoming.priority,
            incoming.change.timestamp,
            incoming.change.id,
        ));
        order.sort();
        Resolved::clean(Resolution::Chain {
            order: order.into_iter().map(|(_, _, id)| id).collect(),
        })
    }

    fn user_choice(incoming: &IncomingChange, conflicts: &[&PendingEntry]) -> Resolved {
        let mut conflict_group: Vec<ChangeId> =
            conflicts.iter().map(|e| e.change.id).collect();
        conflict_group.push(incoming.change.id);
        conflict_group.sort();
        Resolved::clean(Resolution::Escalate { conflict_group })
    }
}

/// The strongest change in `{incoming} ∪ conflicts`, or `None` when the
/// incoming change itself wins. Ties break by higher semantic confidence,
/// earlier timestamp, then lexicographic id.
///
/// `existing_only` restricts the field to the existing conflict set (used
/// by auto-defer, where incoming has already yielded).
fn winner_of(
    incoming: &IncomingChange,
    conflicts: &[&PendingEntry],
    existing_only: bool,
) -> Option<ChangeId> {
    #[derive(PartialEq)]
    struct Rank {
        priority: u8,
        confidence: f64,
        timestamp: DateTime<Utc>,
        id: ChangeId,
    }

    impl Rank {
        fn beats(&self, other: &Rank) -> bool {
            if self.priority != other.priority {
                return self.priority < other.priority;
            }
            if self.confidence != other.confidence {
                return self.confidence > other.confidence;
            }
            if self.timestamp != other.timestamp {
                return self.timestamp < other.timestamp;
            }
            self.id < other.id
        }
    }

    let rank_of = |change: &Change, priority: u8, semantic: Option<&SemanticContext>| Rank {
        priority,
        confidence: semantic.map(|s| s.confidence).unwrap_or(change.confidence),
        timestamp: change.timestamp,
        id: change.id,
    };

    let mut best: Option<Rank> = None;
    for entry in conflicts {
        let rank = rank_of(&entry.change, entry.priority, entry.semantic.as_ref());
        if best.as_ref().is_none_or(|b| rank.beats(b)) {
            best = Some(rank);
        }
    }
    let best_existing = best.expect("conflict set is non-empty");

    if existing_only {
        return Some(best_existing.id);
    }

    let incoming_rank = rank_of(
        &incoming.change,
        incoming.priority,
        incoming.semantic.as_ref(),
    );
    if incoming_rank.beats(&best_existing) {
        None
    } else {
        Some(best_existing.id)
    }
}

/// Characters `[from, to)` of `text` counted in scalar values.
fn slice_chars(text: &str, from: u64, to: u64) -> String {
    text.chars()
        .skip(from as usize)
        .take((to - from) as usize)
        .collect()
}

fn skip_chars(text: &str, skip: u64) -> String {
    text.chars().skip(skip as usize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use redline_types::{Category, ChangeKind, SemanticScope, SessionId};

    fn ts(seconds: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, seconds).unwrap()
    }

    fn change(
        session: SessionId,
        start: u64,
        end: u64,
        before: &str,
        after: &str,
        confidence: f64,
        at: DateTime<Utc>,
    ) -> Change {
        Change::new(
            session,
            ChangeKind::Replace,
            Span::new(start, end),
            ChangeContent::new(before, after),
            Category::Grammar,
            "producer",
            confidence,
            at,
        )
    }

    fn incoming(change: Change, priority: u8, strategy: ConflictStrategy) -> IncomingChange {
        IncomingChange {
            change,
            priority,
            automated: false,
            resolution: ConflictResolution {
                strategy,
                ..Default::default()
            },
            semantic: None,
        }
    }

    fn pending(change: Change, priority: u8) -> PendingEntry {
        PendingEntry {
            change,
            priority,
            resolution: ConflictResolution::default(),
            semantic: None,
        }
    }

    fn fresh_budget() -> ConsolidationBudget {
        ConsolidationBudget::new(ts(0), 250)
    }

    #[test]
    fn test_no_conflicts_is_early_admission() {
        let session = SessionId::new();
        let inc = incoming(
            change(session, 0, 5, "hello", "Hello", 0.9, ts(1)),
            2,
            ConflictStrategy::PriorityWins,
        );
        let existing = [pending(change(session, 100, 105, "world", "World", 0.9, ts(0)), 2)];
        let found = Resolver::conflicts(&inc, &existing);
        assert!(found.is_empty());
        let resolved = Resolver::resolve(&inc, &found, &Default::default(), fresh_budget(), ts(1));
        assert_eq!(resolved.resolution, Resolution::Admit);
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn test_overlap_is_a_conflict_regardless_of_category() {
        let session = SessionId::new();
        let mut existing_change = change(session, 10, 15, "world", "Earth", 0.8, ts(0));
        existing_change.category = Category::Structure;
        let inc = incoming(
            change(session, 12, 18, "rld, h", "RLD, H", 0.9, ts(1)),
            1,
            ConflictStrategy::PriorityWins,
        );
        let existing = [pending(existing_change, 2)];
        assert_eq!(Resolver::conflicts(&inc, &existing).len(), 1);
    }

    #[test]
    fn test_adjacent_conflict_requires_mergeable_categories() {
        let session = SessionId::new();
        let mut structural = change(session, 16, 20, "abcd", "dcba", 0.8, ts(0));
        structural.category = Category::Structure;
        let inc = incoming(
            change(session, 10, 15, "world", "Earth", 0.9, ts(1)),
            1,
            ConflictStrategy::PriorityWins,
        );
        // Gap of 1 char, tolerance 2 — but grammar and structure do not merge.
        let existing = [pending(structural, 2)];
        assert!(Resolver::conflicts(&inc, &existing).is_empty());

        let grammar = change(session, 16, 20, "abcd", "dcba", 0.8, ts(0));
        let existing = [pending(grammar, 2)];
        assert_eq!(Resolver::conflicts(&inc, &existing).len(), 1);
    }

    #[test]
    fn test_priority_wins_incoming_wins() {
        // End-to-end scenario: producer A (priority 2) holds [10,15);
        // producer B (priority 1) submits overlapping [12,18).
        let session = SessionId::new();
        let a = change(session, 10, 15, "world", "Earth", 0.8, ts(0));
        let a_id = a.id;
        let inc = incoming(
            change(session, 12, 18, "rld, h", "RLD, H", 0.9, ts(1)),
            1,
            ConflictStrategy::PriorityWins,
        );
        let existing = [pending(a, 2)];
        let found = Resolver::conflicts(&inc, &existing);
        let resolved = Resolver::resolve(&inc, &found, &Default::default(), fresh_budget(), ts(1));
        assert_eq!(
            resolved.resolution,
            Resolution::AdmitSuperseding { losers: vec![a_id] }
        );
    }

    #[test]
    fn test_priority_wins_existing_wins() {
        let session = SessionId::new();
        let strong = change(session, 10, 15, "world", "Earth", 0.8, ts(0));
        let strong_id = strong.id;
        let inc = incoming(
            change(session, 12, 18, "rld, h", "RLD, H", 0.9, ts(1)),
            4,
            ConflictStrategy::PriorityWins,
        );
        let existing = [pending(strong, 1)];
        let found = Resolver::conflicts(&inc, &existing);
        let resolved = Resolver::resolve(&inc, &found, &Default::default(), fresh_budget(), ts(1));
        assert_eq!(
            resolved.resolution,
            Resolution::SupersededOnArrival { winner: strong_id }
        );
    }

    #[test]
    fn test_priority_tie_broken_by_confidence_then_time() {
        let session = SessionId::new();
        let weaker = change(session, 10, 15, "world", "Earth", 0.6, ts(0));
        let inc = incoming(
            change(session, 12, 18, "rld, h", "RLD, H", 0.9, ts(1)),
            2,
            ConflictStrategy::PriorityWins,
        );
        let existing = [pending(weaker, 2)];
        let found = Resolver::conflicts(&inc, &existing);
        let resolved = Resolver::resolve(&inc, &found, &Default::default(), fresh_budget(), ts(1));
        // Same priority; incoming has higher confidence.
        assert!(matches!(
            resolved.resolution,
            Resolution::AdmitSuperseding { .. }
        ));

        // Equal confidence: earlier timestamp wins.
        let equal = change(session, 10, 15, "world", "Earth", 0.9, ts(0));
        let equal_id = equal.id;
        let existing = [pending(equal, 2)];
        let found = Resolver::conflicts(&inc, &existing);
        let resolved = Resolver::resolve(&inc, &found, &Default::default(), fresh_budget(), ts(1));
        assert_eq!(
            resolved.resolution,
            Resolution::SupersededOnArrival { winner: equal_id }
        );
    }

    #[test]
    fn test_auto_defer_yields_to_higher_priority() {
        let session = SessionId::new();
        let strong = change(session, 10, 15, "world", "Earth", 0.8, ts(0));
        let strong_id = strong.id;
        let mut inc = incoming(
            change(session, 12, 18, "rld, h", "RLD, H", 0.9, ts(1)),
            3,
            ConflictStrategy::PriorityWins,
        );
        inc.resolution.auto_defer = true;
        let existing = [pending(strong, 1)];
        let found = Resolver::conflicts(&inc, &existing);
        let resolved = Resolver::resolve(&inc, &found, &Default::default(), fresh_budget(), ts(1));
        assert_eq!(resolved.resolution, Resolution::Defer { to: strong_id });
    }

    #[test]
    fn test_auto_defer_does_not_fire_at_equal_priority() {
        let session = SessionId::new();
        let peer = change(session, 10, 15, "world", "Earth", 0.5, ts(0));
        let mut inc = incoming(
            change(session, 12, 18, "rld, h", "RLD, H", 0.9, ts(1)),
            2,
            ConflictStrategy::PriorityWins,
        );
        inc.resolution.auto_defer = true;
        let existing = [pending(peer, 2)];
        let found = Resolver::conflicts(&inc, &existing);
        let resolved = Resolver::resolve(&inc, &found, &Default::default(), fresh_budget(), ts(1));
        assert!(matches!(
            resolved.resolution,
            Resolution::AdmitSuperseding { .. }
        ));
    }

    fn mergeable(change: Change, priority: u8) -> PendingEntry {
        PendingEntry {
            change,
            priority,
            resolution: ConflictResolution {
                strategy: ConflictStrategy::AutoMerge,
                allow_semantic_merge: true,
                ..Default::default()
            },
            semantic: Some(SemanticContext {
                scope: SemanticScope::Sentence,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_auto_merge_of_adjacent_grammar_fixes() {
        // End-to-end scenario: [30,35) and [36,40), both grammar, both
        // allow merge, tolerance 2, sentence scope.
        let session = SessionId::new();
        let first = change(session, 30, 35, "teh q", "the q", 0.9, ts(0));
        let first_id = first.id;
        let second = change(session, 36, 40, "wick", "uick", 0.8, ts(1));
        let second_id = second.id;

        let mut inc = IncomingChange {
            change: second,
            priority: 2,
            automated: false,
            resolution: ConflictResolution {
                strategy: ConflictStrategy::AutoMerge,
                allow_semantic_merge: true,
                overlap_tolerance: 2,
                ..Default::default()
            },
            semantic: Some(SemanticContext {
                scope: SemanticScope::Sentence,
                ..Default::default()
            }),
        };
        inc.change.category = Category::Grammar;

        let existing = [mergeable(first, 2)];
        let found = Resolver::conflicts(&inc, &existing);
        assert_eq!(found.len(), 1);
        let resolved = Resolver::resolve(&inc, &found, &Default::default(), fresh_budget(), ts(1));
        match resolved.resolution {
            Resolution::Merge {
                merged_span,
                merged_content,
                inputs,
            } => {
                assert_eq!(merged_span, Span::new(30, 40));
                assert_eq!(merged_content.before, "teh qwick");
                assert_eq!(merged_content.after, "the quick");
                assert_eq!(inputs, vec![first_id, second_id]);
            }
            other => panic!("expected merge, got {other:?}"),
        }
    }

    #[test]
    fn test_auto_merge_fills_gap_from_document() {
        let session = SessionId::new();
        let doc: String = (0..50).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let first = change(session, 30, 35, "efghi", "EFGHI", 0.9, ts(0));
        let inc = IncomingChange {
            change: change(session, 36, 40, "klmn", "KLMN", 0.8, ts(1)),
            priority: 2,
            automated: false,
            resolution: ConflictResolution {
                strategy: ConflictStrategy::AutoMerge,
                allow_semantic_merge: true,
                overlap_tolerance: 2,
                ..Default::default()
            },
            semantic: None,
        };
        let existing = [mergeable(first, 2)];
        let found = Resolver::conflicts(&inc, &existing);
        let ctx = ResolutionContext {
            document: Some(doc),
        };
        let resolved = Resolver::resolve(&inc, &found, &ctx, fresh_budget(), ts(1));
        match resolved.resolution {
            Resolution::Merge { merged_content, .. } => {
                // Position 35 is 'j' in the generated alphabet document.
                assert_eq!(merged_content.before, "efghijklmn");
                assert_eq!(merged_content.after, "EFGHIjKLMN");
            }
            other => panic!("expected merge, got {other:?}"),
        }
    }

    #[test]
    fn test_auto_merge_overlap_strongest_owns_contested_span() {
        // The later-positioned participant carries the stronger
        // priority: the contested characters render exactly once, from
        // the stronger producer.
        let session = SessionId::new();
        let weak = change(session, 10, 15, "aaaaa", "AAAA", 0.8, ts(0));
        let weak_id = weak.id;
        let inc = IncomingChange {
            change: change(session, 13, 18, "aabbb", "BBBBBB", 0.9, ts(1)),
            priority: 1,
            automated: false,
            resolution: ConflictResolution {
                strategy: ConflictStrategy::AutoMerge,
                allow_semantic_merge: true,
                overlap_tolerance: 2,
                ..Default::default()
            },
            semantic: Some(SemanticContext {
                scope: SemanticScope::Sentence,
                ..Default::default()
            }),
        };
        let inc_id = inc.change.id;

        let existing = [mergeable(weak, 3)];
        let found = Resolver::conflicts(&inc, &existing);
        assert_eq!(found.len(), 1);
        let resolved = Resolver::resolve(&inc, &found, &Default::default(), fresh_budget(), ts(1));
        match resolved.resolution {
            Resolution::Merge {
                merged_span,
                merged_content,
                inputs,
            } => {
                assert_eq!(merged_span, Span::new(10, 18));
                assert_eq!(merged_content.before, "aaaaabbb");
                // The weak participant keeps only its uncontested
                // prefix [10,13); the contested [13,15) belongs to the
                // stronger producer, with no duplicated characters.
                assert_eq!(merged_content.after, "AABBBBBB");
                assert_eq!(merged_content.after.matches('B').count(), 6);
                assert_eq!(merged_content.after.matches('A').count(), 2);
                assert_eq!(inputs, vec![weak_id, inc_id]);
            }
            other => panic!("expected merge, got {other:?}"),
        }
    }

    #[test]
    fn test_auto_merge_refused_without_consent_falls_back() {
        let session = SessionId::new();
        let reluctant = change(session, 30, 35, "abcde", "ABCDE", 0.9, ts(0));
        let inc = IncomingChange {
            change: change(session, 33, 38, "defgh", "DEFGH", 0.8, ts(1)),
            priority: 1,
            automated: false,
            resolution: ConflictResolution {
                strategy: ConflictStrategy::AutoMerge,
                allow_semantic_merge: true,
                ..Default::default()
            },
            semantic: None,
        };
        // Existing change never consented to merging.
        let existing = [pending(reluctant, 2)];
        let found = Resolver::conflicts(&inc, &existing);
        let resolved = Resolver::resolve(&inc, &found, &Default::default(), fresh_budget(), ts(1));
        assert!(matches!(
            resolved.resolution,
            Resolution::AdmitSuperseding { .. }
        ));
        assert!(matches!(
            resolved.warnings[0],
            ConsolidationError::MergeInfeasible { .. }
        ));
    }

    #[test]
    fn test_auto_merge_rejects_document_scope() {
        let session = SessionId::new();
        let mut wide = mergeable(change(session, 30, 35, "abcde", "ABCDE", 0.9, ts(0)), 2);
        wide.semantic = Some(SemanticContext {
            scope: SemanticScope::Document,
            ..Default::default()
        });
        let inc = IncomingChange {
            change: change(session, 36, 40, "fghi", "FGHI", 0.8, ts(1)),
            priority: 2,
            automated: false,
            resolution: ConflictResolution {
                strategy: ConflictStrategy::AutoMerge,
                allow_semantic_merge: true,
                ..Default::default()
            },
            semantic: Some(SemanticContext {
                scope: SemanticScope::Word,
                ..Default::default()
            }),
        };
        let existing = [wide];
        let found = Resolver::conflicts(&inc, &existing);
        let resolved = Resolver::resolve(&inc, &found, &Default::default(), fresh_budget(), ts(1));
        assert!(matches!(
            resolved.warnings[0],
            ConsolidationError::MergeInfeasible { .. }
        ));
    }

    #[test]
    fn test_sequential_orders_by_priority_then_time() {
        let session = SessionId::new();
        let early_low = change(session, 10, 15, "aaaaa", "AAAAA", 0.5, ts(0));
        let early_low_id = early_low.id;
        let late_high = change(session, 12, 17, "ccccc", "CCCCC", 0.5, ts(2));
        let late_high_id = late_high.id;
        let inc = incoming(
            change(session, 11, 16, "bbbbb", "BBBBB", 0.5, ts(1)),
            2,
            ConflictStrategy::Sequential,
        );
        let inc_id = inc.change.id;
        let existing = [pending(early_low, 3), pending(late_high, 1)];
        let found = Resolver::conflicts(&inc, &existing);
        let resolved = Resolver::resolve(&inc, &found, &Default::default(), fresh_budget(), ts(2));
        assert_eq!(
            resolved.resolution,
            Resolution::Chain {
                order: vec![late_high_id, inc_id, early_low_id]
            }
        );
    }

    #[test]
    fn test_user_choice_escalates_whole_set() {
        let session = SessionId::new();
        let a = change(session, 10, 15, "aaaaa", "AAAAA", 0.5, ts(0));
        let a_id = a.id;
        let inc = incoming(
            change(session, 12, 17, "bbbbb", "BBBBB", 0.5, ts(1)),
            2,
            ConflictStrategy::UserChoice,
        );
        let inc_id = inc.change.id;
        let existing = [pending(a, 2)];
        let found = Resolver::conflicts(&inc, &existing);
        let resolved = Resolver::resolve(&inc, &found, &Default::default(), fresh_budget(), ts(1));
        match resolved.resolution {
            Resolution::Escalate { conflict_group } => {
                let mut expected = vec![a_id, inc_id];
                expected.sort();
                assert_eq!(conflict_group, expected);
            }
            other => panic!("expected escalation, got {other:?}"),
        }
    }

    #[test]
    fn test_expired_budget_degrades_to_priority_wins() {
        let session = SessionId::new();
        let a = change(session, 10, 15, "aaaaa", "AAAAA", 0.5, ts(0));
        let inc = incoming(
            change(session, 12, 17, "bbbbb", "BBBBB", 0.9, ts(1)),
            1,
            ConflictStrategy::UserChoice,
        );
        let existing = [pending(a, 2)];
        let found = Resolver::conflicts(&inc, &existing);
        let stale = ConsolidationBudget::new(ts(0), 250);
        // 10 seconds later: far past the 250 ms budget.
        let resolved = Resolver::resolve(&inc, &found, &Default::default(), stale, ts(10));
        assert!(matches!(
            resolved.resolution,
            Resolution::AdmitSuperseding { .. }
        ));
        assert_eq!(
            resolved.warnings,
            vec![ConsolidationError::TimedOut { budget_ms: 250 }]
        );
    }
}
