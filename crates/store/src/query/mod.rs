// crates/store/src/query/mod.rs
//! Fluent query builder over the change store.
//!
//! A builder accumulates predicates, compiles them into an index plan
//! (intersect the narrowest applicable secondary indices, then apply
//! residual filters to the survivors), and returns cloned records — a
//! consistent snapshot independent of later mutations.

mod aggregate;
mod cache;
mod export;
mod text;

pub use aggregate::{group_by, timeline, GroupByField, GroupStat, GroupedStats, TimelineBucket, TimelinePoint};
pub use cache::QueryCache;
pub use export::{export, from_json, to_csv, to_json, to_markdown, CsvColumn, CsvOptions, ExportFormat};
pub use text::{TextFields, TextQuery};

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use redline_types::{
    AuditAction, Category, Change, ChangeId, ChangeStatus, QueryError, SessionId,
};
use serde::Serialize;
use tracing::debug;

use crate::index::hour_bucket;
use crate::store::ChangeStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl TimeUnit {
    fn duration(&self, n: u32) -> Duration {
        match self {
            TimeUnit::Minutes => Duration::minutes(n as i64),
            TimeUnit::Hours => Duration::hours(n as i64),
            TimeUnit::Days => Duration::days(n as i64),
            TimeUnit::Weeks => Duration::weeks(n as i64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Timestamp,
    Confidence,
    Position,
    Source,
    Category,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDir {
    Asc,
    Desc,
}

/// Accumulated predicates. Serializable so the cache can fingerprint a
/// builder deterministically.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryBuilder {
    session: Option<SessionId>,
    provider: Option<String>,
    model: Option<String>,
    mode: Option<String>,
    source: Option<String>,
    category: Option<Category>,
    status: Option<ChangeStatus>,
    time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    in_last: Option<(u32, TimeUnit)>,
    min_confidence: Option<f64>,
    with_attribution: bool,
    has_constraint: Option<String>,
    with_validation_warnings: bool,
    with_security_threats: bool,
    text: Option<TextQuery>,
    context: Option<String>,
    sort: Option<(SortField, SortDir)>,
    limit: Option<usize>,
    offset: usize,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    pub fn by_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn by_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn by_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn by_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn by_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn by_status(mut self, status: ChangeStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Half-open `[from, to)`.
    pub fn in_time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.time_range = Some((from, to));
        self
    }

    /// Relative window, resolved against `now` at execution time.
    pub fn in_last(mut self, n: u32, unit: TimeUnit) -> Self {
        self.in_last = Some((n, unit));
        self
    }

    pub fn min_confidence(mut self, threshold: f64) -> Self {
        self.min_confidence = Some(threshold);
        self
    }

    pub fn with_attribution(mut self) -> Self {
        self.with_attribution = true;
        self
    }

    pub fn has_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.has_constraint = Some(constraint.into());
        self
    }

    /// Changes admitted with validation warnings on record.
    pub fn with_validation_warnings(mut self) -> Self {
        self.with_validation_warnings = true;
        self
    }

    /// Changes whose audit shows sensitive-data redaction.
    pub fn with_security_threats(mut self) -> Self {
        self.with_security_threats = true;
        self
    }

    pub fn text_contains(mut self, text: TextQuery) -> Self {
        self.text = Some(text);
        self
    }

    /// Substring over attribution context (instructions, prompt,
    /// constraints).
    pub fn context_contains(mut self, needle: impl Into<String>) -> Self {
        self.context = Some(needle.into());
        self
    }

    pub fn sort_by(mut self, field: SortField, dir: SortDir) -> Self {
        self.sort = Some((field, dir));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Stable fingerprint for result caching.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).expect("query builder serializes")
    }

    /// Validate, plan, and run the query.
    pub fn execute(
        &self,
        store: &ChangeStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<Change>, QueryError> {
        self.check()?;

        let candidates = self.plan(store);
        let time_range = self.resolved_time_range(now);

        let mut hits: Vec<&Change> = Vec::new();
        match candidates {
            Some(ids) => {
                for id in ids {
                    if let Ok(change) = store.get(&id) {
                        if self.matches(change, time_range) {
                            hits.push(change);
                        }
                    }
                }
            }
            None => {
                debug!("query has no indexed predicate; full scan");
                hits.extend(store.iter().filter(|c| self.matches(c, time_range)));
            }
        }

        self.sort_hits(&mut hits);
        let out = hits
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(out)
    }

    fn check(&self) -> Result<(), QueryError> {
        if let Some(threshold) = self.min_confidence {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(QueryError::InvalidPredicate {
                    reason: format!("min_confidence {threshold} outside [0, 1]"),
                });
            }
        }
        if let Some((from, to)) = self.time_range {
            if from > to {
                return Err(QueryError::InvalidPredicate {
                    reason: "time range start after end".into(),
                });
            }
        }
        if let Some(text) = &self.text {
            if text.query.is_empty() {
                return Err(QueryError::InvalidPredicate {
                    reason: "empty text query".into(),
                });
            }
        }
        Ok(())
    }

    /// Intersect every applicable index; `None` means nothing indexed
    /// applies and the caller must scan.
    fn plan(&self, store: &ChangeStore) -> Option<BTreeSet<ChangeId>> {
        let indices = store.indices();
        let mut sets: Vec<&BTreeSet<ChangeId>> = Vec::new();
        let empty = BTreeSet::new();

        macro_rules! narrow {
            ($slot:expr, $index:expr) => {
                if let Some(key) = &$slot {
                    sets.push($index.get(key).unwrap_or(&empty));
                }
            };
        }
        narrow!(self.session, indices.by_session);
        narrow!(self.source, indices.by_source);
        narrow!(self.provider, indices.by_provider);
        narrow!(self.model, indices.by_model);
        narrow!(self.mode, indices.by_mode);
        narrow!(self.category, indices.by_category);
        narrow!(self.status, indices.by_status);

        // An explicit time range narrows through the hour-bucket index
        // (union of buckets covering the range).
        let from_hours: Option<BTreeSet<ChangeId>> = self.time_range.map(|(from, to)| {
            indices
                .by_hour
                .range(hour_bucket(from)..=hour_bucket(to))
                .flat_map(|(_, ids)| ids.iter().copied())
                .collect()
        });

        if sets.is_empty() && from_hours.is_none() {
            return None;
        }
        // Smallest set first makes the intersection cheap.
        sets.sort_by_key(|s| s.len());
        let mut result = match from_hours {
            Some(set) => set,
            None => sets.remove(0).clone(),
        };
        for set in &sets {
            result.retain(|id| set.contains(id));
            if result.is_empty() {
                break;
            }
        }
        Some(result)
    }

    fn resolved_time_range(
        &self,
        now: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if let Some(range) = self.time_range {
            return Some(range);
        }
        self.in_last
            .map(|(n, unit)| (now - unit.duration(n), now + Duration::seconds(1)))
    }

    fn matches(&self, change: &Change, time_range: Option<(DateTime<Utc>, DateTime<Utc>)>) -> bool {
        if let Some((from, to)) = time_range {
            if change.timestamp < from || change.timestamp >= to {
                return false;
            }
        }
        if let Some(threshold) = self.min_confidence {
            // At-threshold inclusive.
            if change.confidence < threshold {
                return false;
            }
        }
        if self.with_attribution && change.attribution.is_none() {
            return false;
        }
        if let Some(constraint) = &self.has_constraint {
            let held = change
                .attribution
                .as_ref()
                .is_some_and(|a| a.constraints.iter().any(|c| c == constraint));
            if !held {
                return false;
            }
        }
        if self.with_validation_warnings {
            let flagged = change
                .audit
                .iter()
                .any(|e| e.action == AuditAction::Submitted && e.reason.is_some());
            if !flagged {
                return false;
            }
        }
        if self.with_security_threats {
            let flagged = change.audit.iter().any(|e| e.action == AuditAction::Redacted);
            if !flagged {
                return false;
            }
        }
        if let Some(text) = &self.text {
            if !text.matches_change(change) {
                return false;
            }
        }
        if let Some(needle) = &self.context {
            let found = change.attribution.as_ref().is_some_and(|a| {
                a.instructions
                    .as_deref()
                    .is_some_and(|s| s.contains(needle.as_str()))
                    || a.user_prompt
                        .as_deref()
                        .is_some_and(|s| s.contains(needle.as_str()))
                    || a.constraints.iter().any(|c| c.contains(needle.as_str()))
            });
            if !found {
                return false;
            }
        }
        true
    }

    fn sort_hits(&self, hits: &mut Vec<&Change>) {
        // Secondary key is always (timestamp, id) so results are total-
        // ordered and stable across runs.
        match self.sort {
            None => hits.sort_by_key(|c| c.order_key()),
            Some((field, dir)) => {
                hits.sort_by(|a, b| {
                    let ordering = match field {
                        SortField::Timestamp => a.timestamp.cmp(&b.timestamp),
                        SortField::Confidence => a
                            .confidence
                            .partial_cmp(&b.confidence)
                            .unwrap_or(std::cmp::Ordering::Equal),
                        SortField::Position => a.position.start.cmp(&b.position.start),
                        SortField::Source => a.source.cmp(&b.source),
                        SortField::Category => a.category.cmp(&b.category),
                        SortField::Status => a.status.cmp(&b.status),
                    };
                    let ordering = ordering.then_with(|| a.order_key().cmp(&b.order_key()));
                    match dir {
                        SortDir::Asc => ordering,
                        SortDir::Desc => ordering.reverse(),
                    }
                });
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use redline_types::{Attribution, ChangeContent, ChangeKind, Span};

    pub(crate) fn ts(seconds: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 6, 9, 0, seconds).unwrap()
    }

    pub(crate) fn seeded_store(session: SessionId) -> ChangeStore {
        let mut store = ChangeStore::new();
        let specs = [
            // (start, category, source, confidence, model, after-text)
            (0u64, Category::Grammar, "human", 0.95, None, "their"),
            (50, Category::Grammar, "grammar-bot", 0.9, Some("claude-sonnet"), "there"),
            (100, Category::Style, "style-bot", 0.7, Some("claude-opus"), "vivid prose"),
            (150, Category::Clarity, "style-bot", 0.6, Some("claude-opus"), "clearer text"),
            (200, Category::Spelling, "grammar-bot", 0.99, Some("claude-sonnet"), "receive"),
        ];
        for (i, (start, category, source, confidence, model, after)) in
            specs.into_iter().enumerate()
        {
            let mut change = Change::new(
                session,
                ChangeKind::Replace,
                Span::new(start, start + 5),
                ChangeContent::new("aaaaa", after),
                category,
                source,
                confidence,
                ts(i as u32),
            );
            if let Some(model) = model {
                change.attribution = Some(
                    Attribution::new("anthropic", model).with_mode("proofread"),
                );
            }
            store.insert(change).unwrap();
        }
        store
    }

    #[test]
    fn test_by_source_uses_index() {
        let session = SessionId::new();
        let store = seeded_store(session);
        let hits = QueryBuilder::new()
            .by_source("style-bot")
            .execute(&store, ts(100))
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|c| c.source == "style-bot"));
    }

    #[test]
    fn test_intersection_of_predicates() {
        let session = SessionId::new();
        let store = seeded_store(session);
        let hits = QueryBuilder::new()
            .by_source("grammar-bot")
            .by_category(Category::Spelling)
            .execute(&store, ts(100))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content.after, "receive");
    }

    #[test]
    fn test_by_model_and_provider() {
        let session = SessionId::new();
        let store = seeded_store(session);
        let hits = QueryBuilder::new()
            .by_provider("anthropic")
            .by_model("claude-opus")
            .execute(&store, ts(100))
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_min_confidence_inclusive_at_threshold() {
        let session = SessionId::new();
        let store = seeded_store(session);
        let hits = QueryBuilder::new()
            .min_confidence(0.9)
            .execute(&store, ts(100))
            .unwrap();
        // 0.95, 0.9 and 0.99 — the 0.9 sits exactly at the threshold.
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_time_range_is_half_open() {
        let session = SessionId::new();
        let store = seeded_store(session);
        let hits = QueryBuilder::new()
            .in_time_range(ts(1), ts(3))
            .execute(&store, ts(100))
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_in_last_window() {
        let session = SessionId::new();
        let store = seeded_store(session);
        let hits = QueryBuilder::new()
            .in_last(1, TimeUnit::Minutes)
            .execute(&store, ts(60))
            .unwrap();
        // All five changes are within the last minute of ts(60).
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn test_text_contains_substring() {
        let session = SessionId::new();
        let store = seeded_store(session);
        let hits = QueryBuilder::new()
            .text_contains(TextQuery::substring("prose"))
            .execute(&store, ts(100))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "style-bot");
    }

    #[test]
    fn test_sort_and_pagination() {
        let session = SessionId::new();
        let store = seeded_store(session);
        let hits = QueryBuilder::new()
            .sort_by(SortField::Confidence, SortDir::Desc)
            .limit(2)
            .offset(1)
            .execute(&store, ts(100))
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].confidence, 0.95);
        assert_eq!(hits[1].confidence, 0.9);
    }

    #[test]
    fn test_invalid_confidence_predicate() {
        let session = SessionId::new();
        let store = seeded_store(session);
        let err = QueryBuilder::new()
            .min_confidence(1.5)
            .execute(&store, ts(0))
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidPredicate { .. }));
    }

    #[test]
    fn test_fingerprint_is_stable_and_distinguishes() {
        let a = QueryBuilder::new().by_source("x").min_confidence(0.5);
        let b = QueryBuilder::new().by_source("x").min_confidence(0.5);
        let c = QueryBuilder::new().by_source("y");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_with_attribution_filter() {
        let session = SessionId::new();
        let store = seeded_store(session);
        let hits = QueryBuilder::new()
            .with_attribution()
            .execute(&store, ts(100))
            .unwrap();
        assert_eq!(hits.len(), 4);
    }
}
