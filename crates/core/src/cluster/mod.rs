// crates/core/src/cluster/mod.rs
//! Clustering engine: six strategies mapping `(changes, config)` to a set
//! of cluster views.
//!
//! Strategy selection is a pure function of configuration; every strategy
//! is deterministic (iteration over ids, no randomness) so a cluster pass
//! over the same store state always yields the same set.

mod kmeans;
mod strategies;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use redline_types::{
    Category, Change, ChangeId, Cluster, ClusterId, ClusterMetrics, ClusterStrategyKind,
    ClusteringConfig, Centroid, Span,
};
use tracing::debug;

use crate::position;

/// Similarity above which a lone change joins an existing cluster during
/// incremental updates.
const ADMISSION_THRESHOLD: f64 = 0.6;

/// Similarity above which greedy agglomeration absorbs a change.
const AGGLOMERATION_THRESHOLD: f64 = 0.7;

/// The result of one clustering pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterSet {
    pub clusters: Vec<Cluster>,
}

impl ClusterSet {
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// The cluster containing `id`, if any. Changes belong to at most one
    /// cluster per pass.
    pub fn containing(&self, id: &ChangeId) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.contains(id))
    }
}

/// Run the configured strategy over `changes`.
pub fn cluster_changes(
    changes: &[Change],
    config: &ClusteringConfig,
    now: DateTime<Utc>,
) -> ClusterSet {
    let groups: Vec<Vec<&Change>> = match config.strategy {
        ClusterStrategyKind::Category => strategies::by_category(changes, config),
        ClusterStrategyKind::Confidence => strategies::by_confidence(changes, config),
        ClusterStrategyKind::Proximity => strategies::by_proximity(changes, config),
        ClusterStrategyKind::Source => strategies::by_source(changes, config),
        ClusterStrategyKind::Hybrid => strategies::hybrid(changes, config),
        ClusterStrategyKind::KMeans => kmeans::cluster(changes, config),
    };

    let dataset = DatasetProfile::of(changes);
    let clusters = groups
        .into_iter()
        .filter(|members| !members.is_empty())
        .map(|members| build_cluster(&members, config.strategy, &dataset, now))
        .collect();
    let set = ClusterSet { clusters };
    debug!(
        strategy = ?config.strategy,
        changes = changes.len(),
        clusters = set.len(),
        "clustering pass complete"
    );
    set
}

/// Distinct categories/sources across the whole input set; the
/// denominator of the diversity metric.
#[derive(Debug, Clone)]
struct DatasetProfile {
    categories: BTreeSet<Category>,
    sources: BTreeSet<String>,
}

impl DatasetProfile {
    fn of(changes: &[Change]) -> Self {
        Self {
            categories: changes.iter().map(|c| c.category).collect(),
            sources: changes.iter().map(|c| c.source.clone()).collect(),
        }
    }
}

fn build_cluster(
    members: &[&Change],
    strategy: ClusterStrategyKind,
    dataset: &DatasetProfile,
    now: DateTime<Utc>,
) -> Cluster {
    let centroid = centroid_of(members);
    let metrics = metrics_of(members, dataset);
    let title = format!(
        "{} · {} changes",
        title_stem(strategy, &centroid),
        members.len()
    );
    let description = format!(
        "{} changes spanning [{}, {}) from {}",
        members.len(),
        centroid.span.start,
        centroid.span.end,
        centroid.source
    );
    Cluster {
        id: ClusterId::new(),
        strategy,
        member_ids: members.iter().map(|c| c.id).collect(),
        centroid,
        metrics,
        title,
        description,
        created_at: now,
        updated_at: now,
    }
}

fn title_stem(strategy: ClusterStrategyKind, centroid: &Centroid) -> String {
    match strategy {
        ClusterStrategyKind::Category => format!("{} fixes", centroid.category),
        ClusterStrategyKind::Confidence => confidence_band_name(centroid.mean_confidence).into(),
        ClusterStrategyKind::Proximity => "Nearby edits".into(),
        ClusterStrategyKind::Source => format!("From {}", centroid.source),
        ClusterStrategyKind::Hybrid | ClusterStrategyKind::KMeans => {
            format!("{} group", centroid.category)
        }
    }
}

pub(crate) fn confidence_band_name(confidence: f64) -> &'static str {
    if confidence >= 0.9 {
        "High confidence"
    } else if confidence >= 0.7 {
        "Medium confidence"
    } else if confidence >= 0.5 {
        "Low confidence"
    } else {
        "Speculative"
    }
}

/// Strategy-independent centroid: category/source modes, mean confidence,
/// mean midpoint, hull span.
pub fn centroid_of(members: &[&Change]) -> Centroid {
    debug_assert!(!members.is_empty());

    let mut category_counts: BTreeMap<Category, usize> = BTreeMap::new();
    let mut source_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for change in members {
        *category_counts.entry(change.category).or_default() += 1;
        *source_counts.entry(change.source.as_str()).or_default() += 1;
    }
    // max_by_key returns the last max; BTreeMap order makes ties stable.
    let category = category_counts
        .iter()
        .max_by_key(|(_, n)| **n)
        .map(|(c, _)| *c)
        .unwrap_or(Category::Other);
    let source = source_counts
        .iter()
        .max_by_key(|(_, n)| **n)
        .map(|(s, _)| s.to_string())
        .unwrap_or_default();

    let mean_confidence =
        members.iter().map(|c| c.confidence).sum::<f64>() / members.len() as f64;
    let mean_position = members
        .iter()
        .map(|c| (c.position.start + c.position.end) as f64 / 2.0)
        .sum::<f64>()
        / members.len() as f64;
    let span = position::hull_all(members.iter().map(|c| c.position))
        .unwrap_or(Span::new(0, 0));

    Centroid {
        category,
        source,
        mean_confidence,
        mean_position,
        span,
    }
}

fn metrics_of(members: &[&Change], dataset: &DatasetProfile) -> ClusterMetrics {
    let n = members.len();
    let unique_categories: BTreeSet<Category> = members.iter().map(|c| c.category).collect();
    let unique_sources: BTreeSet<&str> =
        members.iter().map(|c| c.source.as_str()).collect();

    let spread = |unique: usize| 1.0 - (unique.saturating_sub(1)) as f64 / (n.max(2) - 1) as f64;
    let coherence = (spread(unique_categories.len()) + spread(unique_sources.len())) / 2.0;

    let confidence = members.iter().map(|c| c.confidence).sum::<f64>() / n as f64;

    let span = position::hull_all(members.iter().map(|c| c.position))
        .unwrap_or(Span::new(0, 0));
    let density = (n as f64 / (span.len() as f64 / 100.0).max(1.0)).min(1.0);

    let denominator = (dataset.categories.len() + dataset.sources.len()).max(1);
    let diversity =
        (unique_categories.len() + unique_sources.len()) as f64 / denominator as f64;

    ClusterMetrics {
        coherence,
        confidence,
        density,
        diversity: diversity.min(1.0),
    }
}

/// Pairwise similarity used by the hybrid strategy and by incremental
/// admission: a weighted mean over category equality, source equality,
/// confidence distance, and positional distance.
pub fn similarity(a: &Change, b: &Change, config: &ClusteringConfig) -> f64 {
    let positional = {
        let mid_a = (a.position.start + a.position.end) as f64 / 2.0;
        let mid_b = (b.position.start + b.position.end) as f64 / 2.0;
        let delta = (mid_a - mid_b).abs();
        (1.0 - delta / config.proximity_threshold.max(1) as f64).max(0.0)
    };
    let features = [
        (config.category_weight, (a.category == b.category) as u8 as f64),
        (config.source_weight, (a.source == b.source) as u8 as f64),
        (
            config.confidence_weight,
            1.0 - (a.confidence - b.confidence).abs(),
        ),
        (config.proximity_weight, positional),
    ];
    let weight_sum: f64 = features.iter().map(|(w, _)| w).sum();
    if weight_sum <= 0.0 {
        return 0.0;
    }
    features.iter().map(|(w, s)| w * s).sum::<f64>() / weight_sum
}

/// Similarity of one change against a cluster centroid.
pub fn centroid_similarity(change: &Change, centroid: &Centroid, config: &ClusteringConfig) -> f64 {
    let positional = {
        let mid = (change.position.start + change.position.end) as f64 / 2.0;
        let delta = (mid - centroid.mean_position).abs();
        (1.0 - delta / config.proximity_threshold.max(1) as f64).max(0.0)
    };
    let features = [
        (
            config.category_weight,
            (change.category == centroid.category) as u8 as f64,
        ),
        (
            config.source_weight,
            (change.source == centroid.source) as u8 as f64,
        ),
        (
            config.confidence_weight,
            1.0 - (change.confidence - centroid.mean_confidence).abs(),
        ),
        (config.proximity_weight, positional),
    ];
    let weight_sum: f64 = features.iter().map(|(w, _)| w).sum();
    if weight_sum <= 0.0 {
        return 0.0;
    }
    features.iter().map(|(w, s)| w * s).sum::<f64>() / weight_sum
}

/// Place a single new change: the best-matching existing cluster above
/// the admission threshold, or `None` (caller creates a singleton, which
/// later merging may absorb).
pub fn admit_single(
    change: &Change,
    clusters: &[Cluster],
    config: &ClusteringConfig,
) -> Option<ClusterId> {
    let mut best: Option<(f64, ClusterId)> = None;
    for cluster in clusters {
        let score = centroid_similarity(change, &cluster.centroid, config);
        if score > ADMISSION_THRESHOLD
            && best.map_or(true, |(b, _)| score > b)
        {
            best = Some((score, cluster.id));
        }
    }
    best.map(|(_, id)| id)
}

/// Debounced incremental-update queue. Change events accumulate here; the
/// deadline resets on every new event and the owning loop recomputes the
/// affected clusters once it passes.
#[derive(Debug, Clone)]
pub struct ClusterUpdateQueue {
    dirty: BTreeSet<ChangeId>,
    deadline: Option<DateTime<Utc>>,
    debounce: Duration,
}

impl ClusterUpdateQueue {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            dirty: BTreeSet::new(),
            deadline: None,
            debounce: Duration::milliseconds(debounce_ms as i64),
        }
    }

    /// Record a change add/remove; resets the deadline.
    pub fn record(&mut self, id: ChangeId, now: DateTime<Utc>) {
        self.dirty.insert(id);
        self.deadline = Some(now + self.debounce);
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }

    /// Take the dirty set; clears the deadline.
    pub fn drain(&mut self) -> BTreeSet<ChangeId> {
        self.deadline = None;
        std::mem::take(&mut self.dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use redline_types::{ChangeContent, ChangeKind, SessionId};

    pub(crate) fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 2, 8, 0, 0).unwrap()
    }

    pub(crate) fn make_change(
        session: SessionId,
        start: u64,
        category: Category,
        source: &str,
        confidence: f64,
    ) -> Change {
        Change::new(
            session,
            ChangeKind::Replace,
            Span::new(start, start + 5),
            ChangeContent::new("aaaaa", "bbbbb"),
            category,
            source,
            confidence,
            ts(),
        )
    }

    #[test]
    fn test_proximity_scenario_two_groups() {
        // Positions 0, 10, 25, 500, 510, 520 with threshold 50 split into
        // exactly two clusters.
        let session = SessionId::new();
        let changes: Vec<Change> = [0u64, 10, 25, 500, 510, 520]
            .iter()
            .map(|&p| make_change(session, p, Category::Grammar, "src", 0.8))
            .collect();
        let config = ClusteringConfig {
            strategy: ClusterStrategyKind::Proximity,
            proximity_threshold: 50,
            min_cluster_size: 2,
            max_cluster_size: 10,
            ..Default::default()
        };
        let set = cluster_changes(&changes, &config, ts());
        assert_eq!(set.len(), 2);

        let first = set.containing(&changes[0].id).unwrap();
        assert_eq!(first.len(), 3);
        assert!(first.contains(&changes[1].id));
        assert!(first.contains(&changes[2].id));

        let second = set.containing(&changes[3].id).unwrap();
        assert_eq!(second.len(), 3);
    }

    #[test]
    fn test_single_change_min_size_one_is_dense_singleton() {
        let session = SessionId::new();
        let changes = vec![make_change(session, 40, Category::Spelling, "src", 0.9)];
        let config = ClusteringConfig {
            strategy: ClusterStrategyKind::Category,
            min_cluster_size: 1,
            ..Default::default()
        };
        let set = cluster_changes(&changes, &config, ts());
        assert_eq!(set.len(), 1);
        let cluster = &set.clusters[0];
        assert_eq!(cluster.len(), 1);
        assert_eq!(cluster.metrics.density, 1.0);
        assert!(cluster.metrics.in_bounds());
    }

    #[test]
    fn test_metrics_all_in_bounds() {
        let session = SessionId::new();
        let mut changes = Vec::new();
        for i in 0..12u64 {
            let category = if i % 3 == 0 {
                Category::Grammar
            } else {
                Category::Style
            };
            let source = if i % 2 == 0 { "a" } else { "b" };
            changes.push(make_change(session, i * 40, category, source, 0.5 + (i as f64) * 0.04));
        }
        for strategy in [
            ClusterStrategyKind::Category,
            ClusterStrategyKind::Confidence,
            ClusterStrategyKind::Proximity,
            ClusterStrategyKind::Source,
            ClusterStrategyKind::Hybrid,
            ClusterStrategyKind::KMeans,
        ] {
            let config = ClusteringConfig {
                strategy,
                min_cluster_size: 1,
                ..Default::default()
            };
            let set = cluster_changes(&changes, &config, ts());
            for cluster in &set.clusters {
                assert!(
                    cluster.metrics.in_bounds(),
                    "{strategy:?} produced out-of-bounds metrics: {:?}",
                    cluster.metrics
                );
                assert!(cluster.member_ids.len() <= changes.len());
            }
        }
    }

    #[test]
    fn test_coherent_cluster_scores_high() {
        let session = SessionId::new();
        let members: Vec<Change> = (0..4)
            .map(|i| make_change(session, i * 10, Category::Grammar, "one", 0.9))
            .collect();
        let refs: Vec<&Change> = members.iter().collect();
        let dataset = DatasetProfile::of(&members);
        let metrics = metrics_of(&refs, &dataset);
        assert_eq!(metrics.coherence, 1.0);
        assert!((metrics.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_similarity_identical_changes_is_one() {
        let session = SessionId::new();
        let a = make_change(session, 10, Category::Grammar, "src", 0.8);
        let b = make_change(session, 10, Category::Grammar, "src", 0.8);
        let config = ClusteringConfig::default();
        assert!((similarity(&a, &b, &config) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_admission_threshold() {
        let session = SessionId::new();
        let members: Vec<Change> = (0..3)
            .map(|i| make_change(session, i * 10, Category::Grammar, "src", 0.9))
            .collect();
        let config = ClusteringConfig {
            strategy: ClusterStrategyKind::Category,
            min_cluster_size: 1,
            ..Default::default()
        };
        let set = cluster_changes(&members, &config, ts());

        let near = make_change(session, 15, Category::Grammar, "src", 0.88);
        assert!(admit_single(&near, &set.clusters, &config).is_some());

        let far = make_change(session, 100_000, Category::Content, "other", 0.1);
        assert_eq!(admit_single(&far, &set.clusters, &config), None);
    }

    #[test]
    fn test_update_queue_debounce_resets() {
        let mut queue = ClusterUpdateQueue::new(500);
        let t0 = ts();
        queue.record(ChangeId::new(), t0);
        assert!(!queue.is_due(t0 + Duration::milliseconds(499)));
        assert!(queue.is_due(t0 + Duration::milliseconds(500)));

        // A second event pushes the deadline out.
        queue.record(ChangeId::new(), t0 + Duration::milliseconds(400));
        assert!(!queue.is_due(t0 + Duration::milliseconds(500)));
        assert!(queue.is_due(t0 + Duration::milliseconds(900)));

        assert_eq!(queue.drain().len(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.deadline(), None);
    }
}
