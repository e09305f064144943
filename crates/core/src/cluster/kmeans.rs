// crates/core/src/cluster/kmeans.rs
//! K-means-inspired clustering. Deterministic: seeding is farthest-point
//! over positional distance (no RNG), assignment ties break toward the
//! lower centroid index, and iteration is bounded.

use std::collections::BTreeMap;

use redline_types::{Category, Change, ClusteringConfig};

const MAX_ITERATIONS: usize = 10;
const POSITION_CONVERGENCE: f64 = 10.0;
const CONFIDENCE_CONVERGENCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq)]
struct KCentroid {
    category: Category,
    source: String,
    confidence: f64,
    position: f64,
}

impl KCentroid {
    fn of(change: &Change) -> Self {
        Self {
            category: change.category,
            source: change.source.clone(),
            confidence: change.confidence,
            position: midpoint(change),
        }
    }

    fn converged_with(&self, next: &KCentroid) -> bool {
        (self.position - next.position).abs() < POSITION_CONVERGENCE
            && self.category == next.category
            && self.source == next.source
            && (self.confidence - next.confidence).abs() < CONFIDENCE_CONVERGENCE
    }
}

fn midpoint(change: &Change) -> f64 {
    (change.position.start + change.position.end) as f64 / 2.0
}

fn distance(change: &Change, centroid: &KCentroid, config: &ClusteringConfig) -> f64 {
    let category = if change.category == centroid.category { 0.0 } else { 1.0 };
    let source = if change.source == centroid.source { 0.0 } else { 1.0 };
    let confidence = (change.confidence - centroid.confidence).abs();
    let position = (midpoint(change) - centroid.position).abs() / 1000.0;
    config.category_weight * category
        + config.source_weight * source
        + config.confidence_weight * confidence
        + config.proximity_weight * position
}

pub(super) fn cluster<'a>(
    changes: &'a [Change],
    config: &ClusteringConfig,
) -> Vec<Vec<&'a Change>> {
    if changes.is_empty() {
        return Vec::new();
    }
    let mut sorted: Vec<&Change> = changes.iter().collect();
    sorted.sort_by_key(|c| c.id);

    let n = sorted.len();
    let k = (n / config.min_cluster_size.max(1))
        .clamp(2, config.max_clusters.max(2))
        .min(n);

    let mut centroids = seed_centroids(&sorted, k);
    let mut assignment = vec![0usize; n];

    for _ in 0..MAX_ITERATIONS {
        // Assignment: nearest centroid, ties to the lower index.
        for (i, change) in sorted.iter().enumerate() {
            let mut best = 0usize;
            let mut best_distance = f64::INFINITY;
            for (slot, centroid) in centroids.iter().enumerate() {
                let d = distance(change, centroid, config);
                if d < best_distance {
                    best_distance = d;
                    best = slot;
                }
            }
            assignment[i] = best;
        }

        // Recompute: mode category/source, means for the numerics. Empty
        // slots keep their previous centroid.
        let mut next = centroids.clone();
        let mut all_converged = true;
        for slot in 0..centroids.len() {
            let members: Vec<&Change> = sorted
                .iter()
                .enumerate()
                .filter(|(i, _)| assignment[*i] == slot)
                .map(|(_, c)| *c)
                .collect();
            if members.is_empty() {
                continue;
            }
            let recomputed = recompute(&members);
            if !centroids[slot].converged_with(&recomputed) {
                all_converged = false;
            }
            next[slot] = recomputed;
        }
        centroids = next;
        if all_converged {
            break;
        }
    }

    let mut groups: Vec<Vec<&Change>> = vec![Vec::new(); centroids.len()];
    for (i, change) in sorted.iter().enumerate() {
        groups[assignment[i]].push(change);
    }
    groups
        .into_iter()
        .filter(|g| g.len() >= config.min_cluster_size)
        .collect()
}

/// Farthest-point seeding over positional distance: start from the first
/// change (id order), then repeatedly take the change farthest from every
/// chosen seed.
fn seed_centroids(sorted: &[&Change], k: usize) -> Vec<KCentroid> {
    let mut seeds: Vec<usize> = vec![0];
    while seeds.len() < k {
        let mut farthest = None;
        let mut farthest_distance = -1.0f64;
        for (i, change) in sorted.iter().enumerate() {
            if seeds.contains(&i) {
                continue;
            }
            let nearest = seeds
                .iter()
                .map(|&s| (midpoint(change) - midpoint(sorted[s])).abs())
                .fold(f64::INFINITY, f64::min);
            if nearest > farthest_distance {
                farthest_distance = nearest;
                farthest = Some(i);
            }
        }
        match farthest {
            Some(i) => seeds.push(i),
            None => break,
        }
    }
    seeds.into_iter().map(|i| KCentroid::of(sorted[i])).collect()
}

fn recompute(members: &[&Change]) -> KCentroid {
    let mut category_counts: BTreeMap<Category, usize> = BTreeMap::new();
    let mut source_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for change in members {
        *category_counts.entry(change.category).or_default() += 1;
        *source_counts.entry(change.source.as_str()).or_default() += 1;
    }
    KCentroid {
        category: category_counts
            .iter()
            .max_by_key(|(_, n)| **n)
            .map(|(c, _)| *c)
            .expect("non-empty member set"),
        source: source_counts
            .iter()
            .max_by_key(|(_, n)| **n)
            .map(|(s, _)| s.to_string())
            .expect("non-empty member set"),
        confidence: members.iter().map(|c| c.confidence).sum::<f64>() / members.len() as f64,
        position: members.iter().map(|c| midpoint(c)).sum::<f64>() / members.len() as f64,
    }
}
