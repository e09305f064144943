// crates/core/src/cluster/strategies.rs
//! The five non-iterative clustering strategies. Each returns raw member
//! groups; `mod.rs` turns groups into `Cluster` records.

use std::collections::BTreeMap;

use redline_types::{Category, Change, ClusteringConfig};

use super::{similarity, AGGLOMERATION_THRESHOLD};

/// Group by `change.category`, dropping groups below the minimum size.
/// Oversized groups (more than twice the minimum) split into confidence
/// bands so review stays tractable.
pub(super) fn by_category<'a>(
    changes: &'a [Change],
    config: &ClusteringConfig,
) -> Vec<Vec<&'a Change>> {
    let mut by_category: BTreeMap<Category, Vec<&Change>> = BTreeMap::new();
    for change in changes {
        by_category.entry(change.category).or_default().push(change);
    }

    let mut groups = Vec::new();
    for (_, members) in by_category {
        if members.len() < config.min_cluster_size {
            continue;
        }
        if members.len() > 2 * config.min_cluster_size {
            for band in split_by_confidence_bands(&members) {
                if band.len() >= config.min_cluster_size {
                    groups.push(band);
                }
            }
        } else {
            groups.push(members);
        }
    }
    groups
}

/// The four sub-cluster bands used when a category group is oversized:
/// `[0.9, 1.0]`, `[0.7, 0.9)`, `[0.5, 0.7)`, `[0, 0.5)`.
fn split_by_confidence_bands<'a>(members: &[&'a Change]) -> Vec<Vec<&'a Change>> {
    let mut bands: [Vec<&Change>; 4] = Default::default();
    for change in members {
        let slot = if change.confidence >= 0.9 {
            0
        } else if change.confidence >= 0.7 {
            1
        } else if change.confidence >= 0.5 {
            2
        } else {
            3
        };
        bands[slot].push(change);
    }
    bands.into_iter().filter(|b| !b.is_empty()).collect()
}

/// Fixed confidence bands: High ≥ 0.9, Medium 0.7–0.9, Low 0.5–0.7.
/// Changes under 0.5 belong to no band.
pub(super) fn by_confidence<'a>(
    changes: &'a [Change],
    config: &ClusteringConfig,
) -> Vec<Vec<&'a Change>> {
    let mut high = Vec::new();
    let mut medium = Vec::new();
    let mut low = Vec::new();
    for change in changes {
        if change.confidence >= 0.9 {
            high.push(change);
        } else if change.confidence >= 0.7 {
            medium.push(change);
        } else if change.confidence >= 0.5 {
            low.push(change);
        }
    }
    [high, medium, low]
        .into_iter()
        .filter(|band| band.len() >= config.min_cluster_size)
        .collect()
}

/// Greedy positional sweep: sort by start, extend the open cluster while
/// the gap stays within the threshold and the cluster has room, flush
/// otherwise. Undersized flushes are dropped.
pub(super) fn by_proximity<'a>(
    changes: &'a [Change],
    config: &ClusteringConfig,
) -> Vec<Vec<&'a Change>> {
    let mut sorted: Vec<&Change> = changes.iter().collect();
    sorted.sort_by_key(|c| (c.position.start, c.id));

    let mut groups: Vec<Vec<&Change>> = Vec::new();
    let mut open: Vec<&Change> = Vec::new();
    for change in sorted {
        let fits = match open.last() {
            None => true,
            Some(last) => {
                let gap = change.position.start.saturating_sub(last.position.end);
                gap <= config.proximity_threshold && open.len() < config.max_cluster_size
            }
        };
        if fits {
            open.push(change);
        } else {
            if open.len() >= config.min_cluster_size {
                groups.push(std::mem::take(&mut open));
            } else {
                open.clear();
            }
            open.push(change);
        }
    }
    if open.len() >= config.min_cluster_size {
        groups.push(open);
    }
    groups
}

/// Group by producer id, filtered by minimum size.
pub(super) fn by_source<'a>(
    changes: &'a [Change],
    config: &ClusteringConfig,
) -> Vec<Vec<&'a Change>> {
    let mut by_source: BTreeMap<&str, Vec<&Change>> = BTreeMap::new();
    for change in changes {
        by_source
            .entry(change.source.as_str())
            .or_default()
            .push(change);
    }
    by_source
        .into_values()
        .filter(|members| members.len() >= config.min_cluster_size)
        .collect()
}

/// Greedy agglomeration over the weighted pairwise similarity score.
/// Iteration is in id order, so the result is deterministic for a given
/// change set.
pub(super) fn hybrid<'a>(
    changes: &'a [Change],
    config: &ClusteringConfig,
) -> Vec<Vec<&'a Change>> {
    let mut sorted: Vec<&Change> = changes.iter().collect();
    sorted.sort_by_key(|c| c.id);

    let mut taken = vec![false; sorted.len()];
    let mut groups = Vec::new();
    for i in 0..sorted.len() {
        if taken[i] {
            continue;
        }
        taken[i] = true;
        let mut group = vec![sorted[i]];
        for j in (i + 1)..sorted.len() {
            if taken[j] {
                continue;
            }
            if similarity(sorted[i], sorted[j], config) > AGGLOMERATION_THRESHOLD {
                taken[j] = true;
                group.push(sorted[j]);
            }
        }
        if group.len() >= config.min_cluster_size {
            groups.push(group);
        }
    }
    groups
}
