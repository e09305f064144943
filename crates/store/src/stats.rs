// crates/store/src/stats.rs
//! Whole-store statistics overview, computed from the status and
//! category indices.

use std::collections::BTreeMap;

use redline_types::ChangeStatus;
use serde::Serialize;

use crate::store::ChangeStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsOverview {
    pub total: usize,
    pub pending: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub superseded: usize,
    /// Accepted over (accepted + rejected); 0 when nothing is decided.
    pub acceptance_rate: f64,
    pub mean_confidence: f64,
    pub by_category: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
}

impl StatsOverview {
    pub fn of(store: &ChangeStore) -> Self {
        let count = |status: ChangeStatus| {
            store
                .indices()
                .status_ids(status)
                .map(|ids| ids.len())
                .unwrap_or(0)
        };
        let total = store.len();
        let accepted = count(ChangeStatus::Accepted);
        let rejected = count(ChangeStatus::Rejected);
        let decided = accepted + rejected;

        let mut by_category = BTreeMap::new();
        let mut by_source = BTreeMap::new();
        let mut confidence_sum = 0.0;
        for change in store.iter() {
            *by_category
                .entry(change.category.to_string())
                .or_insert(0usize) += 1;
            *by_source.entry(change.source.clone()).or_insert(0usize) += 1;
            confidence_sum += change.confidence;
        }

        Self {
            total,
            pending: count(ChangeStatus::Pending),
            accepted,
            rejected,
            superseded: count(ChangeStatus::Superseded),
            acceptance_rate: if decided == 0 {
                0.0
            } else {
                accepted as f64 / decided as f64
            },
            mean_confidence: if total == 0 {
                0.0
            } else {
                confidence_sum / total as f64
            },
            by_category,
            by_source,
        }
    }
}
