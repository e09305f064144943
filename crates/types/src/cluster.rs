// crates/types/src/cluster.rs
//! Derived cluster views over sets of changes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::{Category, Span};
use crate::ids::{ChangeId, ClusterId};

/// Which clustering strategy produced a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStrategyKind {
    Category,
    Confidence,
    Proximity,
    Source,
    Hybrid,
    KMeans,
}

impl ClusterStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStrategyKind::Category => "category",
            ClusterStrategyKind::Confidence => "confidence",
            ClusterStrategyKind::Proximity => "proximity",
            ClusterStrategyKind::Source => "source",
            ClusterStrategyKind::Hybrid => "hybrid",
            ClusterStrategyKind::KMeans => "kmeans",
        }
    }
}

/// Strategy-dependent summary used to place new changes into an existing
/// cluster without rescanning every member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    /// Most frequent category among members.
    pub category: Category,
    /// Most frequent producer among members.
    pub source: String,
    pub mean_confidence: f64,
    /// Mean of member position midpoints.
    pub mean_position: f64,
    /// Hull of member spans.
    pub span: Span,
}

/// Quality metrics for a cluster; every value is in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetrics {
    pub coherence: f64,
    pub confidence: f64,
    pub density: f64,
    pub diversity: f64,
}

impl ClusterMetrics {
    pub fn in_bounds(&self) -> bool {
        [self.coherence, self.confidence, self.density, self.diversity]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }
}

/// A derived grouping of changes. Clusters are views: they hold member
/// ids, never the changes themselves, and are recomputed on change events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub strategy: ClusterStrategyKind,
    pub member_ids: BTreeSet<ChangeId>,
    pub centroid: Centroid,
    pub metrics: ClusterMetrics,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }

    pub fn contains(&self, id: &ChangeId) -> bool {
        self.member_ids.contains(id)
    }
}
