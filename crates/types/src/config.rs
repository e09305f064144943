// crates/types/src/config.rs
//! Pipeline configuration: one section per subsystem, serde-loadable from
//! JSON or TOML with defaults matching the documented behavior.

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterStrategyKind;
use crate::batch::GroupingStrategy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub strategy: ClusterStrategyKind,
    pub min_cluster_size: usize,
    pub max_cluster_size: usize,
    pub max_clusters: usize,
    /// Max inter-change gap (chars) for proximity grouping.
    pub proximity_threshold: u64,
    pub confidence_threshold: f64,
    pub category_weight: f64,
    pub source_weight: f64,
    pub confidence_weight: f64,
    pub proximity_weight: f64,
    /// Debounce window for incremental cluster refresh.
    pub update_debounce_ms: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            strategy: ClusterStrategyKind::Hybrid,
            min_cluster_size: 2,
            max_cluster_size: 20,
            max_clusters: 10,
            proximity_threshold: 50,
            confidence_threshold: 0.5,
            category_weight: 1.0,
            source_weight: 1.0,
            confidence_weight: 1.0,
            proximity_weight: 1.0,
            update_debounce_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub enabled: bool,
    pub default_strategy: GroupingStrategy,
    pub max_changes_per_group: usize,
    pub time_window_ms: u64,
    pub proximity_threshold: u64,
    pub min_changes_for_group: usize,
    pub enable_hierarchical_grouping: bool,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_strategy: GroupingStrategy::OperationType,
            max_changes_per_group: 25,
            time_window_ms: 30_000,
            proximity_threshold: 200,
            min_changes_for_group: 2,
            enable_hierarchical_grouping: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub snapshot_interval_ms: u64,
    pub max_snapshots_per_session: usize,
    /// Bodies at or above this size are gzip-compressed inside snapshots
    /// and evicted blobs.
    pub compression_threshold_bytes: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_ms: 60_000,
            max_snapshots_per_session: 10,
            compression_threshold_bytes: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fixed,
}

impl BackoffStrategy {
    /// Backoff for the given level. Level 0 is the first throttling.
    pub fn backoff_ms(&self, base_ms: u64, level: u32) -> u64 {
        match self {
            BackoffStrategy::Exponential => base_ms.saturating_mul(1u64 << level.min(20)),
            BackoffStrategy::Linear => base_ms.saturating_mul(level as u64 + 1),
            BackoffStrategy::Fixed => base_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub max_requests_per_second: u32,
    pub burst_capacity: u32,
    pub backoff_strategy: BackoffStrategy,
    pub base_backoff_ms: u64,
    pub max_retries: u32,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: 10,
            burst_capacity: 20,
            backoff_strategy: BackoffStrategy::Exponential,
            base_backoff_ms: 1000,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    Lru,
    Lfu,
    Ttl,
    Priority,
}

/// Reported memory pressure; drives eviction aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPressure {
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_cache_bytes: usize,
    pub cache_strategy: CacheStrategy,
    pub low_memory_threshold_bytes: usize,
    pub ttl_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_cache_bytes: 64 * 1024 * 1024,
            cache_strategy: CacheStrategy::Lru,
            low_memory_threshold_bytes: 8 * 1024 * 1024,
            ttl_ms: 10 * 60 * 1000,
        }
    }
}

/// Consolidation-engine knobs. The defaults implement the documented
/// guarantees: a 250 ms budget that degrades to PriorityWins, and up to
/// three idempotent retries for transient store failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub enabled: bool,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 250,
            max_retries: 3,
            enabled: true,
        }
    }
}

/// Query-cache knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub cache_ttl_ms: u64,
    /// Maximum edit distance for fuzzy text matching; 0 disables fuzz.
    pub fuzzy_distance: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 5_000,
            fuzzy_distance: 0,
        }
    }
}

/// Top-level configuration, one section per subsystem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub clustering: ClusteringConfig,
    pub batching: BatchingConfig,
    pub persistence: PersistenceConfig,
    pub governor: GovernorConfig,
    pub memory: MemoryConfig,
    pub consolidation: ConsolidationConfig,
    pub query: QueryConfig,
}

impl PipelineConfig {
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}
