// crates/types/src/submission.rs
//! Submission-time option types shared by producers, the consolidation
//! engine, and the pipeline facade.

use serde::{Deserialize, Serialize};

/// How a producer wants its conflicts resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    AutoMerge,
    PriorityWins,
    UserChoice,
    Sequential,
}

/// Per-submission conflict-resolution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub strategy: ConflictStrategy,
    #[serde(default)]
    pub allow_semantic_merge: bool,
    /// Merging of adjacent changes is permitted when the gap between them
    /// is at most this many characters.
    #[serde(default = "default_overlap_tolerance")]
    pub overlap_tolerance: u64,
    /// Lower priority yields to the existing conflict set without raising
    /// a conflict.
    #[serde(default)]
    pub auto_defer: bool,
}

fn default_overlap_tolerance() -> u64 {
    2
}

impl Default for ConflictResolution {
    fn default() -> Self {
        Self {
            strategy: ConflictStrategy::PriorityWins,
            allow_semantic_merge: false,
            overlap_tolerance: default_overlap_tolerance(),
            auto_defer: false,
        }
    }
}

/// What a producer says it is trying to do with a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeIntention {
    Correction,
    Enhancement,
    Formatting,
    ContentAddition,
    Restructuring,
}

/// Granularity a submission operates at. Word and Sentence scopes may be
/// merged; Section and Document scopes never are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticScope {
    Word,
    Sentence,
    Paragraph,
    Section,
    Document,
}

impl SemanticScope {
    pub fn mergeable_with(self, other: SemanticScope) -> bool {
        use SemanticScope::*;
        matches!(self, Word | Sentence) && matches!(other, Word | Sentence)
    }
}

/// Optional per-submission semantic context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticContext {
    pub intention: ChangeIntention,
    pub scope: SemanticScope,
    pub confidence: f64,
    #[serde(default)]
    pub preserve_formatting: bool,
    #[serde(default)]
    pub preserve_content: bool,
}

impl Default for SemanticContext {
    fn default() -> Self {
        Self {
            intention: ChangeIntention::Correction,
            scope: SemanticScope::Sentence,
            confidence: 0.5,
            preserve_formatting: false,
            preserve_content: false,
        }
    }
}

/// Per-producer validation policy. Owned by the pipeline's producer
/// registry and consulted by validation and sanitization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerPolicy {
    /// Changes below this confidence are dropped with a warning.
    #[serde(default)]
    pub confidence_floor: f64,
    /// Redact sensitive matches instead of rejecting the change.
    #[serde(default = "default_true")]
    pub redact_sensitive: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_phrases: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_actions: Vec<String>,
    /// Maximum byte length for attribution `instructions` / `user_prompt`.
    #[serde(default = "default_prompt_cap")]
    pub prompt_length_cap: usize,
    /// Opt-in auto-accept: never set by default. Present so the policy is
    /// producer-visible configuration rather than a hidden constant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_accept_threshold: Option<f64>,
}

fn default_true() -> bool {
    true
}

fn default_prompt_cap() -> usize {
    4096
}

impl Default for ProducerPolicy {
    fn default() -> Self {
        Self {
            confidence_floor: 0.0,
            redact_sensitive: true,
            forbidden_phrases: Vec::new(),
            forbidden_actions: Vec::new(),
            prompt_length_cap: default_prompt_cap(),
            auto_accept_threshold: None,
        }
    }
}
