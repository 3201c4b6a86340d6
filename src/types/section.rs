//! Section Data Model
//!
//! Section specifications arrive from the outline step as read-only input;
//! drafts are created at WRITING, mutated through REFLECTING, and frozen at
//! SCORING.

use serde::{Deserialize, Serialize};

use super::SourceId;
use crate::constants::pipeline as pipeline_constants;

// =============================================================================
// Section Keys
// =============================================================================

/// Lowercase well-known section identifier (`results`, `discussion`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionKey(String);

impl SectionKey {
    pub const RESULTS: &'static str = "results";
    pub const DISCUSSION: &'static str = "discussion";
    pub const METHODOLOGY: &'static str = "methodology";
    pub const LITERATURE_REVIEW: &'static str = "literature_review";

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Section kinds that always warrant a reflection pass
    pub fn is_analytical(&self) -> bool {
        matches!(
            self.0.as_str(),
            Self::RESULTS | Self::DISCUSSION | Self::METHODOLOGY | Self::LITERATURE_REVIEW
        )
    }
}

impl std::fmt::Display for SectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SectionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// Section Spec
// =============================================================================

/// Read-only description of one section to generate, produced by the
/// outline step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionSpec {
    pub key: SectionKey,
    pub title: String,
    /// Target length in words
    pub expected_words: usize,
    /// Source ids the section may draw on
    #[serde(default)]
    pub candidate_sources: Vec<SourceId>,
}

impl SectionSpec {
    pub fn new(key: impl Into<SectionKey>, title: impl Into<String>, expected_words: usize) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            expected_words,
            candidate_sources: Vec::new(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<SourceId>) -> Self {
        self.candidate_sources = sources;
        self
    }
}

// =============================================================================
// Quality Bundle
// =============================================================================

/// Stage-weighted quality sub-scores, each 0-100
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityBundle {
    pub planning: f32,
    pub writing: f32,
    pub reflection: f32,
    pub metrics: f32,
}

impl Default for QualityBundle {
    fn default() -> Self {
        let degraded = pipeline_constants::DEGRADED_STAGE_SCORE;
        Self {
            planning: degraded,
            writing: degraded,
            reflection: degraded,
            metrics: degraded,
        }
    }
}

impl QualityBundle {
    /// Overall score: plain average of the four stage scores
    pub fn composite(&self) -> f32 {
        (self.planning + self.writing + self.reflection + self.metrics) / 4.0
    }
}

// =============================================================================
// Section Draft
// =============================================================================

/// A drafted section with citation bookkeeping and quality scores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionDraft {
    pub key: SectionKey,
    pub title: String,
    /// Drafted markdown containing neutral citation tokens
    pub content: String,
    /// Source ids cited in `content`, in order of first appearance
    pub citations: Vec<SourceId>,
    pub quality: QualityBundle,
    /// Number of reflection revisions applied
    pub revision: u32,
}

impl SectionDraft {
    pub fn new(key: SectionKey, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            key,
            title: title.into(),
            content: content.into(),
            citations: Vec::new(),
            quality: QualityBundle::default(),
            revision: 0,
        }
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}
