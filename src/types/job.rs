//! Generation Job Data Model
//!
//! A `GenerationJob` owns all per-job state: the corpus, the ordered section
//! drafts, and the cumulative cited-source set. Nothing survives across jobs
//! except the time-boxed chunk-retrieval cache.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::document::SourceDocument;
use super::section::SectionDraft;
use super::{JobId, SourceId};

// =============================================================================
// Citation Records
// =============================================================================

/// One emitted citation token; append-only within a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationRecord {
    /// Token key as emitted in draft text
    pub token: String,
    /// Source the token is bound to
    pub source_id: SourceId,
    /// Where the token was inserted (section key or "backfill")
    pub context: String,
}

// =============================================================================
// Progress
// =============================================================================

/// Coarse job stages, reported with monotonically non-decreasing percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Searching,
    Analyzing,
    Writing,
    Citations,
    Complete,
    Failed,
}

impl ProgressStage {
    /// Percent band this stage starts at
    pub fn base_percent(&self) -> u8 {
        match self {
            Self::Searching => 0,
            Self::Analyzing => 20,
            Self::Writing => 30,
            Self::Citations => 85,
            Self::Complete => 100,
            Self::Failed => 100,
        }
    }
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Searching => "searching",
            Self::Analyzing => "analyzing",
            Self::Writing => "writing",
            Self::Citations => "citations",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Generation Job
// =============================================================================

/// All mutable state for one generation request.
///
/// Mutated only by the single job driver; no locking discipline is required
/// beyond "one job, one owner".
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub id: JobId,
    pub topic: String,
    /// Working corpus assembled by the collector
    pub corpus: Vec<SourceDocument>,
    /// Completed section drafts in document order
    pub sections: Vec<SectionDraft>,
    /// Cumulative cited sources; monotonically non-decreasing
    cited: BTreeSet<SourceId>,
    /// Every emitted citation token with its insertion context; append-only
    pub citation_records: Vec<CitationRecord>,
    pub stage: ProgressStage,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl GenerationJob {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            id: JobId::new(uuid::Uuid::new_v4().to_string()),
            topic: topic.into(),
            corpus: Vec::new(),
            sections: Vec::new(),
            cited: BTreeSet::new(),
            citation_records: Vec::new(),
            stage: ProgressStage::Searching,
            started_at: chrono::Utc::now(),
        }
    }

    /// Look up a corpus document by id
    pub fn source(&self, id: &SourceId) -> Option<&SourceDocument> {
        self.corpus.iter().find(|d| &d.id == id)
    }

    /// Whether the id resolves to a corpus document
    pub fn contains_source(&self, id: &SourceId) -> bool {
        self.source(id).is_some()
    }

    /// Record sources as cited. The set only grows.
    pub fn record_cited<I: IntoIterator<Item = SourceId>>(&mut self, ids: I) {
        self.cited.extend(ids);
    }

    /// Append a citation record; records are never removed or rebound
    pub fn record_citation(&mut self, record: CitationRecord) {
        self.cited.insert(record.source_id.clone());
        self.citation_records.push(record);
    }

    pub fn cited(&self) -> &BTreeSet<SourceId> {
        &self.cited
    }

    pub fn cited_count(&self) -> usize {
        self.cited.len()
    }

    /// Corpus sources not yet cited anywhere in the job
    pub fn uncited_sources(&self) -> Vec<&SourceDocument> {
        self.corpus
            .iter()
            .filter(|d| !self.cited.contains(&d.id))
            .collect()
    }
}

// =============================================================================
// Generation Result
// =============================================================================

/// Per-section outcome reported in the final result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionOutcome {
    pub key: String,
    pub title: String,
    pub word_count: usize,
    pub composite_score: f32,
    pub reflection_cycles: u32,
}

/// Aggregate quality over the whole job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobQualityMetrics {
    /// Mean composite section score (0-100)
    pub mean_section_score: f32,
    /// Distinct sources cited / coverage target
    pub citation_coverage: f32,
    /// Sources cited at least once
    pub cited_sources: usize,
    /// Coverage target that applied to the job
    pub coverage_target: usize,
}

/// Language-model call accounting by stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallAnalytics {
    pub planning_calls: usize,
    pub writing_calls: usize,
    pub reflection_calls: usize,
    pub backfill_calls: usize,
    pub total_duration_ms: u64,
}

impl ToolCallAnalytics {
    pub fn total_calls(&self) -> usize {
        self.planning_calls + self.writing_calls + self.reflection_calls + self.backfill_calls
    }
}

/// Final output of a generation job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Assembled draft markdown with neutral citation tokens
    pub content: String,
    /// Source id -> number of citation tokens bound to it
    pub citation_map: BTreeMap<SourceId, usize>,
    pub word_count: usize,
    pub section_structure: Vec<SectionOutcome>,
    pub quality: JobQualityMetrics,
    pub tool_calls: ToolCallAnalytics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cited_set_only_grows() {
        let mut job = GenerationJob::new("topic");
        job.record_cited([SourceId::from("a"), SourceId::from("b")]);
        assert_eq!(job.cited_count(), 2);
        // Recording an already-cited source is a no-op, never a removal
        job.record_cited([SourceId::from("a")]);
        assert_eq!(job.cited_count(), 2);
        job.record_cited([SourceId::from("c")]);
        assert_eq!(job.cited_count(), 3);
    }

    #[test]
    fn test_uncited_sources() {
        let mut job = GenerationJob::new("topic");
        job.corpus = vec![
            SourceDocument::new("a", "A"),
            SourceDocument::new("b", "B"),
        ];
        job.record_cited([SourceId::from("a")]);
        let uncited = job.uncited_sources();
        assert_eq!(uncited.len(), 1);
        assert_eq!(uncited[0].id.as_str(), "b");
    }

    #[test]
    fn test_stage_percent_bands_increase() {
        let stages = [
            ProgressStage::Searching,
            ProgressStage::Analyzing,
            ProgressStage::Writing,
            ProgressStage::Citations,
            ProgressStage::Complete,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].base_percent() < pair[1].base_percent());
        }
    }
}
