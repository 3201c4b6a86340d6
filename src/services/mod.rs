//! External Collaborator Contracts
//!
//! Traits for the services the generation core consumes but does not own:
//! the corpus store, the passage index, the background extraction queue, the
//! structural-profile service, and per-source reference lists. Concrete
//! backends (HTTP, database, search cluster) live outside this crate.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Result, SectionSpec, SourceDocument, SourceId};

// =============================================================================
// Corpus Store
// =============================================================================

/// Filters applied to source discovery
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Maximum results to return
    pub limit: usize,
    /// Source ids to exclude (already pinned)
    pub exclude: Vec<SourceId>,
}

/// Store of source documents: lookup, discovery, and ingestion
#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// Fetch documents by id; unknown ids are omitted, not errors
    async fn get(&self, ids: &[SourceId]) -> Result<Vec<SourceDocument>>;

    /// Discover documents relevant to a topic
    async fn search(&self, topic: &str, filters: &SearchFilters) -> Result<Vec<SourceDocument>>;

    /// Persist a discovered document. Returns the stored form; a failure
    /// drops only this source from the working corpus.
    async fn ingest(&self, doc: &SourceDocument) -> Result<SourceDocument>;
}

pub type SharedCorpusStore = Arc<dyn CorpusStore>;

// =============================================================================
// Passage Index
// =============================================================================

/// A scored passage hit from the search index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassageHit {
    pub source_id: SourceId,
    pub content: String,
    pub score: f32,
}

/// Full-text passage search over extracted chunks
#[async_trait]
pub trait PassageIndex: Send + Sync {
    /// Query passages, optionally restricted to sources and a score floor
    async fn query(
        &self,
        text: &str,
        source_ids: Option<&[SourceId]>,
        min_score: Option<f32>,
    ) -> Result<Vec<PassageHit>>;
}

pub type SharedPassageIndex = Arc<dyn PassageIndex>;

// =============================================================================
// Extraction Queue
// =============================================================================

/// Queue priority for background extraction jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePriority {
    High,
    Normal,
}

/// Background full-text extraction queue. Work continues independently of
/// the job that enqueued it.
#[async_trait]
pub trait ExtractionQueue: Send + Sync {
    async fn enqueue(&self, source_id: &SourceId, url: &str, priority: QueuePriority)
    -> Result<()>;
}

pub type SharedExtractionQueue = Arc<dyn ExtractionQueue>;

// =============================================================================
// Structural Profile
// =============================================================================

/// Document-type profile: section layout and citation-coverage targets.
/// Literature reviews carry a much higher coverage floor than empirical
/// articles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralProfile {
    /// Ordered sections the document type expects
    pub section_specs: Vec<SectionSpec>,
    /// Minimum distinct cited sources
    pub coverage_floor: usize,
    /// Fraction of the corpus that should be cited
    pub coverage_fraction: f32,
    /// Section keys this document type must not contain
    #[serde(default)]
    pub forbidden_sections: Vec<String>,
}

/// Read-only provider of structural profiles by document type
#[async_trait]
pub trait StructuralProfileProvider: Send + Sync {
    async fn profile(&self, document_type: &str) -> Result<StructuralProfile>;
}

pub type SharedProfileProvider = Arc<dyn StructuralProfileProvider>;

// =============================================================================
// Reference Lists
// =============================================================================

/// Access to a source's own bibliography, used by the secondary citation
/// backfill pass
#[async_trait]
pub trait ReferenceListProvider: Send + Sync {
    /// Author-year citation strings from the source's reference list
    async fn references(&self, source_id: &SourceId) -> Result<Vec<String>>;
}

pub type SharedReferenceLists = Arc<dyn ReferenceListProvider>;
