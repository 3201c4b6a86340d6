//! Corpus Data Model
//!
//! Source documents and the scored passages (chunks) retrieved from them.
//! A `SourceDocument` is immutable for the life of a job except for its
//! chunk count, which grows as background full-text extraction completes.
//! Chunks are ephemeral: recomputed per query, never persisted.

use serde::{Deserialize, Serialize};

use super::SourceId;

// =============================================================================
// Source Documents
// =============================================================================

/// A source document in the working corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Stable identifier in the corpus store
    pub id: SourceId,
    /// Document title
    pub title: String,
    /// Author names in citation order
    #[serde(default)]
    pub authors: Vec<String>,
    /// Publication year, when known
    #[serde(default)]
    pub year: Option<i32>,
    /// Abstract text, when available
    #[serde(default)]
    pub abstract_text: Option<String>,
    /// URL the document was discovered at
    #[serde(default)]
    pub url: Option<String>,
    /// Whether full text has been extracted into chunks
    #[serde(default)]
    pub has_full_text: bool,
    /// Known chunk count; grows asynchronously during extraction
    #[serde(default)]
    pub chunk_count: usize,
    /// Discovery relevance score, when the search backend provides one
    #[serde(default)]
    pub relevance: Option<f32>,
}

impl SourceDocument {
    pub fn new(id: impl Into<SourceId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            authors: Vec::new(),
            year: None,
            abstract_text: None,
            url: None,
            has_full_text: false,
            chunk_count: 0,
            relevance: None,
        }
    }

    /// First author's surname, or the title as a last resort
    pub fn lead_author(&self) -> &str {
        self.authors
            .first()
            .map(|a| a.as_str())
            .unwrap_or(&self.title)
    }

    /// "(Author, Year)" style attribution used by evidence backfill
    pub fn attribution(&self) -> String {
        match self.year {
            Some(year) => format!("({}, {})", self.lead_author(), year),
            None => format!("({})", self.lead_author()),
        }
    }
}

// =============================================================================
// Chunks
// =============================================================================

/// Which retrieval attempt produced a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkTier {
    /// Passage index hit at the given tier position (0 = strictest)
    Threshold(u8),
    /// Pseudo-chunk derived from the source's abstract
    Abstract,
}

impl std::fmt::Display for ChunkTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Threshold(tier) => write!(f, "tier-{}", tier),
            Self::Abstract => write!(f, "abstract"),
        }
    }
}

/// A scored passage of text from one source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Ephemeral identifier, unique within a retrieval result
    pub id: String,
    /// Owning source; must reference a document in the job's corpus
    pub source_id: SourceId,
    /// Passage text
    pub content: String,
    /// Relevance score in [0, 1]
    pub score: f32,
    /// Retrieval attempt that produced this chunk
    pub tier: ChunkTier,
}

impl Chunk {
    pub fn new(
        source_id: SourceId,
        content: impl Into<String>,
        score: f32,
        tier: ChunkTier,
    ) -> Self {
        let content = content.into();
        Self {
            id: format!("{}-{}", source_id, short_content_key(&content)),
            source_id,
            content,
            score: score.clamp(0.0, 1.0),
            tier,
        }
    }

    /// Word count of the passage
    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

/// Short stable key over chunk content, used for ids and dedup
pub fn short_content_key(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(content.as_bytes());
    hex_prefix(&digest, 8)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes
        .iter()
        .take(len.div_ceil(2))
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
        .chars()
        .take(len)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribution_with_year() {
        let mut doc = SourceDocument::new("s1", "A Study");
        doc.authors = vec!["Nakamura".to_string(), "Ortiz".to_string()];
        doc.year = Some(2021);
        assert_eq!(doc.attribution(), "(Nakamura, 2021)");
    }

    #[test]
    fn test_attribution_without_year_or_authors() {
        let doc = SourceDocument::new("s1", "Untitled Report");
        assert_eq!(doc.attribution(), "(Untitled Report)");
    }

    #[test]
    fn test_chunk_score_clamped() {
        let c = Chunk::new(SourceId::from("s1"), "some passage text", 1.7, ChunkTier::Abstract);
        assert_eq!(c.score, 1.0);
        let c = Chunk::new(SourceId::from("s1"), "some passage text", -0.3, ChunkTier::Abstract);
        assert_eq!(c.score, 0.0);
    }

    #[test]
    fn test_content_key_is_stable() {
        assert_eq!(short_content_key("abc"), short_content_key("abc"));
        assert_ne!(short_content_key("abc"), short_content_key("abd"));
        assert_eq!(short_content_key("abc").len(), 8);
    }
}
