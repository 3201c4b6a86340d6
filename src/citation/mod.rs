//! Citation Bookkeeping
//!
//! Tracks neutral citation tokens across a job, enforces the coverage
//! target supplied by the structural profile, and strips tokens that do not
//! resolve to a corpus source. Styled citation formatting is deferred to a
//! single later pass outside this crate; drafts carry only neutral tokens.
//!
//! ## Token format
//!
//! `[[cite:<source-id>]]` - bound to a source id, never pre-formatted
//! "(Author, Year)" text.

pub mod backfill;

pub use backfill::BackfillReport;

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;

use crate::constants::citation as citation_constants;
use crate::retrieval::ChunkRetriever;
use crate::services::{SharedReferenceLists, StructuralProfile};
use crate::types::SourceId;

/// Render the neutral citation token for a source
pub fn citation_token(id: &SourceId) -> String {
    format!("[[cite:{}]]", id)
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[cite:([^\]\s]+)\]\]").expect("valid citation token regex"))
}

/// All source ids referenced by citation tokens, in order of appearance
/// (duplicates preserved)
pub fn extract_source_ids(text: &str) -> Vec<SourceId> {
    token_regex()
        .captures_iter(text)
        .map(|c| SourceId::from(c[1].to_string()))
        .collect()
}

/// Distinct cited sources in order of first appearance
pub fn distinct_source_ids(text: &str) -> Vec<SourceId> {
    let mut seen = std::collections::HashSet::new();
    extract_source_ids(text)
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Token occurrences per source
pub fn citation_counts(text: &str) -> BTreeMap<SourceId, usize> {
    let mut counts = BTreeMap::new();
    for id in extract_source_ids(text) {
        *counts.entry(id).or_insert(0) += 1;
    }
    counts
}

/// Cleanup pass: drop tokens whose source id is not in the valid set.
/// Violating tokens are removed outright, never renumbered or rebound.
/// Returns the cleaned text and the ids that were stripped.
pub fn strip_invalid_tokens<F>(text: &str, is_valid: F) -> (String, Vec<SourceId>)
where
    F: Fn(&SourceId) -> bool,
{
    let mut stripped = Vec::new();
    let cleaned = token_regex()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let id = SourceId::from(caps[1].to_string());
            if is_valid(&id) {
                caps[0].to_string()
            } else {
                stripped.push(id);
                String::new()
            }
        })
        .into_owned();

    // Collapse doubled spaces left behind by removed tokens
    let cleaned = cleaned.replace("  ", " ");
    (cleaned, stripped)
}

/// Coverage target: `max(floor, ceil(source_count * fraction))`
pub fn coverage_target(source_count: usize, floor: usize, fraction: f32) -> usize {
    let fractional = (source_count as f32 * fraction).ceil() as usize;
    floor.max(fractional)
}

// =============================================================================
// Citation Coordinator
// =============================================================================

/// Per-job coordinator policy
#[derive(Debug, Clone)]
pub struct CitationConfig {
    /// Maximum backfilled citations per source
    pub per_source_cap: usize,
    /// Snippet budget for synthesized evidence sentences
    pub max_snippet_chars: usize,
    /// Fallbacks when no structural profile is supplied
    pub fallback_floor: usize,
    pub fallback_fraction: f32,
}

impl Default for CitationConfig {
    fn default() -> Self {
        Self {
            per_source_cap: citation_constants::PER_SOURCE_BACKFILL_CAP,
            max_snippet_chars: citation_constants::MAX_SNIPPET_CHARS,
            fallback_floor: citation_constants::DEFAULT_COVERAGE_FLOOR,
            fallback_fraction: citation_constants::DEFAULT_COVERAGE_FRACTION,
        }
    }
}

/// Tracks cited sources across a job and performs evidence-based backfill
pub struct CitationCoordinator {
    pub(crate) retriever: Arc<ChunkRetriever>,
    pub(crate) references: SharedReferenceLists,
    pub(crate) config: CitationConfig,
}

impl CitationCoordinator {
    pub fn new(retriever: Arc<ChunkRetriever>, references: SharedReferenceLists) -> Self {
        Self {
            retriever,
            references,
            config: CitationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CitationConfig) -> Self {
        self.config = config;
        self
    }

    /// Coverage target for a corpus under a structural profile
    pub fn target(&self, source_count: usize, profile: Option<&StructuralProfile>) -> usize {
        let (floor, fraction) = match profile {
            Some(p) => (p.coverage_floor, p.coverage_fraction),
            None => (self.config.fallback_floor, self.config.fallback_fraction),
        };
        coverage_target(source_count, floor, fraction)
    }

    /// Record every token in a drafted section into the job's cited set,
    /// with the section key as insertion context
    pub fn record_draft(
        &self,
        job: &mut crate::types::GenerationJob,
        content: &str,
        context: &str,
    ) {
        let ids = distinct_source_ids(content);
        debug!(cited = ids.len(), context, "Recording section citations");
        for id in ids {
            job.record_citation(crate::types::CitationRecord {
                token: citation_token(&id),
                source_id: id,
                context: context.to_string(),
            });
        }
    }
}
