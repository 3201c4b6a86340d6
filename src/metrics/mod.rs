//! Quality Metrics Engine
//!
//! Computes quality scores for drafted section text: citation coverage,
//! relevance against the retrieved passages, citation density, and
//! structural shape. All sub-scores are 0-100 and clamp rather than
//! overflow; warnings accompany low scores so callers can log causes.

use std::collections::HashSet;

use tracing::debug;

use crate::citation::distinct_source_ids;
use crate::types::{Chunk, SectionSpec};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Citations per 100 words considered healthy (inclusive band)
    pub density_band: (f32, f32),
    /// Chunk-term overlap ratio that earns full relevance marks
    pub full_relevance_overlap: f32,
    /// Acceptable drafted/expected length ratio band
    pub length_band: (f32, f32),
    pub min_score: f32,
    pub max_score: f32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            density_band: (0.5, 4.0),
            full_relevance_overlap: 0.3,
            length_band: (0.6, 1.4),
            min_score: 0.0,
            max_score: 100.0,
        }
    }
}

/// Quality sub-scores for one drafted section
#[derive(Debug, Clone)]
pub struct SectionMetrics {
    /// Distinct cited sources against what the section had available
    pub citation_coverage: f32,
    /// Term overlap between the draft and its retrieved passages
    pub relevance: f32,
    /// Citation tokens per 100 words against the healthy band
    pub density: f32,
    /// Paragraph shape and length adherence
    pub structure: f32,
    pub warnings: Vec<String>,
}

impl SectionMetrics {
    /// Mean of the four sub-scores
    pub fn composite(&self) -> f32 {
        (self.citation_coverage + self.relevance + self.density + self.structure) / 4.0
    }
}

// =============================================================================
// Metrics Engine
// =============================================================================

/// Scores drafted text; pure computation, no collaborators
pub struct MetricsEngine {
    config: MetricsConfig,
}

impl Default for MetricsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsEngine {
    pub fn new() -> Self {
        Self {
            config: MetricsConfig::default(),
        }
    }

    pub fn with_config(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Score a drafted section against its spec and retrieval context
    pub fn score(&self, content: &str, spec: &SectionSpec, chunks: &[Chunk]) -> SectionMetrics {
        let mut warnings = Vec::new();

        let citation_coverage = self.citation_coverage(content, spec, &mut warnings);
        let relevance = self.relevance(content, chunks, &mut warnings);
        let density = self.density(content, &mut warnings);
        let structure = self.structure(content, spec, &mut warnings);

        let metrics = SectionMetrics {
            citation_coverage,
            relevance,
            density,
            structure,
            warnings,
        };
        debug!(
            section = %spec.key,
            coverage = metrics.citation_coverage,
            relevance = metrics.relevance,
            density = metrics.density,
            structure = metrics.structure,
            "Section scored"
        );
        metrics
    }

    fn clamp(&self, score: f32) -> f32 {
        score.clamp(self.config.min_score, self.config.max_score)
    }

    /// Distinct cited sources over the number the section could have used.
    /// Vacuously full marks when the section had no candidates.
    fn citation_coverage(
        &self,
        content: &str,
        spec: &SectionSpec,
        warnings: &mut Vec<String>,
    ) -> f32 {
        if spec.candidate_sources.is_empty() {
            return self.config.max_score;
        }
        let candidate_set: HashSet<&str> = spec
            .candidate_sources
            .iter()
            .map(|id| id.as_str())
            .collect();
        let cited = distinct_source_ids(content)
            .into_iter()
            .filter(|id| candidate_set.contains(id.as_str()))
            .count();

        // A section is not expected to cite every candidate; half is full marks
        let expected = (spec.candidate_sources.len() as f32 / 2.0).ceil().max(1.0);
        let ratio = (cited as f32 / expected).min(1.0);
        if cited == 0 {
            warnings.push("no candidate sources cited".to_string());
        }
        self.clamp(ratio * self.config.max_score)
    }

    /// Overlap between the draft's vocabulary and the retrieved passages'
    fn relevance(&self, content: &str, chunks: &[Chunk], warnings: &mut Vec<String>) -> f32 {
        if chunks.is_empty() {
            // Nothing to compare against; degrade mildly rather than zero out
            warnings.push("no retrieval context to score relevance against".to_string());
            return crate::constants::pipeline::DEGRADED_STAGE_SCORE;
        }

        let draft_terms = significant_words(content);
        let chunk_terms: HashSet<String> = chunks
            .iter()
            .flat_map(|c| significant_words(&c.content))
            .collect();
        if chunk_terms.is_empty() {
            return crate::constants::pipeline::DEGRADED_STAGE_SCORE;
        }

        let matched = chunk_terms.intersection(&draft_terms).count();
        let ratio = matched as f32 / chunk_terms.len() as f32;
        let scaled = (ratio / self.config.full_relevance_overlap).min(1.0);
        if scaled < 0.3 {
            warnings.push(format!(
                "draft shares only {:.0}% of passage vocabulary",
                ratio * 100.0
            ));
        }
        self.clamp(scaled * self.config.max_score)
    }

    /// Citation tokens per 100 words, scored against the healthy band
    fn density(&self, content: &str, warnings: &mut Vec<String>) -> f32 {
        let words = content.split_whitespace().count();
        if words == 0 {
            warnings.push("empty draft".to_string());
            return self.config.min_score;
        }
        let citations = crate::citation::extract_source_ids(content).len();
        let per_100 = citations as f32 * 100.0 / words as f32;

        let (low, high) = self.config.density_band;
        let score = if per_100 >= low && per_100 <= high {
            self.config.max_score
        } else if per_100 < low {
            // Linear ramp from zero citations to the low edge
            (per_100 / low) * self.config.max_score
        } else {
            // Over-citation falls off gently
            (high / per_100) * self.config.max_score
        };
        if per_100 < low {
            warnings.push(format!("citation density {:.2}/100 words is low", per_100));
        }
        self.clamp(score)
    }

    /// Paragraph shape and length adherence
    fn structure(&self, content: &str, spec: &SectionSpec, warnings: &mut Vec<String>) -> f32 {
        let words = content.split_whitespace().count();
        if words == 0 {
            return self.config.min_score;
        }

        let paragraphs = content
            .split("\n\n")
            .filter(|p| !p.trim().is_empty())
            .count()
            .max(1);
        let expected_paragraphs =
            (spec.expected_words / crate::constants::pipeline::WORDS_PER_PARAGRAPH).max(1);
        let paragraph_ratio = paragraphs.min(expected_paragraphs) as f32
            / paragraphs.max(expected_paragraphs) as f32;

        let length_ratio = words as f32 / spec.expected_words.max(1) as f32;
        let (low, high) = self.config.length_band;
        let length_score = if length_ratio >= low && length_ratio <= high {
            1.0
        } else if length_ratio < low {
            length_ratio / low
        } else {
            high / length_ratio
        };
        if length_ratio < low {
            warnings.push(format!(
                "draft is {:.0}% of the target length",
                length_ratio * 100.0
            ));
        }

        self.clamp((paragraph_ratio * 0.4 + length_score * 0.6) * self.config.max_score)
    }
}

/// Lowercase words long enough to carry meaning
fn significant_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() >= 5)
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkTier, SourceId};

    fn spec(expected_words: usize, candidates: &[&str]) -> SectionSpec {
        SectionSpec::new("results", "Results", expected_words)
            .with_sources(candidates.iter().map(|s| SourceId::from(*s)).collect())
    }

    fn chunk(content: &str) -> Chunk {
        Chunk::new(SourceId::from("s1"), content, 0.6, ChunkTier::Threshold(0))
    }

    fn engine() -> MetricsEngine {
        MetricsEngine::new()
    }

    #[test]
    fn test_scores_bounded_zero_to_hundred() {
        let m = engine().score("", &spec(400, &["a"]), &[]);
        for score in [m.citation_coverage, m.relevance, m.density, m.structure] {
            assert!((0.0..=100.0).contains(&score));
        }
        assert!((0.0..=100.0).contains(&m.composite()));
    }

    #[test]
    fn test_citation_coverage_vacuous_without_candidates() {
        let m = engine().score("No citations at all in this text.", &spec(100, &[]), &[]);
        assert_eq!(m.citation_coverage, 100.0);
    }

    #[test]
    fn test_citation_coverage_rewards_cited_candidates() {
        let content = "Observed effects were strong [[cite:a]] and replicated [[cite:b]].";
        let m = engine().score(content, &spec(100, &["a", "b", "c", "d"]), &[]);
        // 2 cited of expected ceil(4/2)=2 -> full marks
        assert_eq!(m.citation_coverage, 100.0);

        let none = engine().score("No citations.", &spec(100, &["a", "b"]), &[]);
        assert_eq!(none.citation_coverage, 0.0);
        assert!(none.warnings.iter().any(|w| w.contains("no candidate")));
    }

    #[test]
    fn test_citations_outside_candidates_ignored() {
        let content = "Cited something foreign [[cite:zzz]].";
        let m = engine().score(content, &spec(100, &["a", "b"]), &[]);
        assert_eq!(m.citation_coverage, 0.0);
    }

    #[test]
    fn test_relevance_tracks_passage_vocabulary() {
        let passage = "Sediment sampling revealed increasing microplastic concentration gradients.";
        let echoing =
            "The sampling campaign found microplastic concentration gradients in sediment cores.";
        let unrelated = "A short note about medieval castle architecture and garden design.";

        let high = engine().score(echoing, &spec(20, &[]), &[chunk(passage)]);
        let low = engine().score(unrelated, &spec(20, &[]), &[chunk(passage)]);
        assert!(high.relevance > low.relevance);
    }

    #[test]
    fn test_relevance_degrades_gracefully_without_chunks() {
        let m = engine().score("Some text here.", &spec(50, &[]), &[]);
        assert_eq!(m.relevance, crate::constants::pipeline::DEGRADED_STAGE_SCORE);
    }

    #[test]
    fn test_density_band() {
        // ~100 words with 2 citations = 2.0/100 -> inside the band
        let mut content = String::new();
        for i in 0..100 {
            content.push_str(&format!("word{} ", i));
        }
        content.push_str("[[cite:a]] [[cite:b]]");
        let m = engine().score(&content, &spec(100, &[]), &[]);
        assert_eq!(m.density, 100.0);

        // Zero citations -> zero density score and a warning
        let none = engine().score("just words without any tokens here", &spec(100, &[]), &[]);
        assert_eq!(none.density, 0.0);
        assert!(none.warnings.iter().any(|w| w.contains("density")));
    }

    #[test]
    fn test_structure_rewards_matching_shape() {
        // 300-word target -> 2 expected paragraphs
        let mut good = String::new();
        for i in 0..150 {
            good.push_str(&format!("alpha{} ", i));
        }
        good.push_str("\n\n");
        for i in 0..150 {
            good.push_str(&format!("beta{} ", i));
        }
        let m = engine().score(&good, &spec(300, &[]), &[]);
        assert!(m.structure > 90.0);

        // Tiny single-block draft against the same target
        let poor = engine().score("one short block", &spec(300, &[]), &[]);
        assert!(poor.structure < m.structure);
        assert!(poor.warnings.iter().any(|w| w.contains("target length")));
    }

    #[test]
    fn test_composite_is_mean_of_subscores() {
        let m = SectionMetrics {
            citation_coverage: 100.0,
            relevance: 50.0,
            density: 100.0,
            structure: 50.0,
            warnings: vec![],
        };
        assert_eq!(m.composite(), 75.0);
    }
}
