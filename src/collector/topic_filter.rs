//! On-Topic Filter
//!
//! Gates discovered sources by combining significant-term overlap with the
//! topic (whole-word matching, minimum match ratio) and relevance-score
//! thresholds. Sources carrying no score at all are decided by the
//! configurable permissive policy.

use std::collections::HashSet;

use tracing::debug;

use crate::constants::collector as collector_constants;
use crate::types::SourceDocument;

/// Common words ignored when extracting significant topic terms
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "over", "under", "this", "that", "what", "when",
    "where", "which", "their", "about", "between", "through", "during", "using", "based", "study",
    "analysis", "effects", "effect", "impact", "role", "review",
];

/// Filter policy knobs
#[derive(Debug, Clone)]
pub struct TopicFilterConfig {
    /// Minimum fraction of topic terms that must match title/abstract
    pub min_match_ratio: f32,
    /// Minimum acceptable relevance score when one is present
    pub min_relevance: f32,
    /// Whether sources with no score at all pass the score gate
    pub permissive_scores: bool,
}

impl Default for TopicFilterConfig {
    fn default() -> Self {
        Self {
            min_match_ratio: collector_constants::MIN_TERM_MATCH_RATIO,
            min_relevance: collector_constants::MIN_RELEVANCE_SCORE,
            permissive_scores: true,
        }
    }
}

/// Significant-term on-topic filter
pub struct TopicFilter {
    terms: Vec<String>,
    config: TopicFilterConfig,
}

impl TopicFilter {
    pub fn new(topic: &str, config: TopicFilterConfig) -> Self {
        Self {
            terms: significant_terms(topic),
            config,
        }
    }

    /// Decide whether a discovered source belongs in the corpus
    pub fn is_on_topic(&self, doc: &SourceDocument) -> bool {
        if !self.passes_score_gate(doc) {
            debug!(source = %doc.id, score = ?doc.relevance, "Rejected by score gate");
            return false;
        }

        // No extractable topic terms: the term gate is vacuous
        if self.terms.is_empty() {
            return true;
        }

        let ratio = self.match_ratio(doc);
        let accepted = ratio >= self.config.min_match_ratio;
        if !accepted {
            debug!(
                source = %doc.id,
                ratio,
                threshold = self.config.min_match_ratio,
                "Rejected by term overlap"
            );
        }
        accepted
    }

    /// Fraction of topic terms appearing as whole words in title/abstract
    pub fn match_ratio(&self, doc: &SourceDocument) -> f32 {
        if self.terms.is_empty() {
            return 1.0;
        }
        let haystack = document_words(doc);
        let matched = self
            .terms
            .iter()
            .filter(|t| haystack.contains(t.as_str()))
            .count();
        matched as f32 / self.terms.len() as f32
    }

    fn passes_score_gate(&self, doc: &SourceDocument) -> bool {
        match doc.relevance {
            Some(score) => score >= self.config.min_relevance,
            None => self.config.permissive_scores,
        }
    }
}

/// Extract lowercase significant terms from a topic string
pub fn significant_terms(topic: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    topic
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() >= 4 && !STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Whole-word set over a document's title and abstract
fn document_words(doc: &SourceDocument) -> HashSet<String> {
    let mut text = doc.title.to_lowercase();
    if let Some(abs) = &doc.abstract_text {
        text.push(' ');
        text.push_str(&abs.to_lowercase());
    }
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}
