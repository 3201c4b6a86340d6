//! Coverage Gating
//!
//! Decides which sources need background full-text extraction, classifies
//! URLs as direct full-text links versus publisher landing pages, and waits
//! on a coverage ratio before generation starts. Timing out never fails the
//! job: extraction continues in the background and drafting proceeds with
//! partial coverage.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::constants::collector as collector_constants;
use crate::services::SharedCorpusStore;
use crate::types::{Result, SourceDocument, SourceId};

/// File suffixes that mark a URL as directly fetchable full text
const FULL_TEXT_SUFFIXES: &[&str] = &[".pdf", ".txt", ".xml"];

/// Host/path fragments that mark a URL as directly fetchable full text
const FULL_TEXT_PATTERNS: &[&str] = &["arxiv.org/pdf", "/fulltext", "/full-text", "/pmc/articles"];

/// Host/path fragments that mark a URL as a publisher landing page
const LANDING_PATTERNS: &[&str] = &["doi.org", "/abstract", "/landing", "semanticscholar.org/paper"];

/// Coverage wait policy
#[derive(Debug, Clone)]
pub struct CoverageConfig {
    /// Sources below this chunk count are extraction candidates
    pub chunk_floor: usize,
    /// Fraction of sources that must meet the floor
    pub target_ratio: f32,
    /// Wait allowance per source needing work
    pub per_source_wait: Duration,
    /// Clamp bounds for the total wait
    pub min_wait: Duration,
    pub max_wait: Duration,
    /// Interval between coverage polls
    pub poll_interval: Duration,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            chunk_floor: collector_constants::CHUNK_FLOOR,
            target_ratio: collector_constants::TARGET_COVERAGE_RATIO,
            per_source_wait: Duration::from_secs(collector_constants::PER_SOURCE_WAIT_SECS),
            min_wait: Duration::from_secs(collector_constants::MIN_COVERAGE_WAIT_SECS),
            max_wait: Duration::from_secs(collector_constants::MAX_COVERAGE_WAIT_SECS),
            poll_interval: Duration::from_millis(collector_constants::POLL_INTERVAL_MS),
        }
    }
}

impl CoverageConfig {
    /// Total wait budget: `clamp(needing_work * per_source, min, max)`
    pub fn wait_budget(&self, sources_needing_work: usize) -> Duration {
        let raw = self.per_source_wait * sources_needing_work as u32;
        raw.clamp(self.min_wait, self.max_wait)
    }
}

/// Heuristic URL classification: direct full-text link, not a landing page.
/// Suffix/host pattern matching only, no content sniffing.
pub fn is_direct_full_text_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    let path = lower.split('?').next().unwrap_or(&lower);

    if LANDING_PATTERNS.iter().any(|p| lower.contains(p)) {
        return false;
    }
    FULL_TEXT_SUFFIXES.iter().any(|s| path.ends_with(s))
        || FULL_TEXT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Whether a source needs background extraction before it is useful for
/// retrieval: chunk count under the floor AND a URL we can actually fetch
pub fn needs_extraction(doc: &SourceDocument, chunk_floor: usize) -> bool {
    if doc.chunk_count >= chunk_floor {
        return false;
    }
    doc.url
        .as_deref()
        .map(is_direct_full_text_url)
        .unwrap_or(false)
}

/// Fraction of sources meeting the chunk floor. Vacuously 1.0 for an empty
/// set.
pub fn coverage_ratio(docs: &[SourceDocument], chunk_floor: usize) -> f32 {
    if docs.is_empty() {
        return 1.0;
    }
    let covered = docs.iter().filter(|d| d.chunk_count >= chunk_floor).count();
    covered as f32 / docs.len() as f32
}

/// Block until the corpus reaches the target coverage ratio or the wait
/// budget runs out. Returns the final observed ratio; timing out is not an
/// error.
#[instrument(skip(store, ids, config), fields(sources = ids.len()))]
pub async fn wait_for_coverage(
    store: &SharedCorpusStore,
    ids: &[SourceId],
    sources_needing_work: usize,
    config: &CoverageConfig,
) -> Result<f32> {
    let budget = config.wait_budget(sources_needing_work);
    let deadline = tokio::time::Instant::now() + budget;
    info!(
        needing_work = sources_needing_work,
        budget_secs = budget.as_secs(),
        "Waiting for content coverage"
    );

    loop {
        let docs = store.get(ids).await?;
        let ratio = coverage_ratio(&docs, config.chunk_floor);

        if ratio >= config.target_ratio {
            info!(ratio, "Coverage target reached");
            return Ok(ratio);
        }

        if tokio::time::Instant::now() >= deadline {
            warn!(
                ratio,
                target = config.target_ratio,
                "Coverage wait timed out; proceeding with partial coverage"
            );
            return Ok(ratio);
        }

        debug!(ratio, target = config.target_ratio, "Coverage below target, polling");
        tokio::time::sleep(config.poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_full_text_urls() {
        assert!(is_direct_full_text_url("https://arxiv.org/pdf/2101.00001"));
        assert!(is_direct_full_text_url("https://example.org/papers/x.pdf"));
        assert!(is_direct_full_text_url(
            "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC12345/"
        ));
        assert!(is_direct_full_text_url("https://host.org/a.pdf?download=1"));
    }

    #[test]
    fn test_landing_pages_rejected() {
        assert!(!is_direct_full_text_url("https://doi.org/10.1000/xyz"));
        assert!(!is_direct_full_text_url(
            "https://journal.example.org/article/abstract/123"
        ));
        assert!(!is_direct_full_text_url(
            "https://www.semanticscholar.org/paper/abc"
        ));
        assert!(!is_direct_full_text_url("https://example.org/article/123"));
    }

    #[test]
    fn test_needs_extraction() {
        let mut doc = SourceDocument::new("s1", "T");
        doc.url = Some("https://arxiv.org/pdf/1".to_string());
        doc.chunk_count = 2;
        assert!(needs_extraction(&doc, 10));

        // Enough chunks already
        doc.chunk_count = 10;
        assert!(!needs_extraction(&doc, 10));

        // No fetchable URL
        doc.chunk_count = 0;
        doc.url = Some("https://doi.org/10.1/abc".to_string());
        assert!(!needs_extraction(&doc, 10));
        doc.url = None;
        assert!(!needs_extraction(&doc, 10));
    }

    #[test]
    fn test_coverage_ratio() {
        assert_eq!(coverage_ratio(&[], 10), 1.0);

        let mut a = SourceDocument::new("a", "A");
        a.chunk_count = 12;
        let mut b = SourceDocument::new("b", "B");
        b.chunk_count = 3;
        let docs = vec![a, b];
        assert_eq!(coverage_ratio(&docs, 10), 0.5);
    }

    #[test]
    fn test_wait_budget_clamps() {
        let config = CoverageConfig::default();
        // 1 source * 90s -> clamped up to 120s
        assert_eq!(config.wait_budget(1), Duration::from_secs(120));
        // 3 sources * 90s = 270s, inside the clamp window
        assert_eq!(config.wait_budget(3), Duration::from_secs(270));
        // 20 sources * 90s = 1800s -> clamped down to 600s
        assert_eq!(config.wait_budget(20), Duration::from_secs(600));
    }
}
