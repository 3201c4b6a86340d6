//! Evidence-Based Citation Backfill
//!
//! When a job finishes drafting under the coverage target, uncited sources
//! are ranked by their best available chunk score and cited through
//! synthesized evidence sentences. A secondary pass falls back to plain
//! author-year strings from each source's own reference list. The cited
//! set only grows; nothing is ever pruned.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, instrument, warn};

use super::{CitationCoordinator, citation_counts, citation_token, distinct_source_ids};
use crate::constants::citation as citation_constants;
use crate::services::StructuralProfile;
use crate::types::{GenerationJob, Result, SourceDocument, SourceId};

/// What a backfill pass changed
#[derive(Debug, Clone, Default)]
pub struct BackfillReport {
    /// Sources cited through synthesized evidence sentences
    pub evidence_added: Vec<SourceId>,
    /// Sources cited through reference-list strings
    pub references_added: Vec<SourceId>,
    /// Cited count after the pass
    pub cited_after: usize,
    /// Coverage target that applied
    pub target: usize,
}

impl CitationCoordinator {
    /// Bring the document up to the citation-coverage target.
    ///
    /// Records existing tokens first, then backfills evidence sentences for
    /// the best-scoring uncited sources, then falls back to reference-list
    /// strings. Never removes a citation.
    #[instrument(skip_all, fields(sources = job.corpus.len()))]
    pub async fn ensure_coverage(
        &self,
        job: &mut GenerationJob,
        document: &mut String,
        profile: Option<&StructuralProfile>,
    ) -> Result<BackfillReport> {
        job.record_cited(distinct_source_ids(document));

        let target = self.target(job.corpus.len(), profile);
        let mut report = BackfillReport {
            target,
            ..Default::default()
        };

        if job.cited_count() >= target {
            report.cited_after = job.cited_count();
            debug!(cited = report.cited_after, target, "Coverage target already met");
            return Ok(report);
        }

        self.backfill_evidence(job, document, target, &mut report).await;

        if job.cited_count() < target {
            self.backfill_references(job, document, target, &mut report)
                .await;
        }

        report.cited_after = job.cited_count();
        info!(
            cited = report.cited_after,
            target,
            evidence = report.evidence_added.len(),
            references = report.references_added.len(),
            "Citation backfill finished"
        );
        Ok(report)
    }

    /// Primary pass: synthesize evidence sentences for uncited sources,
    /// best chunk score first
    async fn backfill_evidence(
        &self,
        job: &mut GenerationJob,
        document: &mut String,
        target: usize,
        report: &mut BackfillReport,
    ) {
        let uncited: Vec<SourceDocument> =
            job.uncited_sources().into_iter().cloned().collect();

        // Rank by each source's best available chunk
        let mut ranked: Vec<(SourceDocument, crate::types::Chunk)> = Vec::new();
        for doc in uncited {
            let single = std::slice::from_ref(&doc);
            match self.retriever.retrieve_lenient(&job.topic, single, 3).await {
                Ok(set) => {
                    if let Some(best) = set.chunks.into_iter().max_by(|a, b| {
                        a.score
                            .partial_cmp(&b.score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    }) {
                        ranked.push((doc, best));
                    }
                }
                Err(err) => {
                    debug!(source = %doc.id, error = %err, "No evidence available for backfill");
                }
            }
        }
        ranked.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for (doc, chunk) in ranked {
            if job.cited_count() >= target {
                break;
            }
            let existing = citation_counts(document)
                .get(&doc.id)
                .copied()
                .unwrap_or(0);
            if existing >= self.config.per_source_cap {
                warn!(source = %doc.id, "Per-source backfill cap reached");
                continue;
            }

            let sentence = evidence_sentence(&doc, &chunk.content, self.config.max_snippet_chars);
            insert_into_synthesis_section(document, &sentence);
            job.record_citation(crate::types::CitationRecord {
                token: citation_token(&doc.id),
                source_id: doc.id.clone(),
                context: "backfill".to_string(),
            });
            report.evidence_added.push(doc.id.clone());
        }
    }

    /// Secondary pass: plain author-year strings from each source's own
    /// reference list, skipping strings already present verbatim
    async fn backfill_references(
        &self,
        job: &mut GenerationJob,
        document: &mut String,
        target: usize,
        report: &mut BackfillReport,
    ) {
        let uncited: Vec<SourceDocument> =
            job.uncited_sources().into_iter().cloned().collect();

        for doc in uncited {
            if job.cited_count() >= target {
                break;
            }
            let strings = match self.references.references(&doc.id).await {
                Ok(s) => s,
                Err(err) => {
                    debug!(source = %doc.id, error = %err, "Reference list unavailable");
                    continue;
                }
            };
            let Some(citation) = strings.iter().find(|s| !document.contains(s.as_str())) else {
                continue;
            };

            insert_into_synthesis_section(
                document,
                &format!("Related work includes {}.", citation),
            );
            job.record_citation(crate::types::CitationRecord {
                token: citation.clone(),
                source_id: doc.id.clone(),
                context: "references".to_string(),
            });
            report.references_added.push(doc.id.clone());
        }
    }
}

// =============================================================================
// Snippet Synthesis
// =============================================================================

/// Build one evidence sentence from a source's best chunk
pub fn evidence_sentence(doc: &SourceDocument, chunk_content: &str, max_chars: usize) -> String {
    let snippet = truncate_at_word_boundary(
        &clean_snippet(chunk_content),
        max_chars,
        citation_constants::SNIPPET_BOUNDARY_FRACTION,
    );
    let snippet = snippet.trim_end_matches(['.', ',', ';', ':']);
    format!(
        "{}. {} {}",
        snippet,
        doc.attribution(),
        citation_token(&doc.id)
    )
}

/// Collapse whitespace and strip markup characters from chunk text
pub fn clean_snippet(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '#' | '`' | '>' | '|'))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to `max_chars`, snapping to the last word boundary when that
/// boundary sits past `boundary_fraction` of the budget; a boundary any
/// earlier means the text is effectively one unbreakable run and the cut
/// falls at the budget instead.
pub fn truncate_at_word_boundary(text: &str, max_chars: usize, boundary_fraction: f32) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }

    // Byte-safe cut point at or below the budget
    let mut cut = max_chars;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &text[..cut];

    let min_boundary = (max_chars as f32 * boundary_fraction) as usize;
    match head.rfind(char::is_whitespace) {
        Some(pos) if pos >= min_boundary => head[..pos].trim_end().to_string(),
        _ => head.to_string(),
    }
}

/// Insert a sentence into the synthesis section, located by heading match;
/// appends a new section when none exists
pub fn insert_into_synthesis_section(document: &mut String, sentence: &str) {
    static HEADING: OnceLock<Regex> = OnceLock::new();
    let heading = HEADING.get_or_init(|| {
        Regex::new(r"(?mi)^#{1,4}\s*(synthesis|discussion|conclusion)\b.*$")
            .expect("valid heading regex")
    });

    if let Some(m) = heading.find(document) {
        // End of the matched section: next heading after it, or end of doc
        static NEXT: OnceLock<Regex> = OnceLock::new();
        let next = NEXT.get_or_init(|| Regex::new(r"(?m)^#{1,4}\s").expect("valid heading regex"));
        let section_start = m.end();
        let insert_at = next
            .find_at(document, section_start)
            .map(|n| n.start())
            .unwrap_or(document.len());

        let insertion = format!("\n{}\n", sentence);
        document.insert_str(insert_at, &insertion);
    } else {
        document.push_str("\n\n## Synthesis of Sources\n\n");
        document.push_str(sentence);
        document.push('\n');
    }
}

// =============================================================================
// Tests
// =============================================================================
