//! Generation Driver
//!
//! Orchestrates one generation job end to end: corpus collection, sequential
//! section drafting with a rolling summary, citation backfill, token
//! cleanup, and result assembly. All retries route through the classified
//! retry executor; only user-action and fatal errors surface unretried.
//!
//! Sections run sequentially, not in parallel, so later sections can build
//! on a rolling summary of earlier ones and the language-model service sees
//! bounded concurrent load.

pub mod progress;

pub use progress::{ProgressReporter, ProgressUpdate};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument, warn};

use crate::ai::retry::{report_terminal, with_retries};
use crate::citation::{CitationCoordinator, citation_counts, strip_invalid_tokens};
use crate::collector::{CollectionConstraints, PaperCollector};
use crate::pipeline::{SectionContext, SectionPipeline};
use crate::services::{SharedProfileProvider, StructuralProfile};
use crate::types::{
    GenerationJob, GenerationResult, JobQualityMetrics, ProgressStage, Result, SectionOutcome,
    SectionSpec, SourceId, ToolCallAnalytics,
};

// =============================================================================
// Request
// =============================================================================

/// One generation request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub topic: String,
    /// Sources the caller pinned into the corpus
    pub pinned: Vec<SourceId>,
    /// Document type resolved against the structural-profile service
    pub document_type: String,
}

impl GenerationRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            pinned: Vec::new(),
            document_type: "article".to_string(),
        }
    }

    pub fn with_pinned(mut self, pinned: Vec<SourceId>) -> Self {
        self.pinned = pinned;
        self
    }

    pub fn with_document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = document_type.into();
        self
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Single-owner job driver
pub struct GenerationDriver {
    collector: PaperCollector,
    pipeline: SectionPipeline,
    coordinator: CitationCoordinator,
    profiles: Option<SharedProfileProvider>,
    progress: Arc<ProgressReporter>,
    constraints: CollectionConstraints,
}

impl GenerationDriver {
    pub fn new(
        collector: PaperCollector,
        pipeline: SectionPipeline,
        coordinator: CitationCoordinator,
    ) -> Self {
        Self {
            collector,
            pipeline,
            coordinator,
            profiles: None,
            progress: Arc::new(ProgressReporter::new()),
            constraints: CollectionConstraints::default(),
        }
    }

    pub fn with_profiles(mut self, profiles: SharedProfileProvider) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn with_constraints(mut self, constraints: CollectionConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Progress reporter handle for subscribers
    pub fn progress(&self) -> Arc<ProgressReporter> {
        Arc::clone(&self.progress)
    }

    /// Run one generation job to completion
    #[instrument(skip(self, request), fields(topic = %request.topic))]
    pub async fn run(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        match self.run_inner(request).await {
            Ok(result) => {
                self.progress.stage(ProgressStage::Complete, "generation complete");
                Ok(result)
            }
            Err(err) => {
                report_terminal("generation", &err);
                self.progress.report(
                    ProgressStage::Failed,
                    ProgressStage::Failed.base_percent(),
                    err.user_message(),
                );
                Err(err)
            }
        }
    }

    async fn run_inner(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let started = Instant::now();
        let mut job = GenerationJob::new(request.topic.clone());
        let mut analytics = ToolCallAnalytics::default();

        // ---------------------------------------------------------------------
        // Collection
        // ---------------------------------------------------------------------
        self.progress.stage(ProgressStage::Searching, "collecting sources");
        let collected = with_retries("collect", || {
            self.collector
                .collect(&request.topic, &request.pinned, &self.constraints)
        })
        .await?;
        for warning in &collected.warnings {
            warn!(topic = %request.topic, warning = %warning, "Collection warning");
        }
        job.corpus = collected.documents;

        // ---------------------------------------------------------------------
        // Structural profile
        // ---------------------------------------------------------------------
        self.progress.stage(ProgressStage::Analyzing, "resolving document profile");
        let profile = self.load_profile(&request.document_type).await;
        let specs = self.section_specs(&job, profile.as_ref());

        // ---------------------------------------------------------------------
        // Sequential section drafting
        // ---------------------------------------------------------------------
        job.stage = ProgressStage::Writing;
        let mut rolling_summary = String::new();
        let mut prior_score: Option<f32> = None;
        let writing_band = ProgressStage::Citations.base_percent()
            - ProgressStage::Writing.base_percent();

        for (idx, spec) in specs.iter().enumerate() {
            let percent = ProgressStage::Writing.base_percent()
                + (writing_band as usize * idx / specs.len().max(1)) as u8;
            self.progress.report(
                ProgressStage::Writing,
                percent,
                format!("drafting '{}'", spec.title),
            );

            let sources = section_sources(&job, spec);
            let output = with_retries("section", || {
                let ctx = SectionContext {
                    topic: &job.topic,
                    spec,
                    sources: &sources,
                    rolling_summary: &rolling_summary,
                    prior_score,
                };
                async move { self.pipeline.run(&ctx).await }
            })
            .await?;

            analytics.planning_calls += output.planning_calls;
            analytics.writing_calls += output.writing_calls;
            analytics.reflection_calls += output.reflection_calls;

            self.coordinator
                .record_draft(&mut job, &output.draft.content, spec.key.as_str());
            push_summary_line(&mut rolling_summary, &output.draft.title, &output.draft.content);
            prior_score = Some(output.draft.quality.composite());
            job.sections.push(output.draft);
        }

        // ---------------------------------------------------------------------
        // Citation backfill and cleanup
        // ---------------------------------------------------------------------
        self.progress.stage(ProgressStage::Citations, "enforcing citation coverage");
        job.stage = ProgressStage::Citations;
        let mut document = assemble_document(&job);

        let backfill = self
            .coordinator
            .ensure_coverage(&mut job, &mut document, profile.as_ref())
            .await?;
        analytics.backfill_calls +=
            backfill.evidence_added.len() + backfill.references_added.len();

        // Tokens must resolve to corpus sources; violators are dropped, never
        // renumbered
        let (document, stripped) = strip_invalid_tokens(&document, |id| job.contains_source(id));
        if !stripped.is_empty() {
            warn!(count = stripped.len(), "Stripped citation tokens with no corpus source");
        }

        analytics.total_duration_ms = started.elapsed().as_millis() as u64;
        let result = assemble_result(&job, document, backfill.target, analytics);

        info!(
            topic = %request.topic,
            sections = result.section_structure.len(),
            words = result.word_count,
            cited = result.quality.cited_sources,
            "Job finished"
        );
        Ok(result)
    }

    async fn load_profile(&self, document_type: &str) -> Option<StructuralProfile> {
        let provider = self.profiles.as_ref()?;
        match provider.profile(document_type).await {
            Ok(profile) => Some(profile),
            Err(err) => {
                warn!(document_type, error = %err, "Structural profile unavailable; using fallbacks");
                None
            }
        }
    }

    /// Section specs from the profile, minus forbidden sections; a default
    /// article skeleton when no profile is available
    fn section_specs(
        &self,
        job: &GenerationJob,
        profile: Option<&StructuralProfile>,
    ) -> Vec<SectionSpec> {
        let all_sources: Vec<SourceId> = job.corpus.iter().map(|d| d.id.clone()).collect();

        let mut specs = match profile {
            Some(p) if !p.section_specs.is_empty() => {
                let forbidden: Vec<&str> =
                    p.forbidden_sections.iter().map(|s| s.as_str()).collect();
                p.section_specs
                    .iter()
                    .filter(|s| !forbidden.contains(&s.key.as_str()))
                    .cloned()
                    .collect()
            }
            _ => vec![
                SectionSpec::new("introduction", "Introduction", 400),
                SectionSpec::new("literature_review", "Literature Review", 800),
                SectionSpec::new("discussion", "Discussion", 700),
                SectionSpec::new("conclusion", "Conclusion", 300),
            ],
        };

        // Sections without an explicit candidate set may draw on the whole
        // corpus
        for spec in &mut specs {
            if spec.candidate_sources.is_empty() {
                spec.candidate_sources = all_sources.clone();
            }
        }
        specs
    }
}

// =============================================================================
// Assembly Helpers
// =============================================================================

/// Corpus documents a section may draw on
fn section_sources(job: &GenerationJob, spec: &SectionSpec) -> Vec<crate::types::SourceDocument> {
    job.corpus
        .iter()
        .filter(|d| spec.candidate_sources.contains(&d.id))
        .cloned()
        .collect()
}

/// First sentence of a drafted section, added to the rolling summary
fn push_summary_line(summary: &mut String, title: &str, content: &str) {
    let first_sentence = content
        .split_inclusive(['.', '!', '?'])
        .next()
        .unwrap_or(content)
        .trim()
        .chars()
        .take(200)
        .collect::<String>();
    if !summary.is_empty() {
        summary.push('\n');
    }
    summary.push_str(&format!("- {}: {}", title, first_sentence));
}

/// Assemble the full document from drafted sections
fn assemble_document(job: &GenerationJob) -> String {
    let mut document = format!("# {}\n", job.topic);
    for section in &job.sections {
        document.push_str(&format!("\n## {}\n\n{}\n", section.title, section.content));
    }
    document
}

fn assemble_result(
    job: &GenerationJob,
    document: String,
    coverage_target: usize,
    tool_calls: ToolCallAnalytics,
) -> GenerationResult {
    let citation_map: BTreeMap<SourceId, usize> = citation_counts(&document);
    let word_count = document.split_whitespace().count();

    let section_structure: Vec<SectionOutcome> = job
        .sections
        .iter()
        .map(|s| SectionOutcome {
            key: s.key.to_string(),
            title: s.title.clone(),
            word_count: s.word_count(),
            composite_score: s.quality.composite(),
            reflection_cycles: s.revision,
        })
        .collect();

    let mean_section_score = if job.sections.is_empty() {
        0.0
    } else {
        job.sections
            .iter()
            .map(|s| s.quality.composite())
            .sum::<f32>()
            / job.sections.len() as f32
    };

    let quality = JobQualityMetrics {
        mean_section_score,
        citation_coverage: if coverage_target == 0 {
            1.0
        } else {
            (job.cited_count() as f32 / coverage_target as f32).min(1.0)
        },
        cited_sources: job.cited_count(),
        coverage_target,
    };

    GenerationResult {
        content: document,
        citation_map,
        word_count,
        section_structure,
        quality,
        tool_calls,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::ai::{LanguageModel, LmResponse};
    use crate::retrieval::{ChunkCache, ChunkRetriever};
    use crate::services::{
        CorpusStore, ExtractionQueue, PassageHit, PassageIndex, QueuePriority,
        ReferenceListProvider, SearchFilters, StructuralProfileProvider,
    };
    use crate::types::{DraftError, SourceDocument};

    struct MockStore {
        docs: Vec<SourceDocument>,
    }

    #[async_trait]
    impl CorpusStore for MockStore {
        async fn get(&self, ids: &[SourceId]) -> Result<Vec<SourceDocument>> {
            Ok(self
                .docs
                .iter()
                .filter(|d| ids.contains(&d.id))
                .cloned()
                .collect())
        }

        async fn search(&self, _topic: &str, _f: &SearchFilters) -> Result<Vec<SourceDocument>> {
            Ok(Vec::new())
        }

        async fn ingest(&self, doc: &SourceDocument) -> Result<SourceDocument> {
            Ok(doc.clone())
        }
    }

    struct NoopQueue;

    #[async_trait]
    impl ExtractionQueue for NoopQueue {
        async fn enqueue(&self, _s: &SourceId, _u: &str, _p: QueuePriority) -> Result<()> {
            Ok(())
        }
    }

    struct MockIndex {
        hits: HashMap<String, Vec<PassageHit>>,
    }

    #[async_trait]
    impl PassageIndex for MockIndex {
        async fn query(
            &self,
            _text: &str,
            source_ids: Option<&[SourceId]>,
            _min: Option<f32>,
        ) -> Result<Vec<PassageHit>> {
            let ids = source_ids.unwrap_or(&[]);
            Ok(ids
                .iter()
                .flat_map(|id| self.hits.get(id.as_str()).cloned().unwrap_or_default())
                .collect())
        }
    }

    struct MockModel {
        drafts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for MockModel {
        async fn generate_text(&self, _prompt: &str) -> Result<LmResponse<String>> {
            let mut queue = self.drafts.lock().unwrap();
            let content = if queue.is_empty() {
                "A generic drafted paragraph citing the corpus [[cite:a]].".to_string()
            } else {
                queue.remove(0)
            };
            Ok(LmResponse::content_only(content))
        }

        async fn generate_structured(
            &self,
            _prompt: &str,
            _schema: &Value,
        ) -> Result<LmResponse<Value>> {
            Ok(LmResponse::content_only(serde_json::json!({
                "outline": ["One", "Two", "Three"],
                "citation_needs": [
                    {"placeholder": "need_one", "purpose": "p"},
                    {"placeholder": "need_two", "purpose": "p"}
                ],
                "paragraph_estimate": 3
            })))
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn model(&self) -> &str {
            "mock-model"
        }
    }

    struct MockProfiles {
        profile: StructuralProfile,
    }

    #[async_trait]
    impl StructuralProfileProvider for MockProfiles {
        async fn profile(&self, _t: &str) -> Result<StructuralProfile> {
            Ok(self.profile.clone())
        }
    }

    struct EmptyRefs;

    #[async_trait]
    impl ReferenceListProvider for EmptyRefs {
        async fn references(&self, _s: &SourceId) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn corpus_doc(id: &str, author: &str) -> SourceDocument {
        let mut d = SourceDocument::new(id, format!("Paper by {author}"));
        d.authors = vec![author.to_string()];
        d.year = Some(2022);
        d.chunk_count = 20;
        d.abstract_text = Some(format!(
            "An abstract from {author} about measured coastal biodiversity decline patterns."
        ));
        d.relevance = Some(0.9);
        d
    }

    fn hits_for(docs: &[SourceDocument]) -> HashMap<String, Vec<PassageHit>> {
        docs.iter()
            .map(|d| {
                (
                    d.id.to_string(),
                    vec![PassageHit {
                        source_id: d.id.clone(),
                        content: format!(
                            "Passage from {} documenting coastal biodiversity decline in detail.",
                            d.title
                        ),
                        score: 0.7,
                    }],
                )
            })
            .collect()
    }

    fn driver(docs: Vec<SourceDocument>, profile: Option<StructuralProfile>) -> GenerationDriver {
        let store = Arc::new(MockStore { docs: docs.clone() });
        let collector = PaperCollector::new(store, Arc::new(NoopQueue));

        let retriever = Arc::new(ChunkRetriever::new(
            Arc::new(MockIndex {
                hits: hits_for(&docs),
            }),
            Arc::new(ChunkCache::default()),
        ));
        let model = Arc::new(MockModel {
            drafts: Mutex::new(Vec::new()),
        });
        let pipeline = SectionPipeline::new(model, Arc::clone(&retriever));
        let coordinator = CitationCoordinator::new(retriever, Arc::new(EmptyRefs));

        let mut d = GenerationDriver::new(collector, pipeline, coordinator)
            .with_constraints(CollectionConstraints {
                discovery_enabled: false,
                ..Default::default()
            });
        if let Some(p) = profile {
            d = d.with_profiles(Arc::new(MockProfiles { profile: p }));
        }
        d
    }

    fn small_profile() -> StructuralProfile {
        StructuralProfile {
            section_specs: vec![
                SectionSpec::new("introduction", "Introduction", 200),
                SectionSpec::new("discussion", "Discussion", 300),
            ],
            coverage_floor: 1,
            coverage_fraction: 0.3,
            forbidden_sections: vec!["appendix".to_string()],
        }
    }

    fn request(pinned: &[&str]) -> GenerationRequest {
        GenerationRequest::new("coastal biodiversity decline")
            .with_pinned(pinned.iter().map(|s| SourceId::from(*s)).collect())
    }

    #[tokio::test]
    async fn test_full_job_produces_cited_result() {
        let docs = vec![corpus_doc("a", "Adeyemi"), corpus_doc("b", "Brandt")];
        let d = driver(docs, Some(small_profile()));

        let result = d.run(&request(&["a", "b"])).await.unwrap();

        assert_eq!(result.section_structure.len(), 2);
        assert!(result.word_count > 0);
        assert!(result.content.contains("## Introduction"));
        assert!(result.content.contains("[[cite:a]]"));
        assert!(result.quality.cited_sources >= 1);
        assert!(result.tool_calls.writing_calls >= 2);
    }

    #[tokio::test]
    async fn test_forbidden_sections_filtered() {
        let mut profile = small_profile();
        profile
            .section_specs
            .push(SectionSpec::new("appendix", "Appendix", 100));
        let docs = vec![corpus_doc("a", "Adeyemi")];
        let d = driver(docs, Some(profile));

        let result = d.run(&request(&["a"])).await.unwrap();
        assert!(!result.content.contains("## Appendix"));
    }

    #[tokio::test]
    async fn test_default_skeleton_without_profile() {
        let docs = vec![corpus_doc("a", "Adeyemi")];
        let d = driver(docs, None);

        let result = d.run(&request(&["a"])).await.unwrap();
        assert!(result.content.contains("## Introduction"));
        assert!(result.content.contains("## Conclusion"));
    }

    #[tokio::test]
    async fn test_invalid_tokens_stripped_from_final_content() {
        let docs = vec![corpus_doc("a", "Adeyemi")];
        let d = {
            // The model emits a token for a source outside the corpus
            let store = Arc::new(MockStore { docs: docs.clone() });
            let collector = PaperCollector::new(store, Arc::new(NoopQueue));
            let retriever = Arc::new(ChunkRetriever::new(
                Arc::new(MockIndex {
                    hits: hits_for(&docs),
                }),
                Arc::new(ChunkCache::default()),
            ));
            let model = Arc::new(MockModel {
                drafts: Mutex::new(vec![
                    "Claim from the corpus [[cite:a]] and a ghost claim [[cite:ghost]]."
                        .to_string();
                    4
                ]),
            });
            let pipeline = SectionPipeline::new(model, Arc::clone(&retriever));
            let coordinator = CitationCoordinator::new(retriever, Arc::new(EmptyRefs));
            GenerationDriver::new(collector, pipeline, coordinator)
                .with_profiles(Arc::new(MockProfiles {
                    profile: small_profile(),
                }))
                .with_constraints(CollectionConstraints {
                    discovery_enabled: false,
                    ..Default::default()
                })
        };

        let result = d.run(&request(&["a"])).await.unwrap();
        assert!(result.content.contains("[[cite:a]]"));
        assert!(!result.content.contains("[[cite:ghost]]"));
        // Prose around the stripped token survives
        assert!(result.content.contains("ghost claim"));
        assert!(!result.citation_map.contains_key(&SourceId::from("ghost")));
    }

    #[tokio::test]
    async fn test_empty_corpus_fails_with_user_action() {
        let d = driver(vec![], Some(small_profile()));
        let mut rx = d.progress().subscribe();

        let err = d.run(&request(&[])).await.unwrap_err();
        assert!(matches!(err, DraftError::EmptyCorpus { .. }));

        let mut saw_failed = false;
        while let Ok(update) = rx.try_recv() {
            if update.stage == ProgressStage::Failed {
                saw_failed = true;
            }
        }
        assert!(saw_failed);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_through_success() {
        let docs = vec![corpus_doc("a", "Adeyemi")];
        let d = driver(docs, Some(small_profile()));
        let mut rx = d.progress().subscribe();

        d.run(&request(&["a"])).await.unwrap();

        let mut last = 0u8;
        while let Ok(update) = rx.try_recv() {
            assert!(update.percent >= last);
            last = update.percent;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_summary_line_takes_first_sentence() {
        let mut summary = String::new();
        push_summary_line(&mut summary, "Results", "Effect found. More detail follows.");
        push_summary_line(&mut summary, "Discussion", "Interpretation here.");
        assert_eq!(
            summary,
            "- Results: Effect found.\n- Discussion: Interpretation here."
        );
    }

    #[test]
    fn test_assemble_document_orders_sections() {
        let mut job = GenerationJob::new("topic");
        job.sections.push(crate::types::SectionDraft::new(
            crate::types::SectionKey::new("intro"),
            "Intro",
            "First.",
        ));
        job.sections.push(crate::types::SectionDraft::new(
            crate::types::SectionKey::new("body"),
            "Body",
            "Second.",
        ));
        let doc = assemble_document(&job);
        let intro = doc.find("## Intro").unwrap();
        let body = doc.find("## Body").unwrap();
        assert!(intro < body);
    }
}
