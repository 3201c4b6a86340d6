//! Command-Line Interface
//!
//! Wires a generation job against fixture-backed collaborators: a JSON
//! corpus file stands in for the corpus store, passage index, and reference
//! lists, while the language model runs against a real provider. Production
//! deployments replace the fixtures with real service adapters.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use console::style;
use serde::Deserialize;
use tracing::info;

use crate::ai::{OpenAiCompatProvider, SharedModel};
use crate::citation::CitationCoordinator;
use crate::collector::PaperCollector;
use crate::config::{Config, ConfigLoader};
use crate::generator::{GenerationDriver, GenerationRequest};
use crate::pipeline::SectionPipeline;
use crate::retrieval::{ChunkCache, ChunkRetriever};
use crate::services::{
    CorpusStore, ExtractionQueue, PassageHit, PassageIndex, QueuePriority, ReferenceListProvider,
    SearchFilters,
};
use crate::types::{DraftError, Result, SourceDocument, SourceId};

// =============================================================================
// Corpus Fixture
// =============================================================================

/// On-disk corpus fixture backing the CLI collaborators
#[derive(Debug, Deserialize)]
pub struct CorpusFixture {
    pub documents: Vec<SourceDocument>,
    #[serde(default)]
    pub passages: Vec<FixturePassage>,
    #[serde(default)]
    pub references: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixturePassage {
    pub source_id: SourceId,
    pub content: String,
    pub score: f32,
}

impl CorpusFixture {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let fixture: Self = serde_json::from_str(&raw)?;
        if fixture.documents.is_empty() {
            return Err(DraftError::Config(format!(
                "corpus fixture '{}' contains no documents",
                path.display()
            )));
        }
        Ok(fixture)
    }
}

struct FixtureStore {
    documents: Vec<SourceDocument>,
}

#[async_trait]
impl CorpusStore for FixtureStore {
    async fn get(&self, ids: &[SourceId]) -> Result<Vec<SourceDocument>> {
        Ok(self
            .documents
            .iter()
            .filter(|d| ids.contains(&d.id))
            .cloned()
            .collect())
    }

    async fn search(&self, _topic: &str, filters: &SearchFilters) -> Result<Vec<SourceDocument>> {
        Ok(self
            .documents
            .iter()
            .filter(|d| !filters.exclude.contains(&d.id))
            .take(filters.limit)
            .cloned()
            .collect())
    }

    async fn ingest(&self, doc: &SourceDocument) -> Result<SourceDocument> {
        Ok(doc.clone())
    }
}

struct FixtureIndex {
    passages: Vec<FixturePassage>,
}

#[async_trait]
impl PassageIndex for FixtureIndex {
    async fn query(
        &self,
        _text: &str,
        source_ids: Option<&[SourceId]>,
        min_score: Option<f32>,
    ) -> Result<Vec<PassageHit>> {
        let floor = min_score.unwrap_or(0.0);
        Ok(self
            .passages
            .iter()
            .filter(|p| p.score >= floor)
            .filter(|p| source_ids.is_none_or(|ids| ids.contains(&p.source_id)))
            .map(|p| PassageHit {
                source_id: p.source_id.clone(),
                content: p.content.clone(),
                score: p.score,
            })
            .collect())
    }
}

struct FixtureReferences {
    references: HashMap<String, Vec<String>>,
}

#[async_trait]
impl ReferenceListProvider for FixtureReferences {
    async fn references(&self, source_id: &SourceId) -> Result<Vec<String>> {
        Ok(self
            .references
            .get(source_id.as_str())
            .cloned()
            .unwrap_or_default())
    }
}

/// Extraction happens out of process in real deployments; the fixture queue
/// only logs
struct LoggingQueue;

#[async_trait]
impl ExtractionQueue for LoggingQueue {
    async fn enqueue(&self, source_id: &SourceId, url: &str, _p: QueuePriority) -> Result<()> {
        info!(source = %source_id, url, "Extraction requested");
        Ok(())
    }
}

// =============================================================================
// Generate Command
// =============================================================================

/// Options for the `generate` subcommand
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub topic: String,
    pub corpus: PathBuf,
    pub pinned: Vec<String>,
    pub document_type: String,
    pub output: Option<PathBuf>,
}

/// Run one generation job against a corpus fixture
pub async fn run_generate(options: GenerateOptions) -> Result<()> {
    let config = ConfigLoader::load()?;
    let fixture = CorpusFixture::load(&options.corpus)?;
    let driver = build_driver(&config, fixture)?;

    // Stream progress to the terminal while the job runs
    let mut progress_rx = driver.progress().subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(update) = progress_rx.recv().await {
            eprintln!(
                "{} {:>3}% {}",
                style(format!("[{}]", update.stage)).cyan(),
                update.percent,
                update.message
            );
        }
    });

    let request = GenerationRequest::new(&options.topic)
        .with_pinned(options.pinned.iter().map(|s| SourceId::from(s.as_str())).collect())
        .with_document_type(&options.document_type);

    let result = driver.run(&request).await;
    printer.abort();

    let result = result?;

    if let Some(path) = &options.output {
        std::fs::write(path, &result.content)?;
        println!("{} wrote draft to {}", style("✓").green(), path.display());
    } else {
        println!("{}", result.content);
    }

    println!();
    println!(
        "{} {} words across {} sections",
        style("✓").green(),
        result.word_count,
        result.section_structure.len()
    );
    println!(
        "  cited {} of {} target sources, mean section score {:.1}",
        result.quality.cited_sources,
        result.quality.coverage_target,
        result.quality.mean_section_score
    );
    println!(
        "  {} model calls in {:.1}s",
        result.tool_calls.total_calls(),
        result.tool_calls.total_duration_ms as f64 / 1000.0
    );

    Ok(())
}

/// Assemble the driver from config and a corpus fixture
fn build_driver(config: &Config, fixture: CorpusFixture) -> Result<GenerationDriver> {
    let model: SharedModel = Arc::new(OpenAiCompatProvider::new(config.llm.clone())?);

    let store = Arc::new(FixtureStore {
        documents: fixture.documents,
    });
    let index = Arc::new(FixtureIndex {
        passages: fixture.passages,
    });
    let references = Arc::new(FixtureReferences {
        references: fixture.references,
    });

    let cache = Arc::new(ChunkCache::new(
        std::time::Duration::from_secs(config.retrieval.cache_ttl_secs),
        crate::constants::retrieval::CACHE_MAX_ENTRIES,
    ));
    let retriever = Arc::new(
        ChunkRetriever::new(index, cache).with_config(config.retrieval.retrieval_config()),
    );

    let collector = PaperCollector::new(store, Arc::new(LoggingQueue));
    let pipeline = SectionPipeline::new(model, Arc::clone(&retriever));
    let coordinator = CitationCoordinator::new(retriever, references)
        .with_config(config.citation.citation_config());

    Ok(GenerationDriver::new(collector, pipeline, coordinator)
        .with_constraints(config.collector.constraints()))
}
