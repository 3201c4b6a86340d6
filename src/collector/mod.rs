//! Source Collection
//!
//! Assembles the working corpus for a generation job: pinned sources are
//! always included, discovery fills the remaining slots through the on-topic
//! filter, and coverage gating holds the job until enough sources have full
//! text extracted (or the wait budget runs out).
//!
//! ## Degradation ladder
//!
//! - Search failure: pinned-only corpus with a warning
//! - Ingestion failure: that source is dropped, the batch continues
//! - Coverage timeout: generation proceeds with partial coverage
//! - Empty final corpus: terminal user-action error

pub mod coverage;
pub mod topic_filter;

pub use coverage::{CoverageConfig, coverage_ratio, is_direct_full_text_url, needs_extraction};
pub use topic_filter::{TopicFilter, TopicFilterConfig, significant_terms};

use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::constants::collector as collector_constants;
use crate::services::{
    QueuePriority, SearchFilters, SharedCorpusStore, SharedExtractionQueue,
};
use crate::types::{DraftError, Result, SourceDocument, SourceId};

// =============================================================================
// Constraints & Outcome
// =============================================================================

/// Caller-supplied collection constraints
#[derive(Debug, Clone)]
pub struct CollectionConstraints {
    /// Target corpus size (pinned + discovered)
    pub target_total: usize,
    /// Whether to discover sources beyond the pinned set
    pub discovery_enabled: bool,
    /// On-topic filter policy
    pub filter: TopicFilterConfig,
    /// Coverage gating policy
    pub coverage: CoverageConfig,
}

impl Default for CollectionConstraints {
    fn default() -> Self {
        Self {
            target_total: collector_constants::DEFAULT_TARGET_TOTAL,
            discovery_enabled: true,
            filter: TopicFilterConfig::default(),
            coverage: CoverageConfig::default(),
        }
    }
}

/// Assembled corpus plus collection diagnostics
#[derive(Debug, Clone)]
pub struct CollectedCorpus {
    pub documents: Vec<SourceDocument>,
    /// Coverage ratio observed when gating finished
    pub coverage_ratio: f32,
    /// Human-readable degradation notes
    pub warnings: Vec<String>,
}

// =============================================================================
// Paper Collector
// =============================================================================

/// Assembles the working corpus from pinned and discovered sources
pub struct PaperCollector {
    store: SharedCorpusStore,
    queue: SharedExtractionQueue,
}

impl PaperCollector {
    pub fn new(store: SharedCorpusStore, queue: SharedExtractionQueue) -> Self {
        Self { store, queue }
    }

    /// Collect the corpus for a topic. Pinned sources are always included
    /// and excluded from discovery.
    #[instrument(skip(self, pinned_ids, constraints), fields(pinned = pinned_ids.len()))]
    pub async fn collect(
        &self,
        topic: &str,
        pinned_ids: &[SourceId],
        constraints: &CollectionConstraints,
    ) -> Result<CollectedCorpus> {
        if topic.trim().is_empty() {
            return Err(DraftError::InvalidTopic("topic is blank".to_string()));
        }

        let mut warnings = Vec::new();
        let mut corpus = self.store.get(pinned_ids).await?;
        if corpus.len() < pinned_ids.len() {
            warnings.push(format!(
                "{} pinned source(s) could not be loaded",
                pinned_ids.len() - corpus.len()
            ));
        }

        let remaining = constraints.target_total.saturating_sub(corpus.len());
        if constraints.discovery_enabled && remaining > 0 {
            match self
                .discover(topic, &corpus, remaining, &constraints.filter)
                .await
            {
                Ok(discovered) => corpus.extend(discovered),
                Err(err) => {
                    warn!(error = %err, "Discovery failed; continuing with pinned sources only");
                    warnings.push("source discovery failed; using pinned sources only".to_string());
                }
            }
        }

        if corpus.is_empty() {
            return Err(DraftError::EmptyCorpus {
                topic: topic.to_string(),
            });
        }

        let ratio = self.gate_on_coverage(&mut corpus, &constraints.coverage).await?;
        if ratio < constraints.coverage.target_ratio {
            warnings.push(format!(
                "content coverage {:.0}% below target {:.0}%; drafting with partial full text",
                ratio * 100.0,
                constraints.coverage.target_ratio * 100.0
            ));
        }

        info!(
            sources = corpus.len(),
            coverage = ratio,
            warnings = warnings.len(),
            "Corpus assembled"
        );

        Ok(CollectedCorpus {
            documents: corpus,
            coverage_ratio: ratio,
            warnings,
        })
    }

    /// Discover, filter, and ingest sources for the remaining slots
    async fn discover(
        &self,
        topic: &str,
        pinned: &[SourceDocument],
        remaining: usize,
        filter_config: &TopicFilterConfig,
    ) -> Result<Vec<SourceDocument>> {
        let filters = SearchFilters {
            // Over-fetch so the on-topic filter has room to reject
            limit: remaining * 2,
            exclude: pinned.iter().map(|d| d.id.clone()).collect(),
        };

        let candidates = self
            .store
            .search(topic, &filters)
            .await
            .map_err(|e| DraftError::Discovery(e.to_string()))?;

        let filter = TopicFilter::new(topic, filter_config.clone());
        let accepted: Vec<SourceDocument> = candidates
            .into_iter()
            .filter(|d| !pinned.iter().any(|p| p.id == d.id))
            .filter(|d| filter.is_on_topic(d))
            .take(remaining)
            .collect();

        debug!(accepted = accepted.len(), "Candidates passed on-topic filter");

        // Persist discovered sources as a bounded-parallel batch; each
        // failure is caught individually and shrinks the corpus rather than
        // aborting or retrying indefinitely.
        let mut ingested = Vec::with_capacity(accepted.len());
        let mut stream = futures::stream::iter(accepted)
            .map(|doc| {
                let store = self.store.clone();
                async move {
                    match store.ingest(&doc).await {
                        Ok(stored) => Some(stored),
                        Err(err) => {
                            warn!(source = %doc.id, error = %err, "Ingestion failed; dropping source");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(collector_constants::MAX_PROBE_CONCURRENCY);

        while let Some(result) = stream.next().await {
            if let Some(doc) = result {
                ingested.push(doc);
            }
        }

        Ok(ingested)
    }

    /// Enqueue extraction for under-chunked sources and wait on coverage.
    /// Refreshes chunk counts from the store afterwards.
    async fn gate_on_coverage(
        &self,
        corpus: &mut Vec<SourceDocument>,
        config: &CoverageConfig,
    ) -> Result<f32> {
        let needing: Vec<(SourceId, String)> = corpus
            .iter()
            .filter(|d| needs_extraction(d, config.chunk_floor))
            .filter_map(|d| d.url.clone().map(|u| (d.id.clone(), u)))
            .collect();

        if needing.is_empty() {
            return Ok(coverage_ratio(corpus, config.chunk_floor));
        }

        // Independent per-source enqueues; one bad source cannot abort the batch
        let mut stream = futures::stream::iter(needing.iter().cloned())
            .map(|(id, url)| {
                let queue = self.queue.clone();
                async move {
                    if let Err(err) = queue.enqueue(&id, &url, QueuePriority::High).await {
                        warn!(source = %id, error = %err, "Extraction enqueue failed");
                    }
                }
            })
            .buffer_unordered(collector_constants::MAX_PROBE_CONCURRENCY);
        while stream.next().await.is_some() {}

        let ids: Vec<SourceId> = corpus.iter().map(|d| d.id.clone()).collect();
        let ratio =
            coverage::wait_for_coverage(&self.store, &ids, needing.len(), config).await?;

        // Pick up chunk counts that grew while waiting
        let refreshed = self.store.get(&ids).await?;
        for doc in corpus.iter_mut() {
            if let Some(updated) = refreshed.iter().find(|d| d.id == doc.id) {
                doc.chunk_count = updated.chunk_count;
                doc.has_full_text = updated.has_full_text;
            }
        }

        Ok(ratio)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::services::{CorpusStore, ExtractionQueue};

    struct MockStore {
        docs: Mutex<HashMap<String, SourceDocument>>,
        search_results: Vec<SourceDocument>,
        search_fails: bool,
        ingest_fail_ids: Vec<String>,
        /// chunk counts applied to every doc after this many get() calls
        grow_after_gets: Option<(usize, usize)>,
        get_calls: AtomicUsize,
    }

    impl MockStore {
        fn new(docs: Vec<SourceDocument>) -> Self {
            Self {
                docs: Mutex::new(docs.into_iter().map(|d| (d.id.to_string(), d)).collect()),
                search_results: Vec::new(),
                search_fails: false,
                ingest_fail_ids: Vec::new(),
                grow_after_gets: None,
                get_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CorpusStore for MockStore {
        async fn get(&self, ids: &[SourceId]) -> crate::types::Result<Vec<SourceDocument>> {
            let calls = self.get_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((after, count)) = self.grow_after_gets {
                if calls > after {
                    let mut docs = self.docs.lock().unwrap();
                    for doc in docs.values_mut() {
                        doc.chunk_count = doc.chunk_count.max(count);
                    }
                }
            }
            let docs = self.docs.lock().unwrap();
            Ok(ids
                .iter()
                .filter_map(|id| docs.get(id.as_str()).cloned())
                .collect())
        }

        async fn search(
            &self,
            _topic: &str,
            filters: &SearchFilters,
        ) -> crate::types::Result<Vec<SourceDocument>> {
            if self.search_fails {
                return Err(DraftError::Discovery("search backend down".to_string()));
            }
            Ok(self
                .search_results
                .iter()
                .filter(|d| !filters.exclude.contains(&d.id))
                .take(filters.limit)
                .cloned()
                .collect())
        }

        async fn ingest(&self, doc: &SourceDocument) -> crate::types::Result<SourceDocument> {
            if self.ingest_fail_ids.contains(&doc.id.to_string()) {
                return Err(DraftError::Ingestion {
                    source_id: doc.id.to_string(),
                    reason: "write failed".to_string(),
                });
            }
            self.docs
                .lock()
                .unwrap()
                .insert(doc.id.to_string(), doc.clone());
            Ok(doc.clone())
        }
    }

    struct MockQueue {
        enqueued: Mutex<Vec<String>>,
    }

    impl MockQueue {
        fn new() -> Self {
            Self {
                enqueued: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ExtractionQueue for MockQueue {
        async fn enqueue(
            &self,
            source_id: &SourceId,
            _url: &str,
            priority: QueuePriority,
        ) -> crate::types::Result<()> {
            assert_eq!(priority, QueuePriority::High);
            self.enqueued.lock().unwrap().push(source_id.to_string());
            Ok(())
        }
    }

    fn on_topic_doc(id: &str, title: &str) -> SourceDocument {
        let mut d = SourceDocument::new(id, title);
        d.relevance = Some(0.8);
        d.chunk_count = 20;
        d
    }

    fn fast_constraints() -> CollectionConstraints {
        CollectionConstraints {
            target_total: 5,
            coverage: CoverageConfig {
                min_wait: std::time::Duration::from_millis(10),
                max_wait: std::time::Duration::from_millis(50),
                per_source_wait: std::time::Duration::from_millis(10),
                poll_interval: std::time::Duration::from_millis(5),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pinned_sources_always_included() {
        let pinned = on_topic_doc("p1", "Unrelated pinned title");
        let store = Arc::new(MockStore::new(vec![pinned]));
        let collector = PaperCollector::new(store, Arc::new(MockQueue::new()));

        let result = collector
            .collect(
                "marine ecosystems",
                &[SourceId::from("p1")],
                &fast_constraints(),
            )
            .await
            .unwrap();

        // Pinned survives even though its title fails the on-topic filter
        assert_eq!(result.documents.len(), 1);
        assert_eq!(result.documents[0].id.as_str(), "p1");
    }

    #[tokio::test]
    async fn test_discovery_fills_remaining_slots() {
        let mut store = MockStore::new(vec![on_topic_doc("p1", "Marine ecosystems baseline")]);
        store.search_results = vec![
            on_topic_doc("d1", "Marine ecosystems warming"),
            on_topic_doc("d2", "Completely unrelated basket weaving"),
            on_topic_doc("d3", "Marine ecosystems acidification"),
        ];
        let collector = PaperCollector::new(Arc::new(store), Arc::new(MockQueue::new()));

        let result = collector
            .collect(
                "marine ecosystems",
                &[SourceId::from("p1")],
                &fast_constraints(),
            )
            .await
            .unwrap();

        let ids: Vec<&str> = result.documents.iter().map(|d| d.id.as_str()).collect();
        assert!(ids.contains(&"p1"));
        assert!(ids.contains(&"d1"));
        assert!(ids.contains(&"d3"));
        // Off-topic candidate rejected
        assert!(!ids.contains(&"d2"));
    }

    #[tokio::test]
    async fn test_search_failure_degrades_to_pinned_only() {
        let mut store = MockStore::new(vec![on_topic_doc("p1", "Marine ecosystems baseline")]);
        store.search_fails = true;
        let collector = PaperCollector::new(Arc::new(store), Arc::new(MockQueue::new()));

        let result = collector
            .collect(
                "marine ecosystems",
                &[SourceId::from("p1")],
                &fast_constraints(),
            )
            .await
            .unwrap();

        assert_eq!(result.documents.len(), 1);
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.contains("discovery failed"))
        );
    }

    #[tokio::test]
    async fn test_ingestion_failure_shrinks_corpus() {
        let mut store = MockStore::new(vec![]);
        store.search_results = vec![
            on_topic_doc("d1", "Marine ecosystems warming"),
            on_topic_doc("d2", "Marine ecosystems cooling"),
        ];
        store.ingest_fail_ids = vec!["d2".to_string()];
        let collector = PaperCollector::new(Arc::new(store), Arc::new(MockQueue::new()));

        let result = collector
            .collect("marine ecosystems", &[], &fast_constraints())
            .await
            .unwrap();

        assert_eq!(result.documents.len(), 1);
        assert_eq!(result.documents[0].id.as_str(), "d1");
    }

    #[tokio::test]
    async fn test_empty_corpus_is_terminal() {
        let store = Arc::new(MockStore::new(vec![]));
        let collector = PaperCollector::new(store, Arc::new(MockQueue::new()));

        let err = collector
            .collect("marine ecosystems", &[], &fast_constraints())
            .await
            .unwrap_err();

        assert!(matches!(err, DraftError::EmptyCorpus { .. }));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_blank_topic_rejected() {
        let store = Arc::new(MockStore::new(vec![]));
        let collector = PaperCollector::new(store, Arc::new(MockQueue::new()));
        let err = collector
            .collect("   ", &[], &fast_constraints())
            .await
            .unwrap_err();
        assert!(matches!(err, DraftError::InvalidTopic(_)));
    }

    #[tokio::test]
    async fn test_coverage_gating_enqueues_and_waits_for_growth() {
        let mut thin = on_topic_doc("p1", "Marine ecosystems baseline");
        thin.chunk_count = 0;
        thin.url = Some("https://arxiv.org/pdf/1".to_string());
        let mut store = MockStore::new(vec![thin]);
        // Chunk counts reach the floor after the second get()
        store.grow_after_gets = Some((2, 15));
        let queue = Arc::new(MockQueue::new());
        let collector = PaperCollector::new(Arc::new(store), queue.clone());

        let result = collector
            .collect(
                "marine ecosystems",
                &[SourceId::from("p1")],
                &fast_constraints(),
            )
            .await
            .unwrap();

        assert_eq!(queue.enqueued.lock().unwrap().as_slice(), ["p1"]);
        assert_eq!(result.coverage_ratio, 1.0);
        assert!(result.documents[0].chunk_count >= 15);
    }

    #[tokio::test]
    async fn test_coverage_timeout_does_not_fail_job() {
        let mut thin = on_topic_doc("p1", "Marine ecosystems baseline");
        thin.chunk_count = 0;
        thin.url = Some("https://arxiv.org/pdf/1".to_string());
        let store = MockStore::new(vec![thin]);
        let collector = PaperCollector::new(Arc::new(store), Arc::new(MockQueue::new()));

        let result = collector
            .collect(
                "marine ecosystems",
                &[SourceId::from("p1")],
                &fast_constraints(),
            )
            .await
            .unwrap();

        // Coverage never improved, but the job proceeds with a warning
        assert_eq!(result.coverage_ratio, 0.0);
        assert!(result.warnings.iter().any(|w| w.contains("coverage")));
    }
}
