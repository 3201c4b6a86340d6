//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/paperweave/) and project (.paperweave/) level
//! configuration.

use serde::{Deserialize, Serialize};

use crate::ai::ProviderConfig;
use crate::citation::CitationConfig;
use crate::collector::{CollectionConstraints, CoverageConfig, TopicFilterConfig};
use crate::constants::{citation, collector, retrieval};
use crate::retrieval::RetrievalConfig;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Source collection settings
    pub collector: CollectorSettings,

    /// Passage retrieval settings
    pub retrieval: RetrievalSettings,

    /// Citation coverage settings
    pub citation: CitationSettings,

    /// Language-model provider settings
    pub llm: ProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            collector: CollectorSettings::default(),
            retrieval: RetrievalSettings::default(),
            citation: CitationSettings::default(),
            llm: ProviderConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `DraftError::Config` on validation failure.
    pub fn validate(&self) -> crate::types::Result<()> {
        if !(0.0..=1.0).contains(&self.collector.target_coverage_ratio) {
            return Err(crate::types::DraftError::Config(format!(
                "collector.target_coverage_ratio must be between 0.0 and 1.0, got {}",
                self.collector.target_coverage_ratio
            )));
        }

        if !(0.0..=1.0).contains(&self.collector.min_match_ratio) {
            return Err(crate::types::DraftError::Config(format!(
                "collector.min_match_ratio must be between 0.0 and 1.0, got {}",
                self.collector.min_match_ratio
            )));
        }

        if self.retrieval.tiers.is_empty() {
            return Err(crate::types::DraftError::Config(
                "retrieval.tiers must not be empty".to_string(),
            ));
        }

        if self.retrieval.tiers.windows(2).any(|w| w[0] <= w[1]) {
            return Err(crate::types::DraftError::Config(
                "retrieval.tiers must be strictly descending".to_string(),
            ));
        }

        if self.retrieval.limit == 0 {
            return Err(crate::types::DraftError::Config(
                "retrieval.limit must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.citation.fallback_fraction) {
            return Err(crate::types::DraftError::Config(format!(
                "citation.fallback_fraction must be between 0.0 and 1.0, got {}",
                self.citation.fallback_fraction
            )));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(crate::types::DraftError::Config(format!(
                "llm.temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }

        if self.llm.timeout_secs == 0 {
            return Err(crate::types::DraftError::Config(
                "llm.timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Collector Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    /// Target corpus size
    pub target_total: usize,
    /// Whether discovery beyond pinned sources runs at all
    pub discovery_enabled: bool,
    /// Minimum topic-term match ratio for the on-topic filter
    pub min_match_ratio: f32,
    /// Minimum relevance score for discovered sources
    pub min_relevance: f32,
    /// Whether sources carrying no score at all pass the score gate
    pub permissive_scores: bool,
    /// Chunk count below which a source needs extraction
    pub chunk_floor: usize,
    /// Coverage ratio that releases the gate early
    pub target_coverage_ratio: f32,
    /// Wait allowance per source needing extraction (seconds)
    pub per_source_wait_secs: u64,
    /// Clamp bounds for the total wait (seconds)
    pub min_wait_secs: u64,
    pub max_wait_secs: u64,
    /// Coverage poll interval (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            target_total: collector::DEFAULT_TARGET_TOTAL,
            discovery_enabled: true,
            min_match_ratio: collector::MIN_TERM_MATCH_RATIO,
            min_relevance: collector::MIN_RELEVANCE_SCORE,
            permissive_scores: true,
            chunk_floor: collector::CHUNK_FLOOR,
            target_coverage_ratio: collector::TARGET_COVERAGE_RATIO,
            per_source_wait_secs: collector::PER_SOURCE_WAIT_SECS,
            min_wait_secs: collector::MIN_COVERAGE_WAIT_SECS,
            max_wait_secs: collector::MAX_COVERAGE_WAIT_SECS,
            poll_interval_ms: collector::POLL_INTERVAL_MS,
        }
    }
}

impl CollectorSettings {
    /// Materialize runtime collection constraints
    pub fn constraints(&self) -> CollectionConstraints {
        CollectionConstraints {
            target_total: self.target_total,
            discovery_enabled: self.discovery_enabled,
            filter: TopicFilterConfig {
                min_match_ratio: self.min_match_ratio,
                min_relevance: self.min_relevance,
                permissive_scores: self.permissive_scores,
            },
            coverage: CoverageConfig {
                chunk_floor: self.chunk_floor,
                target_ratio: self.target_coverage_ratio,
                per_source_wait: std::time::Duration::from_secs(self.per_source_wait_secs),
                min_wait: std::time::Duration::from_secs(self.min_wait_secs),
                max_wait: std::time::Duration::from_secs(self.max_wait_secs),
                poll_interval: std::time::Duration::from_millis(self.poll_interval_ms),
            },
        }
    }
}

// =============================================================================
// Retrieval Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Ordered score thresholds, strictest first
    pub tiers: Vec<f32>,
    /// Chunks retrieved per section query
    pub limit: usize,
    /// TTL for cached retrieval results (seconds)
    pub cache_ttl_secs: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            tiers: retrieval::SCORE_TIERS.to_vec(),
            limit: retrieval::DEFAULT_LIMIT,
            cache_ttl_secs: retrieval::CACHE_TTL_SECS,
        }
    }
}

impl RetrievalSettings {
    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            tiers: self.tiers.clone(),
            ..Default::default()
        }
    }
}

// =============================================================================
// Citation Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CitationSettings {
    /// Maximum backfilled citations per source
    pub per_source_cap: usize,
    /// Snippet budget for evidence sentences
    pub max_snippet_chars: usize,
    /// Coverage fallbacks when no structural profile is supplied
    pub fallback_floor: usize,
    pub fallback_fraction: f32,
}

impl Default for CitationSettings {
    fn default() -> Self {
        Self {
            per_source_cap: citation::PER_SOURCE_BACKFILL_CAP,
            max_snippet_chars: citation::MAX_SNIPPET_CHARS,
            fallback_floor: citation::DEFAULT_COVERAGE_FLOOR,
            fallback_fraction: citation::DEFAULT_COVERAGE_FRACTION,
        }
    }
}

impl CitationSettings {
    pub fn citation_config(&self) -> CitationConfig {
        CitationConfig {
            per_source_cap: self.per_source_cap,
            max_snippet_chars: self.max_snippet_chars,
            fallback_floor: self.fallback_floor,
            fallback_fraction: self.fallback_fraction,
        }
    }
}
