//! PaperWeave - AI-Driven Cited Draft Generation
//!
//! Turns a topic and a corpus of source documents into a long-form cited
//! draft, built section-by-section through staged language-model calls and
//! gated by passage-retrieval quality and citation-coverage targets.
//!
//! ## Core Features
//!
//! - **Coverage-Gated Collection**: pinned + discovered sources with
//!   background full-text extraction and a bounded coverage wait
//! - **Adaptive Retrieval**: multi-tier passage scoring with source
//!   balancing and abstract fallback
//! - **Section Pipeline**: plan → write → reflect → score state machine
//!   driven by a pure reflection policy
//! - **Citation Backfill**: evidence-based coverage enforcement with
//!   neutral citation tokens
//!
//! ## Quick Start
//!
//! ```ignore
//! use paperweave::{GenerationDriver, GenerationRequest};
//!
//! let driver = GenerationDriver::new(collector, pipeline, coordinator);
//! let result = driver.run(&GenerationRequest::new("microplastics in rivers")).await?;
//! println!("{}", result.content);
//! ```
//!
//! ## Modules
//!
//! - [`collector`]: corpus assembly and coverage gating
//! - [`retrieval`]: tiered passage retrieval with balancing
//! - [`pipeline`]: per-section generation state machine
//! - [`citation`]: citation bookkeeping and backfill
//! - [`metrics`]: draft quality scoring
//! - [`ai`]: language-model providers and classified retries
//! - [`services`]: external collaborator contracts

pub mod ai;
pub mod citation;
pub mod cli;
pub mod collector;
pub mod config;
pub mod constants;
pub mod generator;
pub mod metrics;
pub mod pipeline;
pub mod retrieval;
pub mod services;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader};

// Error Types
pub use types::error::{DraftError, ErrorCategory, ErrorClassifier, Result};

// Data Model
pub use types::{
    Chunk, ChunkTier, GenerationJob, GenerationResult, JobId, ProgressStage, SectionDraft,
    SectionKey, SectionSpec, SourceDocument, SourceId,
};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use collector::{CollectionConstraints, PaperCollector};
pub use generator::{GenerationDriver, GenerationRequest, ProgressReporter};
pub use pipeline::{ReflectionPolicy, SectionPipeline};
pub use retrieval::{ChunkCache, ChunkRetriever};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{LanguageModel, LmResponse, OpenAiCompatProvider, ProviderConfig, SharedModel};
pub use citation::CitationCoordinator;
pub use metrics::MetricsEngine;
