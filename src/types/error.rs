//! Unified Error Type System
//!
//! Centralized error types for the entire application.
//! Provides intelligent error classification for retry decisions.
//!
//! ## Error Categories
//!
//! - **Transient**: rate limits, network failures, timeouts (retry with
//!   exponential backoff)
//! - **Quality**: low relevance, insufficient content (retry with a small
//!   fixed backoff)
//! - **UserAction**: empty corpus, invalid topic (no retry; the caller must
//!   change the request)
//! - **Fatal**: authentication and validation failures, plus anything the
//!   classifier cannot recognize (no retry)
//!
//! ## Design Principles
//!
//! - Single unified error type (`DraftError`) for the entire application
//! - Every error maps to exactly one category
//! - Unknown errors classify as `Fatal` so nothing unclassified is retried
//! - User-facing messages are static per category; logs carry full context

use std::time::Duration;
use thiserror::Error;

use crate::constants::retry as retry_constants;

// =============================================================================
// Error Categories
// =============================================================================

/// Four-way taxonomy for retry routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Temporary infrastructure trouble - retry with exponential backoff
    Transient,
    /// Output quality fell short - retry with a small backoff
    Quality,
    /// The request itself is unusable - never retry
    UserAction,
    /// Authentication/validation failure or unrecognized error - never retry
    Fatal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Quality => write!(f, "QUALITY"),
            Self::UserAction => write!(f, "USER_ACTION"),
            Self::Fatal => write!(f, "FATAL"),
        }
    }
}

impl ErrorCategory {
    /// Check if this category may be retried at all
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::Quality)
    }

    /// Maximum retry attempts for this category
    pub fn max_retries(&self) -> u32 {
        match self {
            Self::Transient => retry_constants::TRANSIENT_MAX_RETRIES,
            Self::Quality => retry_constants::QUALITY_MAX_RETRIES,
            Self::UserAction | Self::Fatal => 0,
        }
    }

    /// Base delay before the first retry
    pub fn base_backoff(&self) -> Duration {
        match self {
            Self::Transient => Duration::from_millis(retry_constants::TRANSIENT_BASE_DELAY_MS),
            Self::Quality => Duration::from_millis(retry_constants::QUALITY_DELAY_MS),
            Self::UserAction | Self::Fatal => Duration::ZERO,
        }
    }

    /// Whether backoff grows exponentially between attempts
    pub fn backoff_is_exponential(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Static user-facing message for this category
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Transient => "A temporary service problem interrupted generation. Please retry.",
            Self::Quality => {
                "The available sources did not yield enough relevant content for this request."
            }
            Self::UserAction => {
                "The request cannot be fulfilled as given. Check the topic and selected sources."
            }
            Self::Fatal => "Generation failed due to an internal error.",
        }
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Pattern-matches error text into the four-category taxonomy.
///
/// Total and single-valued: every message maps to exactly one category, and
/// anything unrecognized lands in `Fatal` so it is never silently retried.
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error message from any subsystem
    pub fn classify(message: &str) -> ErrorCategory {
        let lower = message.to_lowercase();

        // Order matters: auth failures often mention "request" or "invalid",
        // so fatal patterns are checked before the user-action bucket.
        if lower.contains("unauthorized")
            || lower.contains("401")
            || lower.contains("403")
            || lower.contains("forbidden")
            || lower.contains("api key")
            || lower.contains("authentication")
            || lower.contains("validation failed")
        {
            return ErrorCategory::Fatal;
        }

        if lower.contains("empty corpus")
            || lower.contains("no sources")
            || lower.contains("invalid topic")
        {
            return ErrorCategory::UserAction;
        }

        if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("network")
            || lower.contains("connection")
            || lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("unavailable")
            || lower.contains("overloaded")
        {
            return ErrorCategory::Transient;
        }

        if lower.contains("low relevance")
            || lower.contains("low score")
            || lower.contains("quality below")
            || lower.contains("insufficient content")
            || lower.contains("no relevant content")
        {
            return ErrorCategory::Quality;
        }

        ErrorCategory::Fatal
    }

    /// Classify an HTTP status code directly (more accurate than substrings)
    pub fn classify_http_status(status: u16) -> ErrorCategory {
        match status {
            429 | 500 | 502 | 503 | 504 | 408 => ErrorCategory::Transient,
            401 | 403 => ErrorCategory::Fatal,
            _ => ErrorCategory::Fatal,
        }
    }

    /// Classify a `DraftError` with type-based routing where the variant is
    /// more precise than its message text
    pub fn classify_error(err: &DraftError) -> ErrorCategory {
        err.category()
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum DraftError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // -------------------------------------------------------------------------
    // Collection Errors
    // -------------------------------------------------------------------------
    /// Final corpus was empty after pinning and discovery - terminal
    #[error("empty corpus: no usable sources after discovery for '{topic}'")]
    EmptyCorpus { topic: String },

    /// External search collaborator failed; collection degrades to pinned-only
    #[error("source discovery failed: {0}")]
    Discovery(String),

    /// Ingestion of a discovered source failed
    #[error("ingestion failed for source {source_id}: {reason}")]
    Ingestion { source_id: String, reason: String },

    // -------------------------------------------------------------------------
    // Retrieval Errors
    // -------------------------------------------------------------------------
    /// Neither chunks nor usable abstracts exist for the candidates
    #[error("no relevant content found for query '{query}'")]
    NoRelevantContent { query: String },

    /// Retrieved set exists but its average score is under the floor
    #[error("low score: average chunk relevance {average:.3} under floor {floor:.3}")]
    LowRetrievalQuality { average: f32, floor: f32 },

    // -------------------------------------------------------------------------
    // Pipeline Errors
    // -------------------------------------------------------------------------
    /// Section pipeline failure with stage context
    #[error("section '{section}' failed during {stage}: {message}")]
    Section {
        section: String,
        stage: String,
        message: String,
    },

    /// Operation timeout with context
    #[error("timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // -------------------------------------------------------------------------
    // Citation Errors
    // -------------------------------------------------------------------------
    #[error("citation error: {0}")]
    Citation(String),

    // -------------------------------------------------------------------------
    // LLM Errors
    // -------------------------------------------------------------------------
    /// Language-model service error carrying its own classification
    #[error("language model error ({category}): {message}")]
    Llm {
        category: ErrorCategory,
        message: String,
    },

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid topic: {0}")]
    InvalidTopic(String),
}

pub type Result<T> = std::result::Result<T, DraftError>;

impl DraftError {
    /// Create an LLM error, classifying the message text
    pub fn llm(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Llm {
            category: ErrorClassifier::classify(&message),
            message,
        }
    }

    /// Create an LLM error with an explicit category
    pub fn llm_with_category(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::Llm {
            category,
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a section pipeline error
    pub fn section(
        section: impl Into<String>,
        stage: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Section {
            section: section.into(),
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Map this error to exactly one retry category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io(_) | Self::Http(_) | Self::Timeout { .. } => ErrorCategory::Transient,
            Self::Discovery(_) | Self::Ingestion { .. } => ErrorCategory::Transient,
            Self::NoRelevantContent { .. } | Self::LowRetrievalQuality { .. } => {
                ErrorCategory::Quality
            }
            Self::EmptyCorpus { .. } | Self::InvalidTopic(_) => ErrorCategory::UserAction,
            Self::Llm { category, .. } => *category,
            Self::Section { message, .. } => ErrorClassifier::classify(message),
            Self::Citation(msg) => ErrorClassifier::classify(msg),
            Self::Json(_) | Self::Config(_) => ErrorCategory::Fatal,
        }
    }

    /// Check if this error is recoverable (may be retried)
    pub fn is_recoverable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Static user-facing message (logs carry the technical detail)
    pub fn user_message(&self) -> &'static str {
        self.category().user_message()
    }
}

// =============================================================================
// Tests
// =============================================================================
