//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Source collection constants
pub mod collector {
    /// Default target corpus size when the caller does not constrain it
    pub const DEFAULT_TARGET_TOTAL: usize = 20;

    /// Minimum fraction of significant topic terms that must appear in a
    /// candidate's title/abstract to pass the on-topic filter
    pub const MIN_TERM_MATCH_RATIO: f32 = 0.25;

    /// Minimum acceptable semantic relevance score for discovered sources
    pub const MIN_RELEVANCE_SCORE: f32 = 0.35;

    /// Sources with fewer chunks than this are candidates for background
    /// full-text extraction
    pub const CHUNK_FLOOR: usize = 10;

    /// Fraction of sources that must meet the chunk floor before generation
    /// proceeds without waiting further
    pub const TARGET_COVERAGE_RATIO: f32 = 0.7;

    /// Per-source allowance when sizing the coverage wait (seconds)
    pub const PER_SOURCE_WAIT_SECS: u64 = 90;

    /// Lower clamp on the coverage wait (seconds)
    pub const MIN_COVERAGE_WAIT_SECS: u64 = 120;

    /// Upper clamp on the coverage wait (seconds)
    pub const MAX_COVERAGE_WAIT_SECS: u64 = 600;

    /// Interval between coverage polls (milliseconds)
    pub const POLL_INTERVAL_MS: u64 = 5_000;

    /// Maximum concurrent per-source probes (chunk counts, ingestion)
    pub const MAX_PROBE_CONCURRENCY: usize = 8;
}

/// Passage retrieval constants
pub mod retrieval {
    /// Ordered score thresholds; the first tier returning results wins
    pub const SCORE_TIERS: [f32; 4] = [0.5, 0.3, 0.2, 0.15];

    /// Default number of chunks returned per query
    pub const DEFAULT_LIMIT: usize = 12;

    /// Minimum characters for a chunk to pass the quality filter
    pub const MIN_CHUNK_CHARS: usize = 40;

    /// Minimum words for a chunk to pass the quality filter
    pub const MIN_CHUNK_WORDS: usize = 6;

    /// Raw candidates kept when the quality filter would empty the set
    pub const QUALITY_RESCUE_TOP_N: usize = 10;

    /// Minimum chunks any single source is allowed in a balanced result
    pub const PER_SOURCE_CAP_FLOOR: usize = 2;

    /// Average score below which the result set is flagged as low quality
    pub const AVG_SCORE_FLOOR: f32 = 0.08;

    /// Abstracts longer than this are split into sentence pseudo-chunks
    pub const ABSTRACT_SPLIT_CHARS: usize = 280;

    /// TTL for cached chunk results (seconds)
    pub const CACHE_TTL_SECS: u64 = 600;

    /// Maximum entries in the chunk-result cache
    pub const CACHE_MAX_ENTRIES: usize = 256;
}

/// Section pipeline constants
pub mod pipeline {
    /// Sections below this word target skip the planning stage
    pub const PLANNING_WORD_THRESHOLD: usize = 400;

    /// Sections at or above this word target always reflect
    pub const REFLECTION_WORD_THRESHOLD: usize = 800;

    /// Composite score below which reflection is triggered
    pub const REFLECTION_SCORE_THRESHOLD: f32 = 75.0;

    /// Default reflection cycle budget
    pub const DEFAULT_REFLECTION_CYCLES: u32 = 2;

    /// Score improvement below this counts as a plateau
    pub const PLATEAU_EPSILON: f32 = 1.0;

    /// Minimum outline points for a valid plan
    pub const MIN_OUTLINE_POINTS: usize = 3;

    /// Minimum citation-need slots for a valid plan
    pub const MIN_CITATION_SLOTS: usize = 2;

    /// Sub-score assigned to a stage that was skipped or fell back
    pub const DEGRADED_STAGE_SCORE: f32 = 60.0;

    /// Sub-score assigned to a stage that completed normally without its
    /// own measurement
    pub const DEFAULT_STAGE_SCORE: f32 = 85.0;

    /// Approximate words per planned paragraph
    pub const WORDS_PER_PARAGRAPH: usize = 150;
}

/// Citation coverage constants
pub mod citation {
    /// Fallback coverage floor when no structural profile is available
    pub const DEFAULT_COVERAGE_FLOOR: usize = 3;

    /// Fallback coverage fraction when no structural profile is available
    pub const DEFAULT_COVERAGE_FRACTION: f32 = 0.5;

    /// Maximum backfilled citations for any single source
    pub const PER_SOURCE_BACKFILL_CAP: usize = 3;

    /// Maximum characters for a synthesized evidence snippet
    pub const MAX_SNIPPET_CHARS: usize = 320;

    /// Truncation snaps to a word boundary only past this fraction of the
    /// snippet budget; earlier boundaries would drop too much evidence
    pub const SNIPPET_BOUNDARY_FRACTION: f32 = 0.6;
}

/// Retry policy constants
pub mod retry {
    /// Maximum attempts for transient failures
    pub const TRANSIENT_MAX_RETRIES: u32 = 3;

    /// Maximum attempts for quality failures
    pub const QUALITY_MAX_RETRIES: u32 = 2;

    /// Base delay for transient exponential backoff (milliseconds)
    pub const TRANSIENT_BASE_DELAY_MS: u64 = 500;

    /// Fixed delay between quality retries (milliseconds)
    pub const QUALITY_DELAY_MS: u64 = 250;

    /// Maximum delay between retries (seconds)
    pub const MAX_DELAY_SECS: u64 = 30;

    /// Backoff multiplier for transient retries
    pub const BACKOFF_FACTOR: f32 = 2.0;
}

/// HTTP/Network constants
pub mod network {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;
}
