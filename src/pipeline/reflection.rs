//! Reflection Policy
//!
//! Pure decision function governing whether a drafted section enters the
//! critique-and-revise loop and how many cycles it is allowed.
//! Deterministic and side-effect-free so tests can enumerate inputs
//! exhaustively.

use crate::constants::pipeline as pipeline_constants;
use crate::types::SectionKey;

/// Why the policy decided the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionReason {
    /// Target length too short to justify the cost
    BelowWordThreshold,
    /// Section kind always warrants reflection
    AnalyticalSection,
    /// Prior composite quality fell under the threshold
    LowPriorScore,
    /// Long sections reflect by default
    LongSection,
    /// Nothing triggered reflection
    NoTrigger,
}

impl std::fmt::Display for ReflectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BelowWordThreshold => "below word threshold",
            Self::AnalyticalSection => "analytical section",
            Self::LowPriorScore => "low prior score",
            Self::LongSection => "long section",
            Self::NoTrigger => "no trigger",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a policy decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflectionDecision {
    pub use_reflection: bool,
    pub reason: ReflectionReason,
    pub max_cycles: u32,
}

impl ReflectionDecision {
    fn skip(reason: ReflectionReason) -> Self {
        Self {
            use_reflection: false,
            reason,
            max_cycles: 0,
        }
    }

    fn reflect(reason: ReflectionReason, max_cycles: u32) -> Self {
        Self {
            use_reflection: true,
            reason,
            max_cycles,
        }
    }
}

/// Pure reflection policy
pub struct ReflectionPolicy;

impl ReflectionPolicy {
    /// Decide whether to reflect, in strict rule order:
    ///
    /// 1. Under the word threshold: skip
    /// 2. Analytical section kinds: reflect with one extra cycle
    /// 3. Prior composite score under threshold: reflect, default budget
    /// 4. At or over the long-section threshold: reflect, default budget
    /// 5. Otherwise: skip
    pub fn decide(
        section_key: &SectionKey,
        expected_words: usize,
        prior_score: Option<f32>,
    ) -> ReflectionDecision {
        let default_cycles = pipeline_constants::DEFAULT_REFLECTION_CYCLES;

        if expected_words < pipeline_constants::PLANNING_WORD_THRESHOLD {
            return ReflectionDecision::skip(ReflectionReason::BelowWordThreshold);
        }

        if section_key.is_analytical() {
            return ReflectionDecision::reflect(
                ReflectionReason::AnalyticalSection,
                default_cycles + 1,
            );
        }

        if let Some(score) = prior_score {
            if score < pipeline_constants::REFLECTION_SCORE_THRESHOLD {
                return ReflectionDecision::reflect(ReflectionReason::LowPriorScore, default_cycles);
            }
        }

        if expected_words >= pipeline_constants::REFLECTION_WORD_THRESHOLD {
            return ReflectionDecision::reflect(ReflectionReason::LongSection, default_cycles);
        }

        ReflectionDecision::skip(ReflectionReason::NoTrigger)
    }
}
