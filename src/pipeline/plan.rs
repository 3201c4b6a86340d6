//! Section Plans
//!
//! Structured plans requested from the language model before drafting, plus
//! the mechanical fallback used when a plan comes back invalid or
//! unparsable. An invalid plan never aborts a section.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::constants::pipeline as pipeline_constants;
use crate::types::{SectionSpec, SourceId};

// =============================================================================
// Plan Model
// =============================================================================

/// One citation-need slot in a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationSlot {
    /// Placeholder key, e.g. `need_mechanism_evidence`
    pub placeholder: String,
    /// What the citation should support
    pub purpose: String,
    /// Optional pre-selected source
    #[serde(default)]
    pub source_id: Option<SourceId>,
}

/// Structured drafting plan for one section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionPlan {
    pub outline: Vec<String>,
    pub citation_needs: Vec<CitationSlot>,
    #[serde(default)]
    pub key_arguments: Vec<String>,
    pub paragraph_estimate: usize,
    /// Whether this plan came from the heuristic fallback
    #[serde(skip)]
    pub is_fallback: bool,
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("valid placeholder regex"))
}

impl SectionPlan {
    /// Parse a plan from structured model output
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Validate against the plan contract. Returns every violation found so
    /// callers can log them together before falling back.
    pub fn validate(&self, available_sources: &HashSet<SourceId>) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();

        if self.outline.len() < pipeline_constants::MIN_OUTLINE_POINTS {
            violations.push(format!(
                "outline has {} points, need at least {}",
                self.outline.len(),
                pipeline_constants::MIN_OUTLINE_POINTS
            ));
        }

        if self.citation_needs.len() < pipeline_constants::MIN_CITATION_SLOTS {
            violations.push(format!(
                "{} citation slots, need at least {}",
                self.citation_needs.len(),
                pipeline_constants::MIN_CITATION_SLOTS
            ));
        }

        let mut seen = HashSet::new();
        for slot in &self.citation_needs {
            if !placeholder_regex().is_match(&slot.placeholder) {
                violations.push(format!("invalid placeholder key '{}'", slot.placeholder));
            }
            if !seen.insert(slot.placeholder.as_str()) {
                violations.push(format!("duplicate placeholder '{}'", slot.placeholder));
            }
            if let Some(id) = &slot.source_id {
                if !available_sources.contains(id) {
                    violations.push(format!(
                        "slot '{}' references unknown source '{}'",
                        slot.placeholder, id
                    ));
                }
            }
        }

        if self.paragraph_estimate == 0 {
            violations.push("paragraph estimate is zero".to_string());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Heuristic fallback derived mechanically from the section and topic:
    /// a generic outline skeleton and generic citation-need slots sized to
    /// the target length
    pub fn fallback(spec: &SectionSpec, topic: &str) -> Self {
        let slots = pipeline_constants::MIN_CITATION_SLOTS.max(spec.expected_words / 300);
        let citation_needs = (0..slots)
            .map(|i| CitationSlot {
                placeholder: format!("{}_evidence_{}", spec.key, i + 1),
                purpose: format!("supporting evidence for {} point {}", spec.title, i + 1),
                source_id: None,
            })
            .collect();

        Self {
            outline: vec![
                format!("Introduce {} in the context of {}", spec.title, topic),
                format!("Present the main findings relevant to {}", spec.title),
                format!("Relate the evidence back to {}", topic),
            ],
            citation_needs,
            key_arguments: vec![format!("{} addresses {}", spec.title, topic)],
            paragraph_estimate: (spec.expected_words / pipeline_constants::WORDS_PER_PARAGRAPH)
                .max(1),
            is_fallback: true,
        }
    }

    /// Parse and validate in one step; any failure yields the fallback
    pub fn from_model_output(
        value: Value,
        spec: &SectionSpec,
        topic: &str,
        available_sources: &HashSet<SourceId>,
    ) -> Self {
        match Self::from_value(value) {
            Ok(plan) => match plan.validate(available_sources) {
                Ok(()) => plan,
                Err(violations) => {
                    warn!(
                        section = %spec.key,
                        violations = %violations.join("; "),
                        "Plan failed validation; using heuristic fallback"
                    );
                    Self::fallback(spec, topic)
                }
            },
            Err(err) => {
                warn!(section = %spec.key, error = %err, "Plan unparsable; using heuristic fallback");
                Self::fallback(spec, topic)
            }
        }
    }
}

/// JSON Schema for structured plan generation
pub fn plan_schema() -> Value {
    json!({
        "type": "object",
        "required": ["outline", "citation_needs", "paragraph_estimate"],
        "properties": {
            "outline": {
                "type": "array",
                "items": {"type": "string"},
                "minItems": pipeline_constants::MIN_OUTLINE_POINTS
            },
            "citation_needs": {
                "type": "array",
                "minItems": pipeline_constants::MIN_CITATION_SLOTS,
                "items": {
                    "type": "object",
                    "required": ["placeholder", "purpose"],
                    "properties": {
                        "placeholder": {"type": "string", "pattern": "^[a-z][a-z0-9_-]*$"},
                        "purpose": {"type": "string"},
                        "source_id": {"type": ["string", "null"]}
                    }
                }
            },
            "key_arguments": {"type": "array", "items": {"type": "string"}},
            "paragraph_estimate": {"type": "integer", "minimum": 1}
        }
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> SectionSpec {
        SectionSpec::new("results", "Results", 600)
    }

    fn available(ids: &[&str]) -> HashSet<SourceId> {
        ids.iter().map(|s| SourceId::from(*s)).collect()
    }

    fn valid_plan_value() -> Value {
        json!({
            "outline": ["Point one", "Point two", "Point three"],
            "citation_needs": [
                {"placeholder": "need_effect_size", "purpose": "effect sizes", "source_id": "a"},
                {"placeholder": "need_replication", "purpose": "replication evidence"}
            ],
            "key_arguments": ["The effect is robust"],
            "paragraph_estimate": 4
        })
    }

    #[test]
    fn test_valid_plan_passes() {
        let plan = SectionPlan::from_value(valid_plan_value()).unwrap();
        assert!(plan.validate(&available(&["a", "b"])).is_ok());
        assert!(!plan.is_fallback);
    }

    #[test]
    fn test_too_few_outline_points_rejected() {
        let mut value = valid_plan_value();
        value["outline"] = json!(["only one"]);
        let plan = SectionPlan::from_value(value).unwrap();
        let violations = plan.validate(&available(&["a"])).unwrap_err();
        assert!(violations.iter().any(|v| v.contains("outline")));
    }

    #[test]
    fn test_bad_placeholder_syntax_rejected() {
        let mut value = valid_plan_value();
        value["citation_needs"][0]["placeholder"] = json!("Need Effect!");
        let plan = SectionPlan::from_value(value).unwrap();
        let violations = plan.validate(&available(&["a"])).unwrap_err();
        assert!(violations.iter().any(|v| v.contains("invalid placeholder")));
    }

    #[test]
    fn test_duplicate_placeholders_rejected() {
        let mut value = valid_plan_value();
        value["citation_needs"][1]["placeholder"] = json!("need_effect_size");
        let plan = SectionPlan::from_value(value).unwrap();
        let violations = plan.validate(&available(&["a"])).unwrap_err();
        assert!(violations.iter().any(|v| v.contains("duplicate")));
    }

    #[test]
    fn test_unknown_source_reference_rejected() {
        let plan = SectionPlan::from_value(valid_plan_value()).unwrap();
        // "a" is referenced but unavailable
        let violations = plan.validate(&available(&["b"])).unwrap_err();
        assert!(violations.iter().any(|v| v.contains("unknown source")));
    }

    #[test]
    fn test_unparsable_plan_yields_fallback() {
        let plan = SectionPlan::from_model_output(
            json!({"nonsense": true}),
            &spec(),
            "the topic",
            &available(&[]),
        );
        assert!(plan.is_fallback);
        assert!(plan.validate(&available(&[])).is_ok());
    }

    #[test]
    fn test_invalid_plan_yields_fallback() {
        let mut value = valid_plan_value();
        value["outline"] = json!([]);
        let plan =
            SectionPlan::from_model_output(value, &spec(), "the topic", &available(&["a"]));
        assert!(plan.is_fallback);
    }

    #[test]
    fn test_fallback_scales_slots_with_length() {
        let small = SectionPlan::fallback(&SectionSpec::new("results", "Results", 400), "t");
        assert_eq!(
            small.citation_needs.len(),
            pipeline_constants::MIN_CITATION_SLOTS
        );

        let large = SectionPlan::fallback(&SectionSpec::new("results", "Results", 1500), "t");
        assert_eq!(large.citation_needs.len(), 5);
        // Fallback must itself satisfy the contract it replaces
        assert!(large.validate(&available(&[])).is_ok());
    }
}
