//! Section Generation Pipeline
//!
//! Per-section state machine: `PLANNING → WRITING → REFLECTING (optional) →
//! SCORING → DONE`. Transitions are named and guard-checked so each one is
//! independently testable. Failures degrade: an invalid plan falls back to
//! a heuristic plan, low-scored retrieval tops up with abstracts, and an
//! erroring reflection cycle keeps the best draft seen so far.

pub mod plan;
pub mod reflection;

pub use plan::{CitationSlot, SectionPlan, plan_schema};
pub use reflection::{ReflectionDecision, ReflectionPolicy, ReflectionReason};

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::ai::SharedModel;
use crate::citation::{citation_token, distinct_source_ids};
use crate::constants::pipeline as pipeline_constants;
use crate::metrics::MetricsEngine;
use crate::retrieval::{ChunkRetriever, RankedChunks};
use crate::types::{
    Chunk, DraftError, QualityBundle, Result, SectionDraft, SectionSpec, SourceDocument, SourceId,
};

// =============================================================================
// States & Transitions
// =============================================================================

/// Pipeline states in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionState {
    Planning,
    Writing,
    Reflecting,
    Scoring,
    Done,
}

/// Named transitions taken through the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Guard: target length under the planning threshold
    PlanningSkipped,
    /// Model plan parsed and validated
    PlanAccepted,
    /// Model plan invalid or unparsable; heuristic fallback substituted
    PlanFellBack,
    /// Draft produced from plan and retrieved passages
    DraftWritten,
    /// Reflection policy scheduled a critique loop
    ReflectionEntered,
    /// Reflection policy skipped the loop
    ReflectionSkipped,
    /// A revision replaced the kept draft
    CycleKept,
    /// A revision scored worse and was discarded
    CycleDiscarded,
    /// Improvement fell under the plateau epsilon
    ReflectionPlateaued,
    /// Cycle budget exhausted
    ReflectionBudgetExhausted,
    /// Final quality bundle computed; draft frozen
    Scored,
}

/// Guard: planning is not justified for short sections
pub fn planning_justified(spec: &SectionSpec) -> bool {
    spec.expected_words >= pipeline_constants::PLANNING_WORD_THRESHOLD
}

// =============================================================================
// Context & Output
// =============================================================================

/// Read-only inputs for one section run
pub struct SectionContext<'a> {
    pub topic: &'a str,
    pub spec: &'a SectionSpec,
    /// Corpus documents the section may draw on
    pub sources: &'a [SourceDocument],
    /// Summary of earlier sections, maintained by the driver
    pub rolling_summary: &'a str,
    /// Composite score of the previous section, when one exists
    pub prior_score: Option<f32>,
}

/// Result of one section run
#[derive(Debug)]
pub struct SectionOutput {
    pub draft: SectionDraft,
    pub transitions: Vec<Transition>,
    pub reflection_cycles: u32,
    pub planning_calls: usize,
    pub writing_calls: usize,
    pub reflection_calls: usize,
}

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Chunks retrieved per section
    pub chunk_limit: usize,
    pub plateau_epsilon: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_limit: crate::constants::retrieval::DEFAULT_LIMIT,
            plateau_epsilon: pipeline_constants::PLATEAU_EPSILON,
        }
    }
}

// =============================================================================
// Section Pipeline
// =============================================================================

/// Drives one section through plan, write, reflect, and score
pub struct SectionPipeline {
    model: SharedModel,
    retriever: Arc<ChunkRetriever>,
    metrics: MetricsEngine,
    config: PipelineConfig,
}

impl SectionPipeline {
    pub fn new(model: SharedModel, retriever: Arc<ChunkRetriever>) -> Self {
        Self {
            model,
            retriever,
            metrics: MetricsEngine::new(),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the full state machine for one section
    #[instrument(skip_all, fields(section = %ctx.spec.key, words = ctx.spec.expected_words))]
    pub async fn run(&self, ctx: &SectionContext<'_>) -> Result<SectionOutput> {
        let mut transitions = Vec::new();
        let mut state = SectionState::Planning;

        let mut plan: Option<SectionPlan> = None;
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut lenient_retrieval = false;
        let mut draft: Option<SectionDraft> = None;
        let mut decision: Option<ReflectionDecision> = None;
        let mut reflection_cycles = 0u32;
        let mut reflection_errored = false;
        let mut planning_calls = 0;
        let mut writing_calls = 0;
        let mut reflection_calls = 0;

        while state != SectionState::Done {
            state = match state {
                SectionState::Planning => {
                    if !planning_justified(ctx.spec) {
                        transitions.push(Transition::PlanningSkipped);
                        plan = Some(SectionPlan::fallback(ctx.spec, ctx.topic));
                    } else {
                        planning_calls += 1;
                        let built = self.plan_section(ctx).await;
                        transitions.push(if built.is_fallback {
                            Transition::PlanFellBack
                        } else {
                            Transition::PlanAccepted
                        });
                        plan = Some(built);
                    }
                    SectionState::Writing
                }

                SectionState::Writing => {
                    let retrieved = self.retrieve_for_section(ctx).await?;
                    lenient_retrieval = retrieved.1;
                    chunks = retrieved.0.chunks;

                    writing_calls += 1;
                    let plan_ref = plan.as_ref().expect("plan set during PLANNING");
                    let content = self.write_draft(ctx, plan_ref, &chunks).await?;
                    let mut d =
                        SectionDraft::new(ctx.spec.key.clone(), ctx.spec.title.clone(), content);
                    d.citations = distinct_source_ids(&d.content);
                    draft = Some(d);
                    transitions.push(Transition::DraftWritten);

                    let current = self
                        .metrics
                        .score(&draft.as_ref().expect("draft just set").content, ctx.spec, &chunks)
                        .composite();
                    let dec = ReflectionPolicy::decide(
                        &ctx.spec.key,
                        ctx.spec.expected_words,
                        Some(ctx.prior_score.unwrap_or(current)),
                    );
                    decision = Some(dec);
                    if dec.use_reflection {
                        transitions.push(Transition::ReflectionEntered);
                        SectionState::Reflecting
                    } else {
                        transitions.push(Transition::ReflectionSkipped);
                        SectionState::Scoring
                    }
                }

                SectionState::Reflecting => {
                    let d = decision.expect("decision set during WRITING");
                    let kept = draft.as_mut().expect("draft set during WRITING");
                    let outcome = self
                        .reflect(ctx, kept, &chunks, d.max_cycles, &mut transitions)
                        .await;
                    reflection_cycles = outcome.cycles_kept;
                    reflection_calls += outcome.calls;
                    reflection_errored = outcome.errored;
                    SectionState::Scoring
                }

                SectionState::Scoring => {
                    let kept = draft.as_mut().expect("draft set during WRITING");
                    let plan_ref = plan.as_ref().expect("plan set during PLANNING");
                    let metric_score =
                        self.metrics.score(&kept.content, ctx.spec, &chunks).composite();

                    kept.quality = score_stages(StageFacts {
                        planning_skipped: !planning_justified(ctx.spec),
                        plan_fell_back: plan_ref.is_fallback,
                        lenient_retrieval,
                        reflection_ran: decision.map(|d| d.use_reflection).unwrap_or(false),
                        reflection_errored,
                        metric_score,
                    });
                    kept.citations = distinct_source_ids(&kept.content);
                    transitions.push(Transition::Scored);
                    SectionState::Done
                }

                SectionState::Done => SectionState::Done,
            };
        }

        let draft = draft.expect("draft set before DONE");
        info!(
            section = %ctx.spec.key,
            words = draft.word_count(),
            composite = draft.quality.composite(),
            cycles = reflection_cycles,
            "Section complete"
        );

        Ok(SectionOutput {
            draft,
            transitions,
            reflection_cycles,
            planning_calls,
            writing_calls,
            reflection_calls,
        })
    }

    /// PLANNING: request and validate a structured plan; never aborts
    async fn plan_section(&self, ctx: &SectionContext<'_>) -> SectionPlan {
        let available: HashSet<SourceId> =
            ctx.spec.candidate_sources.iter().cloned().collect();
        let prompt = plan_prompt(ctx);

        match self.model.generate_structured(&prompt, &plan_schema()).await {
            Ok(response) => SectionPlan::from_model_output(
                response.content,
                ctx.spec,
                ctx.topic,
                &available,
            ),
            Err(err) => {
                warn!(section = %ctx.spec.key, error = %err, "Planning call failed; using fallback plan");
                SectionPlan::fallback(ctx.spec, ctx.topic)
            }
        }
    }

    /// Retrieve chunks, topping up with abstracts on a low-quality signal.
    /// Returns the set and whether the lenient path was taken.
    async fn retrieve_for_section(
        &self,
        ctx: &SectionContext<'_>,
    ) -> Result<(RankedChunks, bool)> {
        let query = format!("{} {}", ctx.topic, ctx.spec.title);
        match self
            .retriever
            .retrieve(&query, ctx.sources, self.config.chunk_limit)
            .await
        {
            Ok(set) => Ok((set, false)),
            Err(DraftError::LowRetrievalQuality { average, floor }) => {
                debug!(average, floor, "Low retrieval quality; topping up with abstracts");
                let set = self
                    .retriever
                    .retrieve_lenient(&query, ctx.sources, self.config.chunk_limit)
                    .await?;
                Ok((set, true))
            }
            Err(err) => Err(err),
        }
    }

    /// WRITING: draft conditioned on the plan and retrieved passages
    async fn write_draft(
        &self,
        ctx: &SectionContext<'_>,
        plan: &SectionPlan,
        chunks: &[Chunk],
    ) -> Result<String> {
        let prompt = write_prompt(ctx, plan, chunks);
        let response = self.model.generate_text(&prompt).await?;
        if response.content.trim().is_empty() {
            return Err(DraftError::section(
                ctx.spec.key.to_string(),
                "writing",
                "model returned an empty draft",
            ));
        }
        Ok(response.content)
    }

    /// REFLECTING: bounded critique-and-revise loop keeping the best draft
    async fn reflect(
        &self,
        ctx: &SectionContext<'_>,
        kept: &mut SectionDraft,
        chunks: &[Chunk],
        max_cycles: u32,
        transitions: &mut Vec<Transition>,
    ) -> ReflectionOutcome {
        let mut outcome = ReflectionOutcome::default();
        let mut best_score = self.metrics.score(&kept.content, ctx.spec, chunks).composite();

        for cycle in 0..max_cycles {
            outcome.calls += 1;
            let prompt = critique_prompt(ctx, &kept.content);
            let revised = match self.model.generate_text(&prompt).await {
                Ok(r) => r.content,
                Err(err) => {
                    warn!(
                        section = %ctx.spec.key,
                        cycle,
                        error = %err,
                        "Reflection cycle failed; keeping best draft"
                    );
                    outcome.errored = true;
                    break;
                }
            };

            let revised_score = self.metrics.score(&revised, ctx.spec, chunks).composite();
            if revised_score < best_score {
                // Never regress the kept draft
                transitions.push(Transition::CycleDiscarded);
                transitions.push(Transition::ReflectionPlateaued);
                break;
            }

            let improvement = revised_score - best_score;
            kept.content = revised;
            kept.revision += 1;
            best_score = revised_score;
            outcome.cycles_kept += 1;
            transitions.push(Transition::CycleKept);

            if improvement < self.config.plateau_epsilon {
                transitions.push(Transition::ReflectionPlateaued);
                break;
            }
        }

        if outcome.calls as u32 == max_cycles
            && !transitions.contains(&Transition::ReflectionPlateaued)
            && !outcome.errored
        {
            transitions.push(Transition::ReflectionBudgetExhausted);
        }
        outcome
    }
}

#[derive(Debug, Default)]
struct ReflectionOutcome {
    cycles_kept: u32,
    calls: usize,
    errored: bool,
}

// =============================================================================
// Scoring
// =============================================================================

struct StageFacts {
    planning_skipped: bool,
    plan_fell_back: bool,
    lenient_retrieval: bool,
    reflection_ran: bool,
    reflection_errored: bool,
    metric_score: f32,
}

/// Stage-weighted overall scoring: each sub-score degrades gracefully
/// rather than being withheld when its stage was skipped or invalid
fn score_stages(facts: StageFacts) -> QualityBundle {
    let degraded = pipeline_constants::DEGRADED_STAGE_SCORE;
    let normal = pipeline_constants::DEFAULT_STAGE_SCORE;

    QualityBundle {
        planning: if facts.planning_skipped || facts.plan_fell_back {
            degraded
        } else {
            normal
        },
        writing: if facts.lenient_retrieval { degraded } else { normal },
        reflection: if !facts.reflection_ran || facts.reflection_errored {
            degraded
        } else {
            normal
        },
        metrics: facts.metric_score,
    }
}

// =============================================================================
// Prompts
// =============================================================================

fn plan_prompt(ctx: &SectionContext<'_>) -> String {
    let sources: Vec<String> = ctx
        .sources
        .iter()
        .map(|d| format!("- {} ({})", d.title, d.id))
        .collect();
    format!(
        "Plan the section \"{}\" (target {} words) for a paper on \"{}\".\n\
         Available sources:\n{}\n\
         Produce outline points, citation-need slots with lowercase placeholder keys, \
         key arguments, and a paragraph estimate.",
        ctx.spec.title,
        ctx.spec.expected_words,
        ctx.topic,
        sources.join("\n")
    )
}

fn write_prompt(ctx: &SectionContext<'_>, plan: &SectionPlan, chunks: &[Chunk]) -> String {
    let outline = plan.outline.join("\n- ");
    let evidence: Vec<String> = chunks
        .iter()
        .map(|c| format!("[{}] {}", citation_token(&c.source_id), c.content))
        .collect();
    let summary = if ctx.rolling_summary.is_empty() {
        String::new()
    } else {
        format!("Earlier sections covered:\n{}\n\n", ctx.rolling_summary)
    };
    format!(
        "{}Write the section \"{}\" (about {} words) for a paper on \"{}\".\n\
         Outline:\n- {}\n\n\
         Evidence passages:\n{}\n\n\
         Cite sources only with tokens of the form [[cite:<source-id>]] placed after the \
         claim they support. Never write formatted citations like (Author, Year).",
        summary,
        ctx.spec.title,
        ctx.spec.expected_words,
        ctx.topic,
        outline,
        evidence.join("\n")
    )
}

fn critique_prompt(ctx: &SectionContext<'_>, current: &str) -> String {
    format!(
        "Critique and revise the section \"{}\" for a paper on \"{}\". Improve accuracy, \
         citation placement, and flow while keeping all [[cite:...]] tokens bound to the \
         same sources. Return only the revised section.\n\n{}",
        ctx.spec.title, ctx.topic, current
    )
}

// =============================================================================
// Tests
// =============================================================================
