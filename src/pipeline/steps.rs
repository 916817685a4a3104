//! The standard analysis steps.
//!
//! | Step | Completes into | Patch |
//! |------|----------------|-------|
//! | [`ProcessRequirement`] | `requirement_processed` | `Requirement` |
//! | [`FindCandidates`] | `candidates_found` | `Candidates` |
//! | [`SelectCandidates`] | `candidates_selected` | `Selection` |
//! | [`GenerationStep`] ×4 | `modules_identified` … `backlog_generated` | `Output` |

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::state::{RunState, RunStatus, StepDelta, StepPatch};
use super::Step;
use crate::config::EmptyCandidatePolicy;
use crate::documents::{project, DocumentAssembler, ProjectionLimits};
use crate::error::StepError;
use crate::generation::{GenerationRequest, Generator};
use crate::lexical::extract_keywords;
use crate::models::ArtifactKind;
use crate::repair::{parse_output, OutputShape};
use crate::search::HybridRetriever;

/// Collapse whitespace and extract keywords. Blank input fails the run.
pub struct ProcessRequirement {
    max_terms: usize,
}

impl ProcessRequirement {
    pub fn new(max_terms: usize) -> Self {
        Self { max_terms }
    }
}

#[async_trait]
impl Step for ProcessRequirement {
    fn name(&self) -> &'static str {
        "process_requirement"
    }

    fn completes(&self) -> RunStatus {
        RunStatus::RequirementProcessed
    }

    async fn run(&self, state: &RunState) -> Result<StepDelta, StepError> {
        let normalized = state.requirement.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return Err(StepError::InvalidInput("requirement text is empty".into()));
        }
        let keywords = extract_keywords(&normalized, self.max_terms);
        Ok(StepDelta::new(StepPatch::Requirement {
            normalized,
            keywords,
        }))
    }
}

/// Hybrid search for similar historical projects.
pub struct FindCandidates {
    retriever: Arc<HybridRetriever>,
    on_empty: EmptyCandidatePolicy,
}

impl FindCandidates {
    pub fn new(retriever: Arc<HybridRetriever>, on_empty: EmptyCandidatePolicy) -> Self {
        Self {
            retriever,
            on_empty,
        }
    }
}

#[async_trait]
impl Step for FindCandidates {
    fn name(&self) -> &'static str {
        "find_candidates"
    }

    fn completes(&self) -> RunStatus {
        RunStatus::CandidatesFound
    }

    async fn run(&self, state: &RunState) -> Result<StepDelta, StepError> {
        let candidates = self
            .retriever
            .search_with(&state.normalized_requirement, self.retriever.defaults())
            .await?;

        if !candidates.is_empty() {
            return Ok(StepDelta::new(StepPatch::Candidates(candidates)));
        }
        let delta = StepDelta::new(StepPatch::Candidates(Vec::new()))
            .with_warnings(vec!["no similar historical projects found".to_string()]);
        Ok(match self.on_empty {
            EmptyCandidatePolicy::Complete => delta.finishing(),
            EmptyCandidatePolicy::Continue => delta,
        })
    }
}

/// Keep the best `top_n` candidates and assemble their documents.
pub struct SelectCandidates {
    assembler: Arc<DocumentAssembler>,
    top_n: usize,
}

impl SelectCandidates {
    pub fn new(assembler: Arc<DocumentAssembler>, top_n: usize) -> Self {
        Self { assembler, top_n }
    }
}

#[async_trait]
impl Step for SelectCandidates {
    fn name(&self) -> &'static str {
        "select_candidates"
    }

    fn completes(&self) -> RunStatus {
        RunStatus::CandidatesSelected
    }

    async fn run(&self, state: &RunState) -> Result<StepDelta, StepError> {
        let selected: Vec<_> = state.candidates.iter().take(self.top_n).cloned().collect();
        let batch = self.assembler.load(&selected).await;
        Ok(StepDelta::new(StepPatch::Selection {
            selected,
            context: batch.sets.into_iter().collect(),
        })
        .with_warnings(batch.warnings))
    }
}

/// Earlier artifacts each generation step is shown.
fn prior_outputs(artifact: ArtifactKind) -> &'static [ArtifactKind] {
    match artifact {
        ArtifactKind::ImpactedModules => &[],
        ArtifactKind::EffortEstimate => &[ArtifactKind::ImpactedModules],
        ArtifactKind::DesignDocument => &[ArtifactKind::ImpactedModules, ArtifactKind::EffortEstimate],
        ArtifactKind::Backlog => &[
            ArtifactKind::ImpactedModules,
            ArtifactKind::EffortEstimate,
            ArtifactKind::DesignDocument,
        ],
    }
}

/// Build the full context for a generation request.
pub fn generation_context(artifact: ArtifactKind, state: &RunState, limits: ProjectionLimits) -> Value {
    let mut context = match project(artifact, &state.context, limits) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    context.insert(
        "keywords".to_string(),
        Value::Array(state.keywords.iter().cloned().map(Value::String).collect()),
    );
    let mut prior = Map::new();
    for dep in prior_outputs(artifact) {
        if let Some(output) = state.output(*dep) {
            prior.insert(dep.as_str().to_string(), output.value.clone());
        }
    }
    if !prior.is_empty() {
        context.insert("prior_outputs".to_string(), Value::Object(prior));
    }
    Value::Object(context)
}

/// Generate one artifact and parse it into shape `S`.
pub struct GenerationStep<S> {
    artifact: ArtifactKind,
    generator: Arc<dyn Generator>,
    limits: ProjectionLimits,
    shape: PhantomData<fn() -> S>,
}

impl<S: OutputShape> GenerationStep<S> {
    pub fn new(artifact: ArtifactKind, generator: Arc<dyn Generator>, limits: ProjectionLimits) -> Self {
        Self {
            artifact,
            generator,
            limits,
            shape: PhantomData,
        }
    }
}

#[async_trait]
impl<S: OutputShape + Send + 'static> Step for GenerationStep<S> {
    fn name(&self) -> &'static str {
        self.artifact.as_str()
    }

    fn completes(&self) -> RunStatus {
        RunStatus::after(self.artifact)
    }

    async fn run(&self, state: &RunState) -> Result<StepDelta, StepError> {
        let request = GenerationRequest {
            step: self.artifact,
            requirement: state.normalized_requirement.clone(),
            context: generation_context(self.artifact, state, self.limits),
        };

        let raw = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| StepError::Generation(format!("{:#}", e)))?;

        let parsed = parse_output::<S>(&raw)?;
        let mut warnings = Vec::new();
        if parsed.repaired {
            tracing::info!(step = self.artifact.as_str(), "generated output needed repair");
            warnings.push(format!("{} output was repaired before parsing", self.artifact));
        }
        let output = parsed
            .into_output()
            .map_err(|e| StepError::Internal(format!("serializing {} output: {}", self.artifact, e)))?;

        Ok(StepDelta::new(StepPatch::Output {
            artifact: self.artifact,
            output,
        })
        .with_warnings(warnings))
    }
}
