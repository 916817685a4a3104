//! Pipeline execution engine.
//!
//! A run moves through a fixed sequence of [`Step`]s. The engine owns every
//! [`RunState`]: steps read a borrowed state and return a [`StepDelta`],
//! which the engine merges, logs, and turns into a status transition.
//!
//! ```text
//! created → requirement_processed → candidates_found → candidates_selected
//!         → modules_identified → effort_estimated → design_drafted
//!         → backlog_generated → completed
//!
//!   (any non-terminal) ──failure / timeout──▶ error
//!   candidates_found ──no candidates (policy = complete)──▶ completed
//! ```
//!
//! Each run sits behind its own `tokio::sync::Mutex`, so one run advances
//! at most one step at a time while independent runs proceed concurrently.
//! There is no retry at this layer: a failed step ends the run.

pub mod outputs;
pub mod state;
pub mod steps;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::config::{Config, PipelineConfig};
use crate::documents::{DocumentAssembler, DocumentStore, ProjectionLimits};
use crate::embedding::EmbeddingProvider;
use crate::error::{truncate_for_log, PipelineError, StepError};
use crate::generation::Generator;
use crate::index::VectorIndex;
use crate::models::ArtifactKind;
use crate::search::{HybridRetriever, SearchParams};

use outputs::{BacklogDraft, DesignDraft, EffortEstimate, ImpactedModules};
pub use state::{RunError, RunEvent, RunState, RunStatus, StepDelta, StepPatch, StepTiming};
use steps::{FindCandidates, GenerationStep, ProcessRequirement, SelectCandidates};

/// One unit of work in a run.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    /// Status the run enters when this step succeeds.
    fn completes(&self) -> RunStatus;

    async fn run(&self, state: &RunState) -> Result<StepDelta, StepError>;
}

/// External collaborators for [`Pipeline::standard`].
#[derive(Clone)]
pub struct Services {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn VectorIndex>,
    pub store: Arc<dyn DocumentStore>,
    pub generator: Arc<dyn Generator>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub step_timeout: Duration,
    pub max_error_chars: usize,
}

impl From<&PipelineConfig> for EngineSettings {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            step_timeout: Duration::from_secs(cfg.step_timeout_secs),
            max_error_chars: cfg.max_error_chars,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

/// Result of a single [`Pipeline::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// A step ran; the run is now in this status.
    Advanced(RunStatus),
    /// The run was already terminal; nothing changed.
    Terminal(RunStatus),
}

pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
    settings: EngineSettings,
    runs: RwLock<HashMap<String, Arc<Mutex<RunState>>>>,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn Step>>, settings: EngineSettings) -> Self {
        Self {
            steps,
            settings,
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// The seven-step requirement analysis pipeline.
    pub fn standard(config: &Config, services: Services) -> Self {
        let retriever = Arc::new(HybridRetriever::new(
            services.embedder,
            services.index,
            SearchParams::from(&config.retrieval),
        ));
        let limits = ProjectionLimits::from(&config.documents);
        let assembler = Arc::new(DocumentAssembler::new(
            services.store,
            config.documents.max_concurrency,
            limits,
        ));
        let generator = services.generator;

        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(ProcessRequirement::new(config.retrieval.max_query_terms)),
            Box::new(FindCandidates::new(retriever, config.pipeline.on_empty_candidates)),
            Box::new(SelectCandidates::new(assembler, config.documents.top_n)),
            Box::new(GenerationStep::<ImpactedModules>::new(
                ArtifactKind::ImpactedModules,
                generator.clone(),
                limits,
            )),
            Box::new(GenerationStep::<EffortEstimate>::new(
                ArtifactKind::EffortEstimate,
                generator.clone(),
                limits,
            )),
            Box::new(GenerationStep::<DesignDraft>::new(
                ArtifactKind::DesignDocument,
                generator.clone(),
                limits,
            )),
            Box::new(GenerationStep::<BacklogDraft>::new(
                ArtifactKind::Backlog,
                generator,
                limits,
            )),
        ];
        Self::new(steps, EngineSettings::from(&config.pipeline))
    }

    /// Register a new run and return its id.
    pub async fn start(&self, requirement: impl Into<String>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let state = RunState::new(id.clone(), requirement.into());
        self.runs
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(state)));
        tracing::info!(run_id = %id, "run created");
        id
    }

    async fn handle(&self, run_id: &str) -> Result<Arc<Mutex<RunState>>, PipelineError> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownRun(run_id.to_string()))
    }

    /// A copy of the run's current state.
    pub async fn snapshot(&self, run_id: &str) -> Result<RunState, PipelineError> {
        let run = self.handle(run_id).await?;
        let state = run.lock().await;
        Ok(state.clone())
    }

    /// Execute exactly one step of the run.
    pub async fn advance(&self, run_id: &str) -> Result<AdvanceOutcome, PipelineError> {
        let run = self.handle(run_id).await?;
        let mut state = run.lock().await;

        if state.status.is_terminal() {
            return Ok(AdvanceOutcome::Terminal(state.status));
        }

        let Some(step) = self.steps.get(state.current_step) else {
            finish(&mut state, None);
            return Ok(AdvanceOutcome::Advanced(state.status));
        };
        let name = step.name();

        let started_at = Utc::now();
        let clock = Instant::now();
        let result = match tokio::time::timeout(self.settings.step_timeout, step.run(&state)).await {
            Ok(result) => result,
            Err(_) => Err(StepError::Timeout(self.settings.step_timeout.as_secs())),
        };
        let duration_ms = clock.elapsed().as_millis() as u64;
        state.timings.push(StepTiming {
            step: name.to_string(),
            started_at,
            duration_ms,
        });

        match result {
            Ok(delta) => {
                let to = step.completes();
                // A rejected step contributes nothing to the run.
                if !state.status.can_transition_to(to) {
                    fail(
                        &mut state,
                        name,
                        StepError::Internal(format!("illegal transition to {:?}", to)),
                        self.settings.max_error_chars,
                    );
                    return Ok(AdvanceOutcome::Advanced(state.status));
                }
                let finish_run = delta.finish_run;
                state.apply(delta);
                state.current_step += 1;
                state.transition(to, Some(name), format!("{} completed", name));
                tracing::info!(run_id, step = name, status = ?to, duration_ms, "step completed");

                if finish_run || state.current_step >= self.steps.len() {
                    finish(&mut state, Some(name));
                }
            }
            Err(err) => fail(&mut state, name, err, self.settings.max_error_chars),
        }
        Ok(AdvanceOutcome::Advanced(state.status))
    }

    /// Drop a run from the engine, returning its final state.
    ///
    /// Runs are kept until removed; long-lived callers should remove each
    /// run once its result has been consumed.
    pub async fn remove(&self, run_id: &str) -> Result<RunState, PipelineError> {
        let run = self
            .runs
            .write()
            .await
            .remove(run_id)
            .ok_or_else(|| PipelineError::UnknownRun(run_id.to_string()))?;
        // A concurrent `advance` may still hold a clone of the handle.
        let state = run.lock().await;
        tracing::debug!(run_id, status = ?state.status, "run removed");
        Ok(state.clone())
    }

    /// Number of runs currently held.
    pub async fn run_count(&self) -> usize {
        self.runs.read().await.len()
    }

    /// Advance until the run reaches `completed` or `error`.
    pub async fn run_to_completion(&self, run_id: &str) -> Result<RunState, PipelineError> {
        while let AdvanceOutcome::Advanced(status) = self.advance(run_id).await? {
            if status.is_terminal() {
                break;
            }
        }
        self.snapshot(run_id).await
    }
}

fn finish(state: &mut RunState, step: Option<&str>) {
    let message = match state.current_step {
        0 => "run completed".to_string(),
        n => format!("run completed after {} step(s)", n),
    };
    if state.transition(RunStatus::Completed, step, message) {
        tracing::info!(run_id = %state.id, "run completed");
    }
}

fn fail(state: &mut RunState, step: &str, err: StepError, max_chars: usize) {
    let kind = err.kind();
    let detail = truncate_for_log(&err.to_string(), max_chars);
    tracing::warn!(run_id = %state.id, step, kind = %kind, error = %detail, "step failed");
    state.error = Some(RunError {
        step: step.to_string(),
        kind,
        detail: detail.clone(),
    });
    state.transition(RunStatus::Error, Some(step), detail);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repair::ParsedOutput;

    struct Echo(RunStatus, ArtifactKind);

    #[async_trait]
    impl Step for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn completes(&self) -> RunStatus {
            self.0
        }
        async fn run(&self, state: &RunState) -> Result<StepDelta, StepError> {
            Ok(StepDelta::new(StepPatch::Output {
                artifact: self.1,
                output: ParsedOutput {
                    value: serde_json::Value::String(state.requirement.clone()),
                    repaired: false,
                },
            }))
        }
    }

    struct Slow;

    #[async_trait]
    impl Step for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn completes(&self) -> RunStatus {
            RunStatus::CandidatesFound
        }
        async fn run(&self, _state: &RunState) -> Result<StepDelta, StepError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(StepDelta::new(StepPatch::Candidates(Vec::new())))
        }
    }

    #[tokio::test]
    async fn last_step_completes_run() {
        let pipeline = Pipeline::new(vec![Box::new(Echo(RunStatus::RequirementProcessed, ArtifactKind::ImpactedModules))], EngineSettings::default());
        let id = pipeline.start("hello").await;
        let state = pipeline.run_to_completion(&id).await.unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.events.len(), 2);
        assert_eq!(state.timings.len(), 1);
        assert_eq!(pipeline.advance(&id).await.unwrap(), AdvanceOutcome::Terminal(RunStatus::Completed));
    }

    #[tokio::test]
    async fn backwards_status_is_an_internal_error() {
        let pipeline = Pipeline::new(
            vec![
                Box::new(Echo(RunStatus::CandidatesFound, ArtifactKind::ImpactedModules)),
                Box::new(Echo(RunStatus::RequirementProcessed, ArtifactKind::EffortEstimate)),
            ],
            EngineSettings::default(),
        );
        let id = pipeline.start("x").await;
        let state = pipeline.run_to_completion(&id).await.unwrap();
        assert_eq!(state.status, RunStatus::Error);
        assert_eq!(state.current_step, 1);
        assert!(state.outputs.contains_key(&ArtifactKind::ImpactedModules));
        assert!(!state.outputs.contains_key(&ArtifactKind::EffortEstimate));
        let statuses: Vec<RunStatus> = state.events.iter().map(|e| e.to).collect();
        assert_eq!(statuses, vec![RunStatus::CandidatesFound, RunStatus::Error]);
        assert_eq!(state.error.unwrap().kind, crate::error::ErrorKind::Internal);
    }

    #[tokio::test]
    async fn removed_run_is_gone() {
        let pipeline = Pipeline::new(
            vec![Box::new(Echo(RunStatus::RequirementProcessed, ArtifactKind::ImpactedModules))],
            EngineSettings::default(),
        );
        let keep = pipeline.start("keep").await;
        let id = pipeline.start("drop").await;
        pipeline.run_to_completion(&id).await.unwrap();
        assert_eq!(pipeline.run_count().await, 2);

        let state = pipeline.remove(&id).await.unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.requirement, "drop");
        assert_eq!(pipeline.run_count().await, 1);
        assert!(matches!(pipeline.snapshot(&id).await, Err(PipelineError::UnknownRun(_))));
        assert!(matches!(pipeline.advance(&id).await, Err(PipelineError::UnknownRun(_))));
        assert!(matches!(pipeline.remove(&id).await, Err(PipelineError::UnknownRun(_))));
        assert!(pipeline.snapshot(&keep).await.is_ok());
    }

    #[tokio::test]
    async fn timeout_routes_to_error() {
        let settings = EngineSettings {
            step_timeout: Duration::from_millis(50),
            max_error_chars: 100,
        };
        let pipeline = Pipeline::new(vec![Box::new(Slow)], settings);
        let id = pipeline.start("x").await;
        let state = pipeline.run_to_completion(&id).await.unwrap();
        assert_eq!(state.status, RunStatus::Error);
        let error = state.error.unwrap();
        assert_eq!(error.step, "slow");
        assert_eq!(error.kind, crate::error::ErrorKind::StepTimeout);
    }

    #[tokio::test]
    async fn unknown_run_is_reported() {
        let pipeline = Pipeline::new(Vec::new(), EngineSettings::default());
        assert!(matches!(
            pipeline.advance("missing").await,
            Err(PipelineError::UnknownRun(_))
        ));
    }
}
