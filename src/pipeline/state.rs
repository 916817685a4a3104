//! Typed run state and the patches steps return.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::documents::AssembledDocumentSet;
use crate::error::ErrorKind;
use crate::models::{ArtifactKind, CandidateRecord};
use crate::repair::ParsedOutput;

/// Lifecycle of a run, in the only order it may move through.
///
/// `Completed` may be reached early (no candidates); `Error` from any
/// non-terminal status. Both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    RequirementProcessed,
    CandidatesFound,
    CandidatesSelected,
    ModulesIdentified,
    EffortEstimated,
    DesignDrafted,
    BacklogGenerated,
    Completed,
    Error,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Error)
    }

    /// Forward-only; nothing leaves a terminal status.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        !self.is_terminal() && (next == RunStatus::Error || next > *self)
    }

    /// Status reached once the given artifact has been generated.
    pub fn after(artifact: ArtifactKind) -> RunStatus {
        match artifact {
            ArtifactKind::ImpactedModules => RunStatus::ModulesIdentified,
            ArtifactKind::EffortEstimate => RunStatus::EffortEstimated,
            ArtifactKind::DesignDocument => RunStatus::DesignDrafted,
            ArtifactKind::Backlog => RunStatus::BacklogGenerated,
        }
    }
}

/// One entry of a run's append-only history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunEvent {
    pub seq: usize,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub from: RunStatus,
    pub to: RunStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepTiming {
    pub step: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Why a run ended in `Error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunError {
    pub step: String,
    pub kind: ErrorKind,
    /// Human-readable detail, already truncated.
    pub detail: String,
}

/// The single mutation a step may request. Each variant replaces the fields
/// it names and leaves everything else untouched.
#[derive(Debug, Clone)]
pub enum StepPatch {
    Requirement {
        normalized: String,
        keywords: Vec<String>,
    },
    Candidates(Vec<CandidateRecord>),
    Selection {
        selected: Vec<CandidateRecord>,
        context: BTreeMap<String, AssembledDocumentSet>,
    },
    Output {
        artifact: ArtifactKind,
        output: ParsedOutput,
    },
}

/// What a step hands back to the engine.
#[derive(Debug, Clone)]
pub struct StepDelta {
    pub patch: StepPatch,
    pub warnings: Vec<String>,
    /// Skip the remaining steps and complete the run.
    pub finish_run: bool,
}

impl StepDelta {
    pub fn new(patch: StepPatch) -> Self {
        Self {
            patch,
            warnings: Vec::new(),
            finish_run: false,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn finishing(mut self) -> Self {
        self.finish_run = true;
        self
    }
}

/// Everything known about one analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub id: String,
    pub requirement: String,
    pub normalized_requirement: String,
    pub keywords: Vec<String>,
    pub candidates: Vec<CandidateRecord>,
    pub selected: Vec<CandidateRecord>,
    /// Assembled documents keyed by candidate id. Run-scoped.
    pub context: BTreeMap<String, AssembledDocumentSet>,
    pub outputs: BTreeMap<ArtifactKind, ParsedOutput>,
    /// Index of the next step to execute.
    pub current_step: usize,
    pub status: RunStatus,
    pub error: Option<RunError>,
    pub warnings: Vec<String>,
    pub events: Vec<RunEvent>,
    pub timings: Vec<StepTiming>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(id: String, requirement: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            requirement,
            normalized_requirement: String::new(),
            keywords: Vec::new(),
            candidates: Vec::new(),
            selected: Vec::new(),
            context: BTreeMap::new(),
            outputs: BTreeMap::new(),
            current_step: 0,
            status: RunStatus::Created,
            error: None,
            warnings: Vec::new(),
            events: Vec::new(),
            timings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge a step's delta: field-level replace for the patch, append for warnings.
    pub fn apply(&mut self, delta: StepDelta) {
        match delta.patch {
            StepPatch::Requirement {
                normalized,
                keywords,
            } => {
                self.normalized_requirement = normalized;
                self.keywords = keywords;
            }
            StepPatch::Candidates(candidates) => self.candidates = candidates,
            StepPatch::Selection { selected, context } => {
                self.selected = selected;
                self.context = context;
            }
            StepPatch::Output { artifact, output } => {
                self.outputs.insert(artifact, output);
            }
        }
        self.warnings.extend(delta.warnings);
        self.updated_at = Utc::now();
    }

    /// Move to `to` and append one event. Returns false (and changes
    /// nothing) if the transition would go backwards or leave a terminal status.
    pub(crate) fn transition(&mut self, to: RunStatus, step: Option<&str>, message: String) -> bool {
        if !self.status.can_transition_to(to) {
            return false;
        }
        let at = Utc::now();
        self.events.push(RunEvent {
            seq: self.events.len(),
            at,
            step: step.map(str::to_string),
            from: self.status,
            to,
            message,
        });
        self.status = to;
        self.updated_at = at;
        true
    }

    pub fn output(&self, artifact: ArtifactKind) -> Option<&ParsedOutput> {
        self.outputs.get(&artifact)
    }
}
