//! End-to-end runs of the standard pipeline with in-memory collaborators.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use req_harness::config::Config;
use req_harness::documents::DocumentStore;
use req_harness::embedding::{DisabledProvider, EmbeddingProvider};
use req_harness::error::ErrorKind;
use req_harness::generation::{GenerationRequest, Generator};
use req_harness::index::{IndexHit, VectorIndex};
use req_harness::models::{ArtifactKind, DocumentHandles, ProjectMetadata};
use req_harness::pipeline::{AdvanceOutcome, Pipeline, RunStatus, Services};
use req_harness::search::HybridRetriever;

// ─── Fakes ──────────────────────────────────────────────────────────

struct UnitEmbedder;

#[async_trait]
impl EmbeddingProvider for UnitEmbedder {
    fn model_name(&self) -> &str {
        "unit"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

/// Returns the same neighbours, with fixed similarities, for every query.
struct FixedIndex {
    hits: Vec<IndexHit>,
}

impl FixedIndex {
    fn new(projects: &[(&str, f64, &str, Option<&str>)]) -> Self {
        let hits = projects
            .iter()
            .map(|(id, similarity, text, design)| IndexHit {
                id: id.to_string(),
                metadata: ProjectMetadata {
                    name: format!("Project {}", id.to_uppercase()),
                    summary: String::new(),
                    text: text.to_string(),
                    documents: DocumentHandles {
                        design: design.map(str::to_string),
                        ..Default::default()
                    },
                    content_hash: String::new(),
                },
                similarity: *similarity,
            })
            .collect();
        Self { hits }
    }

    fn empty() -> Self {
        Self { hits: Vec::new() }
    }
}

#[async_trait]
impl VectorIndex for FixedIndex {
    async fn query(&self, _vector: &[f32], top_k: usize) -> Result<Vec<IndexHit>> {
        Ok(self.hits.iter().take(top_k).cloned().collect())
    }
    async fn upsert(&self, _id: &str, _vector: &[f32], _metadata: &ProjectMetadata) -> Result<()> {
        bail!("read-only")
    }
    async fn get(&self, id: &str) -> Result<Option<ProjectMetadata>> {
        Ok(self.hits.iter().find(|h| h.id == id).map(|h| h.metadata.clone()))
    }
    async fn len(&self) -> Result<usize> {
        Ok(self.hits.len())
    }
}

struct MapStore(HashMap<String, Vec<u8>>);

#[async_trait]
impl DocumentStore for MapStore {
    async fn fetch(&self, handle: &str) -> Result<Vec<u8>> {
        match self.0.get(handle) {
            Some(bytes) => Ok(bytes.clone()),
            None => bail!("no such document: {}", handle),
        }
    }
}

/// Replies from a script keyed by step; records every request.
struct ScriptedGenerator {
    replies: HashMap<ArtifactKind, Result<String, String>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn happy() -> Self {
        let mut replies = HashMap::new();
        replies.insert(
            ArtifactKind::ImpactedModules,
            Ok(r#"{"modules": [{"name": "auth", "change": "modify"}]}"#.to_string()),
        );
        replies.insert(
            ArtifactKind::EffortEstimate,
            Ok("```json\n{\"items\": [{\"module\": \"auth\", \"task\": \"oauth2\", \"days\": 5},], \"total_days\": 5}\n```".to_string()),
        );
        replies.insert(
            ArtifactKind::DesignDocument,
            Ok(r#"{"title": "SSO", "sections": [{"heading": "Architecture", "content": "gateway"}]}"#.to_string()),
        );
        replies.insert(
            ArtifactKind::Backlog,
            Ok(r#"{"items": [{"title": "Add OAuth2 login", "points": 3}"#.to_string()),
        );
        Self {
            replies,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with(mut self, step: ArtifactKind, reply: Result<&str, &str>) -> Self {
        self.replies
            .insert(step, reply.map(str::to_string).map_err(str::to_string));
        self
    }

    fn steps_called(&self) -> Vec<ArtifactKind> {
        self.requests.lock().unwrap().iter().map(|r| r.step).collect()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        match self.replies.get(&request.step) {
            Some(Ok(reply)) => Ok(reply.clone()),
            Some(Err(e)) => bail!("{}", e),
            None => bail!("no scripted reply"),
        }
    }
}

fn config(extra: &str) -> Config {
    Config::from_toml_str(&format!("[db]\npath = \"unused.sqlite\"\n{}", extra)).unwrap()
}

fn oauth_index() -> FixedIndex {
    FixedIndex::new(&[
        ("b", 0.75, "portal redesign", Some("b/design.md")),
        ("a", 0.6, "oauth2 login for the admin console", Some("a/design.md")),
    ])
}

fn store() -> MapStore {
    let mut docs = HashMap::new();
    docs.insert(
        "a/design.md".to_string(),
        b"# Overview\nAdmin console SSO\n# Modules\nauth, console\n".to_vec(),
    );
    docs.insert("b/design.md".to_string(), b"# Overview\nPortal refresh\n".to_vec());
    MapStore(docs)
}

fn services(
    embedder: Arc<dyn EmbeddingProvider>,
    index: FixedIndex,
    generator: Arc<ScriptedGenerator>,
) -> Services {
    Services {
        embedder,
        index: Arc::new(index),
        store: Arc::new(store()),
        generator,
    }
}

// ─── Retrieval ──────────────────────────────────────────────────────

#[tokio::test]
async fn oauth2_query_ranks_lexical_match_first() {
    let retriever = HybridRetriever::new(
        Arc::new(UnitEmbedder),
        Arc::new(oauth_index()),
        Default::default(),
    );
    let ranked = retriever
        .search("oauth2 login token refresh session", 10, 0.5, 0.5)
        .await
        .unwrap();

    let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!((ranked[0].score.lexical - 0.4).abs() < 1e-9);
    assert!((ranked[0].score.fused - 0.5).abs() < 1e-9);
    assert_eq!(ranked[1].score.lexical, 0.0);
    assert!((ranked[1].score.fused - 0.375).abs() < 1e-9);
}

#[tokio::test]
async fn empty_query_returns_nothing() {
    let retriever = HybridRetriever::new(
        Arc::new(UnitEmbedder),
        Arc::new(oauth_index()),
        Default::default(),
    );
    assert!(retriever.search("   ", 5, 0.5, 0.5).await.unwrap().is_empty());
}

// ─── Pipeline ───────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_runs_every_step_in_order() {
    let generator = Arc::new(ScriptedGenerator::happy());
    let pipeline = Pipeline::standard(
        &config(""),
        services(Arc::new(UnitEmbedder), oauth_index(), generator.clone()),
    );
    let id = pipeline.start("Add OAuth2 login to the admin console").await;
    let state = pipeline.run_to_completion(&id).await.unwrap();

    assert_eq!(state.status, RunStatus::Completed, "{:?}", state.error);
    let statuses: Vec<RunStatus> = state.events.iter().map(|e| e.to).collect();
    assert_eq!(
        statuses,
        vec![
            RunStatus::RequirementProcessed,
            RunStatus::CandidatesFound,
            RunStatus::CandidatesSelected,
            RunStatus::ModulesIdentified,
            RunStatus::EffortEstimated,
            RunStatus::DesignDrafted,
            RunStatus::BacklogGenerated,
            RunStatus::Completed,
        ]
    );
    assert_eq!(state.timings.len(), 7);
    assert_eq!(generator.steps_called(), ArtifactKind::ALL.to_vec());

    assert_eq!(state.candidates[0].id, "a");
    assert_eq!(state.context.len(), 2);
    assert_eq!(state.outputs.len(), 4);
    assert!(!state.outputs[&ArtifactKind::ImpactedModules].repaired);
    assert!(state.outputs[&ArtifactKind::EffortEstimate].repaired);
    assert_eq!(
        state.outputs[&ArtifactKind::Backlog].value["items"][0]["title"],
        "Add OAuth2 login"
    );

    let requests = generator.requests.lock().unwrap();
    let estimate_request = &requests[1];
    assert_eq!(
        estimate_request.context["prior_outputs"]["impacted_modules"]["modules"][0]["name"],
        "auth"
    );
    let projects = estimate_request.context["similar_projects"].as_array().unwrap();
    assert_eq!(projects[0]["project_id"], "a");

    let serialized = serde_json::to_value(&state).unwrap();
    assert_eq!(serialized["status"], "completed");
}

#[tokio::test]
async fn zero_candidates_completes_without_generation() {
    let generator = Arc::new(ScriptedGenerator::happy());
    let pipeline = Pipeline::standard(
        &config(""),
        services(Arc::new(UnitEmbedder), FixedIndex::empty(), generator.clone()),
    );
    let id = pipeline.start("Something entirely new").await;
    let state = pipeline.run_to_completion(&id).await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert!(state.candidates.is_empty());
    assert!(state.outputs.is_empty());
    assert!(state.error.is_none());
    assert!(generator.steps_called().is_empty());
    assert!(state.warnings.iter().any(|w| w.contains("no similar")));
}

#[tokio::test]
async fn zero_candidates_can_continue_by_policy() {
    let generator = Arc::new(ScriptedGenerator::happy());
    let pipeline = Pipeline::standard(
        &config("[pipeline]\non_empty_candidates = \"continue\"\n"),
        services(Arc::new(UnitEmbedder), FixedIndex::empty(), generator.clone()),
    );
    let id = pipeline.start("Something entirely new").await;
    let state = pipeline.run_to_completion(&id).await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.outputs.len(), 4);
    assert_eq!(generator.steps_called().len(), 4);
}

#[tokio::test]
async fn failing_step_freezes_run_at_error() {
    let generator = Arc::new(
        ScriptedGenerator::happy().with(ArtifactKind::EffortEstimate, Err("upstream 503")),
    );
    let pipeline = Pipeline::standard(
        &config(""),
        services(Arc::new(UnitEmbedder), oauth_index(), generator.clone()),
    );
    let id = pipeline.start("Add OAuth2 login").await;
    let state = pipeline.run_to_completion(&id).await.unwrap();

    assert_eq!(state.status, RunStatus::Error);
    let error = state.error.as_ref().unwrap();
    assert_eq!(error.step, "effort_estimate");
    assert_eq!(error.kind, ErrorKind::GenerationFailed);
    assert!(error.detail.contains("upstream 503"));
    // Output merged before the failure survives.
    assert!(state.outputs.contains_key(&ArtifactKind::ImpactedModules));
    assert!(!state.outputs.contains_key(&ArtifactKind::EffortEstimate));
    assert_eq!(state.events.last().unwrap().to, RunStatus::Error);

    let events_before = state.events.len();
    assert_eq!(
        pipeline.advance(&id).await.unwrap(),
        AdvanceOutcome::Terminal(RunStatus::Error)
    );
    let after = pipeline.snapshot(&id).await.unwrap();
    assert_eq!(after.events.len(), events_before);
    assert_eq!(generator.steps_called().len(), 2);
}

#[tokio::test]
async fn unparseable_output_is_a_parse_failure() {
    let generator = Arc::new(
        ScriptedGenerator::happy().with(ArtifactKind::ImpactedModules, Ok("I cannot help with that.")),
    );
    let pipeline = Pipeline::standard(
        &config("[pipeline]\nmax_error_chars = 40\n"),
        services(Arc::new(UnitEmbedder), oauth_index(), generator),
    );
    let id = pipeline.start("Add OAuth2 login").await;
    let state = pipeline.run_to_completion(&id).await.unwrap();

    let error = state.error.unwrap();
    assert_eq!(error.kind, ErrorKind::ParseFailure);
    assert_eq!(error.step, "impacted_modules");
    assert!(error.detail.contains("total_chars="));
}

#[tokio::test]
async fn unavailable_embedder_is_a_retrieval_failure() {
    let pipeline = Pipeline::standard(
        &config(""),
        services(
            Arc::new(DisabledProvider),
            oauth_index(),
            Arc::new(ScriptedGenerator::happy()),
        ),
    );
    let id = pipeline.start("Add OAuth2 login").await;
    let state = pipeline.run_to_completion(&id).await.unwrap();

    let error = state.error.unwrap();
    assert_eq!(error.kind, ErrorKind::RetrievalUnavailable);
    assert_eq!(error.step, "find_candidates");
    assert_eq!(state.normalized_requirement, "Add OAuth2 login");
}

#[tokio::test]
async fn blank_requirement_is_invalid_input() {
    let pipeline = Pipeline::standard(
        &config(""),
        services(
            Arc::new(UnitEmbedder),
            oauth_index(),
            Arc::new(ScriptedGenerator::happy()),
        ),
    );
    let id = pipeline.start("   ").await;
    let state = pipeline.run_to_completion(&id).await.unwrap();
    assert_eq!(state.status, RunStatus::Error);
    assert_eq!(state.error.unwrap().kind, ErrorKind::InvalidInput);
}

#[tokio::test]
async fn independent_runs_proceed_concurrently() {
    let generator = Arc::new(ScriptedGenerator::happy());
    let pipeline = Arc::new(Pipeline::standard(
        &config(""),
        services(Arc::new(UnitEmbedder), oauth_index(), generator),
    ));

    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(pipeline.start(format!("OAuth2 login variant {}", i)).await);
    }
    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run_to_completion(&id).await.unwrap() })
        })
        .collect();

    for handle in handles {
        let state = handle.await.unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.outputs.len(), 4);
    }
}

#[tokio::test]
async fn step_outputs_are_plain_json() {
    let generator = Arc::new(ScriptedGenerator::happy());
    let pipeline = Pipeline::standard(
        &config(""),
        services(Arc::new(UnitEmbedder), oauth_index(), generator),
    );
    let id = pipeline.start("Add OAuth2 login").await;
    let state = pipeline.run_to_completion(&id).await.unwrap();
    let json = serde_json::to_value(&state).unwrap();
    assert!(matches!(json["outputs"]["design_document"]["value"], Value::Object(_)));
    assert_eq!(json["events"][0]["to"], "requirement_processed");
}
