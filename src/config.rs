//! TOML configuration.
//!
//! Every section except `[db]` is optional; missing keys fall back to the
//! `default_*` functions below. [`load_config`] parses and validates a file,
//! [`Config::from_toml_str`] does the same for an in-memory string.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Multiplier applied to `top_k` when fetching semantic neighbours.
    #[serde(default = "default_over_fetch")]
    pub over_fetch: usize,
    /// Candidates whose fused score falls below this are dropped.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_max_query_terms")]
    pub max_query_terms: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            lexical_weight: default_lexical_weight(),
            top_k: default_top_k(),
            over_fetch: default_over_fetch(),
            min_score: default_min_score(),
            max_query_terms: default_max_query_terms(),
        }
    }
}

fn default_semantic_weight() -> f64 {
    0.6
}
fn default_lexical_weight() -> f64 {
    0.4
}
fn default_top_k() -> usize {
    10
}
fn default_over_fetch() -> usize {
    2
}
fn default_min_score() -> f64 {
    0.1
}
fn default_max_query_terms() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    /// Directory that document handles are resolved against.
    #[serde(default = "default_documents_root")]
    pub root: PathBuf,
    /// How many top-ranked candidates get their documents assembled.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-section character cap applied when projecting step context.
    #[serde(default = "default_max_section_chars")]
    pub max_section_chars: usize,
    /// Per-table row cap applied when projecting step context.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
            top_n: default_top_n(),
            max_concurrency: default_max_concurrency(),
            max_section_chars: default_max_section_chars(),
            max_rows: default_max_rows(),
        }
    }
}

fn default_documents_root() -> PathBuf {
    PathBuf::from("./projects")
}
fn default_top_n() -> usize {
    3
}
fn default_max_concurrency() -> usize {
    3
}
fn default_max_section_chars() -> usize {
    4_000
}
fn default_max_rows() -> usize {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Optional override for the system instruction sent with every step.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_generation_timeout_secs(),
            temperature: default_temperature(),
            system_prompt: None,
        }
    }
}

fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_temperature() -> f32 {
    0.2
}

/// What the pipeline does when retrieval finds no historical precedent.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmptyCandidatePolicy {
    /// Finish the run immediately with empty results.
    #[default]
    Complete,
    /// Keep going and let generation steps work without historical context.
    Continue,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    #[serde(default)]
    pub on_empty_candidates: EmptyCandidatePolicy,
    #[serde(default = "default_max_error_chars")]
    pub max_error_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout_secs(),
            on_empty_candidates: EmptyCandidatePolicy::default(),
            max_error_chars: default_max_error_chars(),
        }
    }
}

fn default_step_timeout_secs() -> u64 {
    180
}
fn default_max_error_chars() -> usize {
    500
}

impl Config {
    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).with_context(|| "Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if r.top_k < 1 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }
        if r.over_fetch < 1 {
            anyhow::bail!("retrieval.over_fetch must be >= 1");
        }
        for (name, w) in [
            ("semantic_weight", r.semantic_weight),
            ("lexical_weight", r.lexical_weight),
        ] {
            if !(0.0..=1.0).contains(&w) {
                anyhow::bail!("retrieval.{} must be in [0.0, 1.0]", name);
            }
        }
        if (r.semantic_weight + r.lexical_weight - 1.0).abs() > 1e-6 {
            anyhow::bail!(
                "retrieval.semantic_weight + retrieval.lexical_weight must equal 1.0 (got {})",
                r.semantic_weight + r.lexical_weight
            );
        }
        if !(0.0..=1.0).contains(&r.min_score) {
            anyhow::bail!("retrieval.min_score must be in [0.0, 1.0]");
        }

        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() && self.embedding.provider != "local" {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }
        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" | "local" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                other
            ),
        }

        match self.generation.provider.as_str() {
            "disabled" => {}
            "openai" => {
                if self.generation.model.is_none() {
                    anyhow::bail!("generation.model must be specified when provider is 'openai'");
                }
            }
            other => anyhow::bail!(
                "Unknown generation provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        if self.documents.top_n < 1 {
            anyhow::bail!("documents.top_n must be >= 1");
        }
        if self.documents.max_concurrency < 1 {
            anyhow::bail!("documents.max_concurrency must be >= 1");
        }
        if self.pipeline.step_timeout_secs == 0 {
            anyhow::bail!("pipeline.step_timeout_secs must be > 0");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = Config::from_toml_str("[db]\npath = \"./data/rqh.sqlite\"\n").unwrap();
        assert_eq!(cfg.retrieval.top_k, 10);
        assert_eq!(cfg.retrieval.over_fetch, 2);
        assert_eq!(cfg.retrieval.max_query_terms, 20);
        assert_eq!(cfg.documents.top_n, 3);
        assert_eq!(
            cfg.pipeline.on_empty_candidates,
            EmptyCandidatePolicy::Complete
        );
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let err = Config::from_toml_str(
            "[db]\npath = \"x\"\n[retrieval]\nsemantic_weight = 0.7\nlexical_weight = 0.7\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("must equal 1.0"));
    }

    #[test]
    fn empty_candidate_policy_parses_snake_case() {
        let cfg = Config::from_toml_str(
            "[db]\npath = \"x\"\n[pipeline]\non_empty_candidates = \"continue\"\n",
        )
        .unwrap();
        assert_eq!(
            cfg.pipeline.on_empty_candidates,
            EmptyCandidatePolicy::Continue
        );
    }

    #[test]
    fn unknown_embedding_provider_rejected() {
        let err = Config::from_toml_str("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn enabled_embedding_requires_dims() {
        let err = Config::from_toml_str(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }
}
