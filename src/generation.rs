//! Text generation backends for the artifact-producing pipeline steps.
//!
//! The pipeline only sees the [`Generator`] trait. [`HttpGenerator`] speaks
//! the OpenAI-compatible `POST /chat/completions` API (OpenAI itself, or any
//! local server exposing the same surface); [`DisabledGenerator`] fails every
//! call so that retrieval can be exercised without a model configured.
//!
//! Prompts and API keys never appear in returned errors: failures carry only
//! the HTTP status and a truncated response body.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::truncate_for_log;
use crate::models::ArtifactKind;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const ERROR_BODY_CHARS: usize = 300;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a senior software architect analysing a new \
requirement against similar historical projects. Answer with a single JSON object and nothing \
else. Ground your answer in the provided project context where it applies.";

/// Everything a backend needs to produce one artifact.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub step: ArtifactKind,
    pub requirement: String,
    /// Projected document context plus prior step outputs.
    pub context: Value,
}

/// Produces raw (possibly malformed) JSON text for a generation step.
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Always fails; used when `generation.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

/// Output contract appended to the user message for each step.
pub fn step_instruction(step: ArtifactKind) -> &'static str {
    match step {
        ArtifactKind::ImpactedModules => {
            r#"List the modules this requirement impacts. Respond as {"modules": [{"name": string, "change": "new" | "modify" | "remove", "rationale": string, "similar_projects": [string]}]}."#
        }
        ArtifactKind::EffortEstimate => {
            r#"Estimate the effort per module and task in person-days. Respond as {"items": [{"module": string, "task": string, "role": string, "days": number}], "total_days": number, "assumptions": [string]}."#
        }
        ArtifactKind::DesignDocument => {
            r#"Draft a technical design. Respond as {"title": string, "sections": [{"heading": string, "content": string}], "risks": [{"title": string, "mitigation": string}]}."#
        }
        ArtifactKind::Backlog => {
            r#"Break the work into backlog items. Respond as {"items": [{"title": string, "description": string, "kind": "epic" | "story" | "task", "priority": string, "points": number, "module": string}]}."#
        }
    }
}

/// Render the user message for a request.
pub fn render_prompt(request: &GenerationRequest) -> String {
    let context = serde_json::to_string_pretty(&request.context).unwrap_or_default();
    format!(
        "## Requirement\n{}\n\n## Context\n{}\n\n## Task\n{}",
        request.requirement,
        context,
        step_instruction(request.step)
    )
}

/// OpenAI-compatible chat completion client.
///
/// Reads `OPENAI_API_KEY` from the environment when present; local
/// compatible servers usually need no key.
pub struct HttpGenerator {
    model: String,
    endpoint: String,
    api_key: Option<String>,
    temperature: f32,
    system_prompt: String,
    client: reqwest::Client,
}

impl HttpGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let base = config
            .url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            endpoint: format!("{}/chat/completions", base),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            temperature: config.temperature,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            client,
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": render_prompt(request)},
            ],
        });

        let mut call = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        let response = call
            .send()
            .await
            .with_context(|| format!("chat completion request for {} failed", request.step))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!(
                "chat completion API error {}: {}",
                status,
                truncate_for_log(&text, ERROR_BODY_CHARS)
            );
        }

        let json: Value = response.json().await?;
        parse_chat_response(&json)
    }
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat completion response: missing choices[0].message.content"))
}

/// | Config Value | Generator |
/// |-------------|-----------|
/// | `"disabled"` | [`DisabledGenerator`] |
/// | `"openai"` | [`HttpGenerator`] |
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "openai" => Ok(Box::new(HttpGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_response_content_extracted() {
        let json = json!({"choices": [{"message": {"role": "assistant", "content": "{\"ok\":true}"}}]});
        assert_eq!(parse_chat_response(&json).unwrap(), "{\"ok\":true}");
    }

    #[test]
    fn chat_response_missing_content_errors() {
        assert!(parse_chat_response(&json!({"choices": []})).is_err());
    }

    #[test]
    fn prompt_contains_requirement_context_and_contract() {
        let request = GenerationRequest {
            step: ArtifactKind::Backlog,
            requirement: "Add SSO".into(),
            context: json!({"similar_projects": []}),
        };
        let prompt = render_prompt(&request);
        assert!(prompt.contains("Add SSO"));
        assert!(prompt.contains("similar_projects"));
        assert!(prompt.contains("\"items\""));
    }

    #[test]
    fn unknown_provider_rejected() {
        let config = GenerationConfig {
            provider: "bogus".into(),
            ..Default::default()
        };
        assert!(create_generator(&config).is_err());
    }

    #[tokio::test]
    async fn disabled_generator_errors() {
        let request = GenerationRequest {
            step: ArtifactKind::ImpactedModules,
            requirement: String::new(),
            context: Value::Null,
        };
        assert!(DisabledGenerator.generate(&request).await.is_err());
    }
}
