//! Error taxonomy for the analysis core.
//!
//! Library-facing failures are typed with `thiserror`; application glue
//! (config loading, CLI, catalog ingestion) stays on `anyhow`.

use serde::Serialize;
use thiserror::Error;

use crate::repair::ParseError;

/// The embedding provider or vector index could not serve a query.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding provider unavailable: {0}")]
    Embedding(String),
    #[error("vector index unavailable: {0}")]
    Index(String),
}

/// Why a pipeline step failed. Every variant is terminal for its run.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("step exceeded its {0}s timeout")]
    Timeout(u64),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Internal(String),
}

/// Stable, serializable classification recorded on a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RetrievalUnavailable,
    ParseFailure,
    StepTimeout,
    GenerationFailed,
    InvalidInput,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RetrievalUnavailable => "retrieval_unavailable",
            ErrorKind::ParseFailure => "parse_failure",
            ErrorKind::StepTimeout => "step_timeout",
            ErrorKind::GenerationFailed => "generation_failed",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::Retrieval(_) => ErrorKind::RetrievalUnavailable,
            StepError::Parse(_) => ErrorKind::ParseFailure,
            StepError::Timeout(_) => ErrorKind::StepTimeout,
            StepError::Generation(_) => ErrorKind::GenerationFailed,
            StepError::InvalidInput(_) => ErrorKind::InvalidInput,
            StepError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Errors from the engine's own bookkeeping rather than from a step.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown run: {0}")]
    UnknownRun(String),
}

/// Cut `input` to at most `max_chars` characters, marking the cut.
pub fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_from_variants() {
        assert_eq!(
            StepError::Retrieval(RetrievalError::Index("down".into())).kind(),
            ErrorKind::RetrievalUnavailable
        );
        assert_eq!(StepError::Timeout(5).kind(), ErrorKind::StepTimeout);
        assert_eq!(ErrorKind::ParseFailure.as_str(), "parse_failure");
    }

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate_for_log("abc", 10), "abc");
    }

    #[test]
    fn truncate_marks_long_text() {
        let out = truncate_for_log("abcdefghij", 4);
        assert!(out.starts_with("abcd..."));
        assert!(out.contains("total_chars=10"));
    }
}
