//! Core data models shared by retrieval, document assembly and the pipeline.

use serde::{Deserialize, Serialize};

/// Paths (relative to the document root) of a project's source artifacts.
///
/// Any handle may be absent; the assembler treats an absent handle as an
/// empty document rather than a failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentHandles {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backlog: Option<String>,
}

/// Metadata stored alongside each project vector in the index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: String,
    #[serde(default)]
    pub summary: String,
    /// Free text indexed for lexical matching (tags, module names, notes).
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub documents: DocumentHandles,
    /// SHA-256 of the indexed content and embedding model; empty if unknown.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_hash: String,
}

impl ProjectMetadata {
    /// Text the lexical scorer matches query terms against.
    pub fn lexical_text(&self) -> String {
        let mut out = String::with_capacity(self.name.len() + self.summary.len() + self.text.len() + 2);
        out.push_str(&self.name);
        out.push('\n');
        out.push_str(&self.summary);
        out.push('\n');
        out.push_str(&self.text);
        out
    }

    /// Text sent to the embedding provider when indexing.
    pub fn embedding_text(&self) -> String {
        if self.summary.is_empty() {
            self.name.clone()
        } else {
            format!("{}\n{}", self.name, self.summary)
        }
    }
}

/// Per-signal scores behind a candidate's rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Cosine similarity, clamped to `[0.0, 1.0]`.
    pub semantic: f64,
    /// Fraction of query terms found in the candidate's indexed text.
    pub lexical: f64,
    pub fused: f64,
}

/// A historical project retrieved as potentially similar to a requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: String,
    pub name: String,
    pub summary: String,
    pub documents: DocumentHandles,
    pub score: ScoreBreakdown,
}

/// The four artifacts the analysis pipeline generates, in generation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    ImpactedModules,
    EffortEstimate,
    DesignDocument,
    Backlog,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::ImpactedModules,
        ArtifactKind::EffortEstimate,
        ArtifactKind::DesignDocument,
        ArtifactKind::Backlog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::ImpactedModules => "impacted_modules",
            ArtifactKind::EffortEstimate => "effort_estimate",
            ArtifactKind::DesignDocument => "design_document",
            ArtifactKind::Backlog => "backlog",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
