//! Historical project catalog ingestion.
//!
//! A catalog is a JSON file listing past projects:
//!
//! ```json
//! [
//!   {
//!     "id": "payments-sso",
//!     "name": "Payments SSO",
//!     "summary": "Single sign-on for the payments portal",
//!     "text": "oauth2 saml login session",
//!     "documents": {"design": "payments-sso/design.docx", "estimate": "payments-sso/estimate.xlsx"}
//!   }
//! ]
//! ```
//!
//! `{"projects": [...]}` is accepted as well. Each entry is embedded and
//! upserted into the vector index. Entries whose content hash (content plus
//! embedding model) matches what is already indexed are skipped unless a
//! full reindex is requested.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::index::VectorIndex;
use crate::models::ProjectMetadata;
use crate::sqlite_index::SqliteVectorIndex;

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    #[serde(flatten)]
    pub metadata: ProjectMetadata,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    List(Vec<CatalogEntry>),
    Wrapped { projects: Vec<CatalogEntry> },
}

/// Parse and validate catalog JSON.
pub fn parse_catalog(content: &str) -> Result<Vec<CatalogEntry>> {
    let entries = match serde_json::from_str::<CatalogFile>(content)
        .with_context(|| "Failed to parse catalog JSON")?
    {
        CatalogFile::List(entries) => entries,
        CatalogFile::Wrapped { projects } => projects,
    };

    let mut seen = HashSet::new();
    for entry in &entries {
        if entry.id.trim().is_empty() {
            bail!("catalog entry '{}' has an empty id", entry.metadata.name);
        }
        if entry.metadata.name.trim().is_empty() {
            bail!("catalog entry {} has an empty name", entry.id);
        }
        if !seen.insert(entry.id.as_str()) {
            bail!("duplicate catalog id: {}", entry.id);
        }
    }
    Ok(entries)
}

pub fn load_catalog(path: &Path) -> Result<Vec<CatalogEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog: {}", path.display()))?;
    parse_catalog(&content)
}

/// SHA-256 over everything that influences a project's vector or lexical text.
pub fn content_hash(model: &str, metadata: &ProjectMetadata) -> String {
    let documents = serde_json::to_string(&metadata.documents).unwrap_or_default();
    let mut hasher = Sha256::new();
    for part in [
        model,
        metadata.name.as_str(),
        metadata.summary.as_str(),
        metadata.text.as_str(),
        documents.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub total: usize,
    pub indexed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Embed and upsert catalog entries in batches of `batch_size`.
///
/// A failed embedding batch is counted and skipped; index write failures
/// abort the run.
pub async fn index_catalog(
    entries: Vec<CatalogEntry>,
    provider: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
    batch_size: usize,
    full: bool,
) -> Result<IndexReport> {
    let mut report = IndexReport {
        total: entries.len(),
        ..Default::default()
    };

    let mut pending = Vec::new();
    for mut entry in entries {
        entry.metadata.content_hash = content_hash(provider.model_name(), &entry.metadata);
        if !full {
            if let Some(existing) = index.get(&entry.id).await? {
                if existing.content_hash == entry.metadata.content_hash {
                    report.unchanged += 1;
                    continue;
                }
            }
        }
        pending.push(entry);
    }

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|e| e.metadata.embedding_text()).collect();
        let vectors = match provider.embed_batch(&texts).await {
            Ok(v) if v.len() == batch.len() => v,
            Ok(v) => {
                tracing::warn!(expected = batch.len(), got = v.len(), "embedding batch size mismatch");
                report.failed += batch.len();
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, size = batch.len(), "embedding batch failed");
                report.failed += batch.len();
                continue;
            }
        };

        for (entry, vector) in batch.iter().zip(vectors.iter()) {
            if provider.dims() > 0 && vector.len() != provider.dims() {
                tracing::warn!(id = %entry.id, got = vector.len(), expected = provider.dims(), "embedding has wrong dimensionality");
                report.failed += 1;
                continue;
            }
            index
                .upsert(&entry.id, vector, &entry.metadata)
                .await
                .with_context(|| format!("Failed to index project {}", entry.id))?;
            report.indexed += 1;
        }
    }

    tracing::info!(
        total = report.total,
        indexed = report.indexed,
        unchanged = report.unchanged,
        failed = report.failed,
        "catalog indexed"
    );
    Ok(report)
}

/// `rqh index`: load a catalog file and index it into the SQLite store.
pub async fn run_index(config: &Config, path: &Path, full: bool) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    let entries = load_catalog(path)?;
    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let index = SqliteVectorIndex::new(pool.clone());

    let report = index_catalog(
        entries,
        provider.as_ref(),
        &index,
        config.embedding.batch_size,
        full,
    )
    .await?;

    println!("index {}", path.display());
    println!("  projects: {}", report.total);
    println!("  indexed: {}", report.indexed);
    println!("  unchanged: {}", report.unchanged);
    println!("  failed: {}", report.failed);

    pool.close().await;
    Ok(())
}
