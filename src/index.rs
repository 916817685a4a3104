//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the only storage seam the retrieval engine
//! sees. [`InMemoryVectorIndex`] backs tests and small catalogs; the SQLite
//! implementation lives in [`crate::sqlite_index`].
//!
//! Indexes are treated as read-only while runs are being served; reindexing
//! is an out-of-band maintenance operation.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::ProjectMetadata;

/// One nearest-neighbour result.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub metadata: ProjectMetadata,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub similarity: f64,
}

/// Abstract vector store for historical project records.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`query`](VectorIndex::query) | Nearest neighbours of a vector, best first |
/// | [`upsert`](VectorIndex::upsert) | Insert or replace a project vector |
/// | [`get`](VectorIndex::get) | Metadata for one project |
/// | [`len`](VectorIndex::len) | Number of indexed projects |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexHit>>;

    async fn upsert(&self, id: &str, vector: &[f32], metadata: &ProjectMetadata) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<ProjectMetadata>>;

    async fn len(&self) -> Result<usize>;
}

struct StoredProject {
    vector: Vec<f32>,
    metadata: ProjectMetadata,
}

/// Brute-force in-memory index behind a `RwLock`.
pub struct InMemoryVectorIndex {
    projects: RwLock<HashMap<String, StoredProject>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_poisoned() -> anyhow::Error {
    anyhow::anyhow!("in-memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexHit>> {
        let projects = self.projects.read().map_err(|_| lock_poisoned())?;
        let mut hits: Vec<IndexHit> = projects
            .iter()
            .map(|(id, p)| IndexHit {
                id: id.clone(),
                metadata: p.metadata.clone(),
                similarity: cosine_similarity(vector, &p.vector) as f64,
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn upsert(&self, id: &str, vector: &[f32], metadata: &ProjectMetadata) -> Result<()> {
        let mut projects = self.projects.write().map_err(|_| lock_poisoned())?;
        projects.insert(
            id.to_string(),
            StoredProject {
                vector: vector.to_vec(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ProjectMetadata>> {
        let projects = self.projects.read().map_err(|_| lock_poisoned())?;
        Ok(projects.get(id).map(|p| p.metadata.clone()))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.projects.read().map_err(|_| lock_poisoned())?.len())
    }
}

/// Similarity descending, id ascending.
pub(crate) fn sort_hits(hits: &mut [IndexHit]) {
    hits.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> ProjectMetadata {
        ProjectMetadata {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn query_orders_by_similarity() {
        let index = InMemoryVectorIndex::new();
        index.upsert("a", &[1.0, 0.0], &meta("A")).await.unwrap();
        index.upsert("b", &[0.7, 0.7], &meta("B")).await.unwrap();
        index.upsert("c", &[0.0, 1.0], &meta("C")).await.unwrap();

        let hits = index.query(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "b");
    }

    #[tokio::test]
    async fn upsert_replaces_existing() {
        let index = InMemoryVectorIndex::new();
        index.upsert("a", &[1.0], &meta("old")).await.unwrap();
        index.upsert("a", &[1.0], &meta("new")).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        assert_eq!(index.get("a").await.unwrap().unwrap().name, "new");
    }
}
