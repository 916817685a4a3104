//! SQLite-backed [`VectorIndex`] implementation.
//!
//! Vectors are stored as little-endian f32 BLOBs in the `projects` table and
//! searched by brute-force cosine similarity, which is adequate for catalogs
//! of a few thousand historical projects.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::index::{sort_hits, IndexHit, VectorIndex};
use crate::models::{DocumentHandles, ProjectMetadata};

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_metadata(row: &sqlx::sqlite::SqliteRow) -> Result<ProjectMetadata> {
    let documents_json: String = row.get("documents_json");
    let documents: DocumentHandles = serde_json::from_str(&documents_json)
        .with_context(|| "corrupt documents_json in projects table")?;
    Ok(ProjectMetadata {
        name: row.get("name"),
        summary: row.get("summary"),
        text: row.get("body"),
        documents,
        content_hash: row.get("content_hash"),
    })
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexHit>> {
        let rows = sqlx::query(
            "SELECT id, name, summary, body, documents_json, content_hash, embedding FROM projects",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let stored = blob_to_vec(&blob);
            hits.push(IndexHit {
                id: row.get("id"),
                metadata: row_metadata(row)?,
                similarity: cosine_similarity(vector, &stored) as f64,
            });
        }

        sort_hits(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn upsert(&self, id: &str, vector: &[f32], metadata: &ProjectMetadata) -> Result<()> {
        let documents_json = serde_json::to_string(&metadata.documents)?;
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, summary, body, documents_json, content_hash, embedding, dims, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                summary = excluded.summary,
                body = excluded.body,
                documents_json = excluded.documents_json,
                content_hash = excluded.content_hash,
                embedding = excluded.embedding,
                dims = excluded.dims,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(&metadata.name)
        .bind(&metadata.summary)
        .bind(&metadata.text)
        .bind(documents_json)
        .bind(&metadata.content_hash)
        .bind(vec_to_blob(vector))
        .bind(vector.len() as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ProjectMetadata>> {
        let row = sqlx::query(
            "SELECT name, summary, body, documents_json, content_hash FROM projects WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_metadata).transpose()
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
