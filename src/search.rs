//! Hybrid retrieval over historical projects.
//!
//! # Scoring Algorithm
//!
//! 1. Embed the query.
//! 2. Fetch `top_k × over_fetch` semantic neighbours from the [`VectorIndex`].
//! 3. Extract up to `max_query_terms` non-stopword query terms.
//! 4. `lexical = matched_terms / total_terms` against each neighbour's indexed text.
//! 5. `fused = semantic_weight × semantic + lexical_weight × lexical`.
//! 6. Drop candidates with `fused < min_score`.
//! 7. Sort by fused score (desc), then id (asc).
//! 8. Truncate to `top_k`.
//!
//! Semantic similarity is clamped to `[0.0, 1.0]` so that anti-correlated
//! vectors cannot push a candidate below what lexical overlap alone earns.

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::RetrievalError;
use crate::index::{IndexHit, VectorIndex};
use crate::lexical::{extract_keywords, lexical_score};
use crate::models::{CandidateRecord, ScoreBreakdown};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub top_k: usize,
    pub semantic_weight: f64,
    pub lexical_weight: f64,
    pub over_fetch: usize,
    pub min_score: f64,
    pub max_query_terms: usize,
}

impl From<&RetrievalConfig> for SearchParams {
    fn from(cfg: &RetrievalConfig) -> Self {
        Self {
            top_k: cfg.top_k,
            semantic_weight: cfg.semantic_weight,
            lexical_weight: cfg.lexical_weight,
            over_fetch: cfg.over_fetch,
            min_score: cfg.min_score,
            max_query_terms: cfg.max_query_terms,
        }
    }
}

impl Default for SearchParams {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

/// Weighted sum of the two signals.
pub fn fuse(semantic: f64, lexical: f64, semantic_weight: f64, lexical_weight: f64) -> f64 {
    semantic_weight * semantic + lexical_weight * lexical
}

/// Score, filter, sort and truncate semantic neighbours.
///
/// Pure; all I/O happens in [`HybridRetriever::search_with`].
pub fn rank(hits: Vec<IndexHit>, terms: &[String], params: &SearchParams) -> Vec<CandidateRecord> {
    let mut candidates: Vec<CandidateRecord> = hits
        .into_iter()
        .filter_map(|hit| {
            let semantic = hit.similarity.clamp(0.0, 1.0);
            let lexical = lexical_score(terms, &hit.metadata.lexical_text());
            let fused = fuse(semantic, lexical, params.semantic_weight, params.lexical_weight);
            if fused < params.min_score {
                return None;
            }
            Some(CandidateRecord {
                id: hit.id,
                name: hit.metadata.name,
                summary: hit.metadata.summary,
                documents: hit.metadata.documents,
                score: ScoreBreakdown {
                    semantic,
                    lexical,
                    fused,
                },
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .fused
            .total_cmp(&a.score.fused)
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates.truncate(params.top_k);
    candidates
}

/// Fuses vector-index neighbours with lexical overlap into one ranked list.
pub struct HybridRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    defaults: SearchParams,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        defaults: SearchParams,
    ) -> Self {
        Self {
            embedder,
            index,
            defaults,
        }
    }

    pub fn defaults(&self) -> &SearchParams {
        &self.defaults
    }

    /// Search with explicit `top_k` and weights; other knobs come from the defaults.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        semantic_weight: f64,
        lexical_weight: f64,
    ) -> Result<Vec<CandidateRecord>, RetrievalError> {
        let params = SearchParams {
            top_k,
            semantic_weight,
            lexical_weight,
            ..self.defaults.clone()
        };
        self.search_with(query, &params).await
    }

    pub async fn search_with(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<CandidateRecord>, RetrievalError> {
        if query.trim().is_empty() || params.top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let fetch_k = params.top_k.saturating_mul(params.over_fetch.max(1));
        let hits = self
            .index
            .query(&query_vec, fetch_k)
            .await
            .map_err(|e| RetrievalError::Index(e.to_string()))?;

        let terms = extract_keywords(query, params.max_query_terms);
        let neighbours = hits.len();
        let ranked = rank(hits, &terms, params);

        tracing::debug!(
            neighbours,
            terms = terms.len(),
            returned = ranked.len(),
            "hybrid search complete"
        );
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProjectMetadata;

    fn hit(id: &str, similarity: f64, text: &str) -> IndexHit {
        IndexHit {
            id: id.to_string(),
            metadata: ProjectMetadata {
                name: id.to_string(),
                text: text.to_string(),
                ..Default::default()
            },
            similarity,
        }
    }

    fn params(ws: f64, wl: f64) -> SearchParams {
        SearchParams {
            top_k: 10,
            semantic_weight: ws,
            lexical_weight: wl,
            over_fetch: 2,
            min_score: 0.0,
            max_query_terms: 20,
        }
    }

    #[test]
    fn fused_is_monotonic_in_each_component() {
        for step in 0..=10 {
            let ws = step as f64 / 10.0;
            let wl = 1.0 - ws;
            let mut prev = f64::NEG_INFINITY;
            for s in 0..=10 {
                let f = fuse(s as f64 / 10.0, 0.3, ws, wl);
                assert!(f >= prev);
                prev = f;
            }
            let mut prev = f64::NEG_INFINITY;
            for l in 0..=10 {
                let f = fuse(0.4, l as f64 / 10.0, ws, wl);
                assert!(f >= prev);
                prev = f;
            }
        }
    }

    #[test]
    fn ties_break_by_id() {
        let ranked = rank(
            vec![hit("b", 0.5, ""), hit("a", 0.5, "")],
            &[],
            &params(1.0, 0.0),
        );
        let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn below_threshold_dropped_without_error() {
        let mut p = params(0.5, 0.5);
        p.min_score = 0.3;
        let ranked = rank(vec![hit("a", 0.9, ""), hit("b", 0.2, "")], &[], &p);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, "a");
    }

    #[test]
    fn negative_similarity_clamped() {
        let ranked = rank(vec![hit("a", -0.8, "")], &[], &params(0.5, 0.5));
        assert_eq!(ranked[0].score.semantic, 0.0);
    }

    #[test]
    fn lexical_rescue_lifts_exact_match() {
        let terms = vec!["sap".to_string(), "invoice".to_string()];
        let mut p = params(0.5, 0.5);
        p.top_k = 1;
        let ranked = rank(
            vec![
                hit("generic", 0.7, "billing overhaul"),
                hit("exact", 0.45, "SAP invoice connector"),
            ],
            &terms,
            &p,
        );
        assert_eq!(ranked[0].id, "exact");
    }
}
