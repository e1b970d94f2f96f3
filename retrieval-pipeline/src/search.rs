//! Search engine: embeds a query, runs a vector search, optionally reranks (§4.9).

use std::sync::Arc;

use common::embedding::EmbeddingModel;
use common::error::AppError;
use common::storage::{Citation, SearchFilter, VectorStore};
use common::utils::config::SearchConfig;
use tracing::instrument;

use crate::reranking::RerankerPool;

#[derive(Clone, Debug, Default)]
pub struct SearchResults {
    pub query: String,
    pub results: Vec<Citation>,
}

pub struct SearchEngine {
    embedding_model: Arc<dyn EmbeddingModel>,
    store: Arc<dyn VectorStore>,
    reranker: Option<Arc<RerankerPool>>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(
        embedding_model: Arc<dyn EmbeddingModel>,
        store: Arc<dyn VectorStore>,
        reranker: Option<Arc<RerankerPool>>,
        config: SearchConfig,
    ) -> Self {
        Self {
            embedding_model,
            store,
            reranker,
            config,
        }
    }

    #[instrument(skip_all, fields(index, query))]
    pub async fn search(
        &self,
        index: &str,
        query: &str,
        filters: &[SearchFilter],
        min_relevance: Option<f32>,
        limit: usize,
    ) -> Result<SearchResults, AppError> {
        if index.trim().is_empty() || query.trim().is_empty() {
            return Err(AppError::Validation("index and query must not be empty".to_string()));
        }

        match self.search_inner(index, query, filters, min_relevance, limit).await {
            Ok(results) => Ok(results),
            Err(_) => Ok(SearchResults {
                query: query.to_string(),
                results: Vec::new(),
            }),
        }
    }

    async fn search_inner(
        &self,
        index: &str,
        query: &str,
        filters: &[SearchFilter],
        min_relevance: Option<f32>,
        limit: usize,
    ) -> Result<SearchResults, AppError> {
        let embedding = self.embedding_model.embed(query).await?;
        if embedding.is_empty() {
            return Ok(SearchResults {
                query: query.to_string(),
                results: Vec::new(),
            });
        }

        self.store.ensure_collection(index, embedding.len()).await?;

        let top = if limit > 0 { limit } else { self.config.max_matches_count };
        let matches = self.store.vector_search(index, &embedding, top, filters).await?;

        let reranked = self.apply_reranker(query, matches).await?;

        let results = reranked
            .into_iter()
            .filter(|(_, score, was_reranked)| *was_reranked || min_relevance.map(|min| *score >= min).unwrap_or(true))
            .map(|(record, score, _)| Citation {
                id: record.id,
                content: record.text,
                source: if record.file_name.trim().is_empty() {
                    record.document_id
                } else {
                    record.file_name
                },
                relevance_score: score,
            })
            .collect();

        Ok(SearchResults {
            query: query.to_string(),
            results,
        })
    }

    /// Returns `(record, score, was_reranked)` triples; `was_reranked` gates whether
    /// `minRelevance` still applies (§4.9 step 8 skips the filter when a reranker ran).
    async fn apply_reranker(
        &self,
        query: &str,
        matches: Vec<(common::storage::MemoryRecord, f32)>,
    ) -> Result<Vec<(common::storage::MemoryRecord, f32, bool)>, AppError> {
        let Some(pool) = &self.reranker else {
            return Ok(matches.into_iter().map(|(record, score)| (record, score, false)).collect());
        };

        if matches.is_empty() {
            return Ok(Vec::new());
        }

        let documents: Vec<String> = matches.iter().map(|(record, _)| record.text.clone()).collect();
        let lease = pool.checkout().await;
        let ranked = lease.rerank(query, documents).await?;

        let mut by_index: Vec<(common::storage::MemoryRecord, f32, bool)> = Vec::with_capacity(ranked.len());
        for rank in ranked {
            if let Some((record, _)) = matches.get(rank.index).cloned() {
                by_index.push((record, rank.score, true));
            }
        }
        by_index.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(by_index)
    }
}
