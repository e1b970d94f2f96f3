//! The surface a host (CLI, or any other caller) drives the system through (§6.6).

use std::pin::Pin;
use std::sync::Arc;

use common::error::AppError;
use common::pipeline_state::{PipelineState, UploadedFile};
use common::storage::{SearchFilter, VectorStore};
use futures::Stream;
use ingestion_pipeline::{DEFAULT_STEPS, Orchestrator};
use tokio_util::sync::CancellationToken;

use crate::ask::{AskEngine, Answer};
use crate::search::SearchEngine;

pub struct RetrievalService {
    orchestrator: Arc<Orchestrator>,
    search: Arc<SearchEngine>,
    ask: Arc<AskEngine>,
    store: Arc<dyn VectorStore>,
}

impl RetrievalService {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        search: Arc<SearchEngine>,
        ask: Arc<AskEngine>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            orchestrator,
            search,
            ask,
            store,
        }
    }

    /// Runs the ingestion pipeline to completion and returns the new document id.
    pub async fn ingest(&self, index: &str, upload: UploadedFile) -> Result<String, AppError> {
        let mut state = PipelineState::new(index, vec![upload]);
        for step in DEFAULT_STEPS {
            state.then(*step);
        }

        let cancel = CancellationToken::new();
        let finished = self.orchestrator.run(state, &cancel).await?;
        Ok(finished.document_id)
    }

    pub async fn search(
        &self,
        index: &str,
        query: &str,
        filters: &[SearchFilter],
        min_relevance: Option<f32>,
        limit: usize,
    ) -> Result<crate::search::SearchResults, AppError> {
        self.search.search(index, query, filters, min_relevance, limit).await
    }

    pub async fn ask(
        &self,
        index: &str,
        question: &str,
        filters: &[SearchFilter],
        min_relevance: Option<f32>,
    ) -> Result<Answer, AppError> {
        self.ask.ask(index, question, filters, min_relevance).await
    }

    pub async fn ask_stream(
        &self,
        index: &str,
        question: &str,
        filters: &[SearchFilter],
        min_relevance: Option<f32>,
    ) -> Result<Pin<Box<dyn Stream<Item = Answer> + Send>>, AppError> {
        self.ask.ask_stream(index, question, filters, min_relevance).await
    }

    pub async fn list_indexes(&self) -> Result<Vec<String>, AppError> {
        self.store.list_collections().await
    }
}
