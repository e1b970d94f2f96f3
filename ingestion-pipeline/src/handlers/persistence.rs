//! Writes partition records (text + vector + metadata) to a vector collection (§4.8).

use std::sync::Arc;

use async_trait::async_trait;
use common::error::AppError;
use common::pipeline_state::{ArtifactKind, PipelineState};
use common::storage::{MemoryRecord, VectorStore};
use tokio_util::sync::CancellationToken;

use crate::handler::{Outcome, StepHandler};

pub struct PersistenceHandler {
    store: Arc<dyn VectorStore>,
}

impl PersistenceHandler {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StepHandler for PersistenceHandler {
    fn step_name(&self) -> &'static str {
        "save-records"
    }

    async fn invoke(
        &self,
        mut state: PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<(Outcome, PipelineState), AppError> {
        let partitions: Vec<_> = state
            .artifacts_of_kind(ArtifactKind::TextPartition)
            .filter(|artifact| artifact.has_derived_file("embedding.vec"))
            .map(|artifact| {
                (
                    artifact.id.clone(),
                    artifact.name.clone(),
                    artifact.partition_number,
                    artifact.section_number,
                )
            })
            .collect();

        if partitions.is_empty() {
            state.log(self.step_name(), "no embedded partitions to persist");
            return Ok((Outcome::Success, state));
        }

        let dimension = partitions
            .iter()
            .find_map(|(id, ..)| state.context.embeddings.get(id).map(Vec::len));

        let Some(dimension) = dimension else {
            state.log(self.step_name(), "no embedding vectors available");
            return Ok((Outcome::TransientError, state));
        };

        if let Err(err) = self.store.ensure_collection(&state.index, dimension).await {
            state.log(self.step_name(), format!("failed to ensure collection: {err}"));
            return Ok((Outcome::TransientError, state));
        }

        let index = if state.index.trim().is_empty() {
            "memory".to_string()
        } else {
            state.index.clone()
        };

        let mut records = Vec::with_capacity(partitions.len());
        for (id, name, partition_number, section_number) in &partitions {
            let Some(embedding) = state.context.embeddings.get(id).cloned() else {
                continue;
            };
            let text = state.context.chunk_text.get(id).cloned().unwrap_or_default();

            records.push(MemoryRecord {
                id: id.clone(),
                document_id: state.document_id.clone(),
                execution_id: state.execution_id.clone(),
                index: index.clone(),
                file_name: name.clone(),
                text,
                artifact_kind: "TextPartition".to_string(),
                partition_number: *partition_number,
                section_number: *section_number,
                tags: state.tags.clone(),
                created_at: chrono::Utc::now(),
                embedding,
            });
        }

        let record_count = records.len();
        if let Err(err) = self.store.upsert_batch(&index, records).await {
            state.log(self.step_name(), format!("failed to upsert records: {err}"));
            return Ok((Outcome::TransientError, state));
        }

        state.log(self.step_name(), format!("persisted {record_count} record(s) to '{index}'"));
        Ok((Outcome::Success, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::pipeline_state::{DerivedFile, FileDetails, UploadedFile};
    use common::storage::SearchFilter;

    struct FakeStore {
        upserted: tokio::sync::Mutex<Vec<MemoryRecord>>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                upserted: tokio::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VectorStore for FakeStore {
        async fn ensure_collection(&self, _collection: &str, _dimension: usize) -> Result<(), AppError> {
            Ok(())
        }

        async fn upsert_batch(&self, _collection: &str, records: Vec<MemoryRecord>) -> Result<(), AppError> {
            self.upserted.lock().await.extend(records);
            Ok(())
        }

        async fn vector_search(
            &self,
            _collection: &str,
            _query_embedding: &[f32],
            _top_k: usize,
            _filters: &[SearchFilter],
        ) -> Result<Vec<(MemoryRecord, f32)>, AppError> {
            Ok(Vec::new())
        }

        async fn list_collections(&self) -> Result<Vec<String>, AppError> {
            Ok(Vec::new())
        }
    }

    fn state_with_embedded_partition() -> PipelineState {
        let mut state = PipelineState::new("default", Vec::<UploadedFile>::new());
        let mut artifact = FileDetails::new("doc.chunk000.txt", 5, "text/plain", ArtifactKind::TextPartition, 0, 0);
        artifact.attach_derived_file(
            "embedding.vec",
            DerivedFile {
                parent_artifact_id: artifact.id.clone(),
                source_partition_id: Some(artifact.id.clone()),
                content_sha256: "abc".to_string(),
            },
        );
        state.context.chunk_text.insert(artifact.id.clone(), "hello".to_string());
        state.context.embeddings.insert(artifact.id.clone(), vec![0.1, 0.2, 0.3]);
        state.files.push(artifact);
        state
    }

    #[tokio::test]
    async fn persists_one_record_per_embedded_partition() {
        let store = Arc::new(FakeStore::new());
        let handler = PersistenceHandler::new(store.clone());
        let state = state_with_embedded_partition();

        let (outcome, _state) = handler.invoke(state, &CancellationToken::new()).await.expect("invoke");

        assert_eq!(outcome, Outcome::Success);
        assert_eq!(store.upserted.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_index_falls_back_to_memory_collection() {
        let store = Arc::new(FakeStore::new());
        let handler = PersistenceHandler::new(store.clone());
        let mut state = state_with_embedded_partition();
        state.index = String::new();

        handler.invoke(state, &CancellationToken::new()).await.expect("invoke");

        let records = store.upserted.lock().await;
        assert_eq!(records[0].index, "memory");
    }

    #[tokio::test]
    async fn no_embedded_partitions_is_a_no_op_success() {
        let store = Arc::new(FakeStore::new());
        let handler = PersistenceHandler::new(store.clone());
        let state = PipelineState::new("default", Vec::<UploadedFile>::new());

        let (outcome, _state) = handler.invoke(state, &CancellationToken::new()).await.expect("invoke");

        assert_eq!(outcome, Outcome::Success);
        assert!(store.upserted.lock().await.is_empty());
    }
}
