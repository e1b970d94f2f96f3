//! Embedding generation (§4.7, §6.2).

use async_openai::config::OpenAIConfig;
use async_openai::types::CreateEmbeddingRequestArgs;
use async_openai::Client;
use async_trait::async_trait;
use tracing::debug;

use crate::error::AppError;

/// Converts text into a fixed-dimension vector. Implementations are expected
/// to return vectors of a stable dimension for a given instance, since the
/// persistence handler uses the first vector's length to size the vector
/// index (§4.8 step 1).
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError>;

    /// Embeds a batch sequentially. Implementations with a native batch API
    /// should override this for fewer round trips.
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            results.push(self.embed(input).await?);
        }
        Ok(results)
    }
}

pub struct OpenAiEmbeddingModel {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbeddingModel {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbeddingModel {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input([input])
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("no embedding data received from API".into()))?
            .embedding;

        debug!(dimensions = embedding.len(), model = %self.model, "generated embedding");
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEmbeddingModel {
        vector: Vec<f32>,
    }

    #[async_trait]
    impl EmbeddingModel for FixedEmbeddingModel {
        async fn embed(&self, _input: &str) -> Result<Vec<f32>, AppError> {
            Ok(self.vector.clone())
        }
    }

    #[tokio::test]
    async fn default_embed_batch_preserves_order() {
        let model = FixedEmbeddingModel {
            vector: vec![0.1, 0.2],
        };
        let inputs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let results = model.embed_batch(&inputs).await.expect("embed batch");
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|vector| vector == &vec![0.1, 0.2]));
    }
}
