pub mod handler;
pub mod handlers;
pub mod orchestrator;

use std::sync::Arc;

use common::embedding::EmbeddingModel;
use common::extractor::ExtractorClient;
use common::storage::VectorStore;
use common::utils::config::{ChunkerConfig, OrchestratorConfig};

pub use handler::{Outcome, StepHandler};
pub use orchestrator::Orchestrator;

/// Step names, in execution order, that a default ingestion run wires up (§4.3).
pub const DEFAULT_STEPS: &[&str] = &["text-extraction", "text-chunking", "generate-embeddings", "save-records"];

pub enum ChunkingStrategy {
    Simple,
    Semantic,
}

/// Builds an orchestrator with the four default ingestion handlers registered.
pub fn build_default_orchestrator(
    orchestrator_config: OrchestratorConfig,
    chunker_config: ChunkerConfig,
    strategy: ChunkingStrategy,
    extractor: Arc<dyn ExtractorClient>,
    embedding_model: Arc<dyn EmbeddingModel>,
    vector_store: Arc<dyn VectorStore>,
) -> Orchestrator {
    let mut orchestrator = Orchestrator::new(orchestrator_config);

    orchestrator.register(Arc::new(handlers::ExtractionHandler::new(extractor)));

    match strategy {
        ChunkingStrategy::Simple => {
            orchestrator.register(Arc::new(handlers::SimpleChunkerHandler::new(chunker_config)));
        }
        ChunkingStrategy::Semantic => {
            orchestrator.register(Arc::new(handlers::SemanticChunkerHandler::new(chunker_config)));
        }
    }

    orchestrator.register(Arc::new(handlers::EmbeddingHandler::new(embedding_model)));
    orchestrator.register(Arc::new(handlers::PersistenceHandler::new(vector_store)));

    orchestrator
}
