pub mod embedding;
pub mod extraction;
pub mod persistence;
pub mod semantic_chunker;
pub mod simple_chunker;

pub use embedding::EmbeddingHandler;
pub use extraction::ExtractionHandler;
pub use persistence::PersistenceHandler;
pub use semantic_chunker::SemanticChunkerHandler;
pub use simple_chunker::SimpleChunkerHandler;
