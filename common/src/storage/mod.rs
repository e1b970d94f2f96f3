pub mod db;
pub mod vector_store;

pub use vector_store::{Citation, MemoryRecord, SearchFilter, SurrealVectorStore, VectorStore};
