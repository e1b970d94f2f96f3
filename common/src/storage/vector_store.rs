//! Collection-oriented vector store abstraction (§6.5) with a SurrealDB-backed
//! default implementation grounded in the persistence/search schema of §4.8-4.9.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::storage::db::{SurrealDbClient, FTS_ANALYZER_NAME};

/// A persisted partition row (§3 `MemoryRecord`). The id equals the producing
/// artifact's id, which is what makes repeated upserts idempotent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub id: String,
    pub document_id: String,
    pub execution_id: String,
    pub index: String,
    pub file_name: String,
    pub text: String,
    pub artifact_kind: String,
    pub partition_number: u32,
    pub section_number: u32,
    pub tags: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub embedding: Vec<f32>,
}

/// A single `equals` predicate after field-name aliasing (§4.9 step 5).
#[derive(Clone, Debug)]
pub struct SearchFilter {
    pub field: String,
    pub value: Value,
}

impl SearchFilter {
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }

    /// Resolves the caller-facing alias (`documentId`) to the stored column name
    /// (`document_id`). Unknown names pass through verbatim.
    fn resolve_field_name(name: &str) -> String {
        match name {
            "documentId" | "DocumentId" => "document_id".to_string(),
            "executionId" | "ExecutionId" => "execution_id".to_string(),
            "index" | "Index" => "index".to_string(),
            "fileName" | "FileName" => "file_name".to_string(),
            other => other.to_string(),
        }
    }
}

/// A search result exposed to callers of `Search`/`Ask` (§3 glossary, §4.9 step 8).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    pub content: String,
    pub source: String,
    pub relevance_score: f32,
}

/// Collection API: ensure-exists, upsert-by-id, vector search, list collections (§6.5).
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<(), AppError>;

    async fn upsert_batch(&self, collection: &str, records: Vec<MemoryRecord>) -> Result<(), AppError>;

    async fn vector_search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        top_k: usize,
        filters: &[SearchFilter],
    ) -> Result<Vec<(MemoryRecord, f32)>, AppError>;

    async fn list_collections(&self) -> Result<Vec<String>, AppError>;
}

/// Sanitizes an arbitrary index name into a valid, collision-resistant SurrealDB
/// table identifier. Mirrors the persistence handler rule: empty index -> `memory`.
pub fn collection_table_name(index: &str) -> String {
    let index = if index.trim().is_empty() { "memory" } else { index };
    let sanitized: String = index
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("mem_{sanitized}")
}

fn hnsw_index_name(table: &str) -> String {
    format!("idx_hnsw_{table}")
}

fn fts_index_name(table: &str) -> String {
    format!("idx_fts_{table}")
}

pub struct SurrealVectorStore {
    db: SurrealDbClient,
}

impl SurrealVectorStore {
    pub fn new(db: SurrealDbClient) -> Self {
        Self { db }
    }

    async fn existing_hnsw_dimension(&self, table: &str) -> Result<Option<usize>, AppError> {
        let info_query = format!("INFO FOR TABLE {table};");
        let mut response = self
            .db
            .client
            .query(info_query)
            .await
            .map_err(AppError::Database)?;

        let info: Option<Value> = response.take(0).map_err(AppError::Database)?;
        let Some(info) = info else {
            return Ok(None);
        };

        let definition = info
            .get("indexes")
            .and_then(|indexes| indexes.get(hnsw_index_name(table)))
            .and_then(|value| value.as_str())
            .map(str::to_owned);

        let Some(definition) = definition else {
            return Ok(None);
        };

        Ok(definition
            .split("DIMENSION")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|token| token.trim_end_matches(';').parse::<usize>().ok()))
    }
}

#[async_trait]
impl VectorStore for SurrealVectorStore {
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<(), AppError> {
        let table = collection_table_name(collection);

        self.db
            .client
            .query(format!("DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;"))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;

        for field in [
            "document_id",
            "execution_id",
            "index",
            "file_name",
            "artifact_kind",
            "tags",
        ] {
            self.db
                .client
                .query(format!(
                    "DEFINE INDEX IF NOT EXISTS idx_{table}_{field} ON TABLE {table} FIELDS {field};"
                ))
                .await
                .map_err(AppError::Database)?
                .check()
                .map_err(AppError::Database)?;
        }

        self.db
            .client
            .query(format!(
                "DEFINE INDEX IF NOT EXISTS {fts} ON TABLE {table} FIELDS text SEARCH ANALYZER {analyzer} BM25;",
                fts = fts_index_name(&table),
                analyzer = FTS_ANALYZER_NAME,
            ))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;

        match self.existing_hnsw_dimension(&table).await? {
            Some(existing) if existing == dimension => {
                debug!(table = %table, dimension, "hnsw index already matches dimension");
            }
            Some(existing) => {
                info!(
                    table = %table,
                    existing_dimension = existing,
                    target_dimension = dimension,
                    "overwriting hnsw index for new embedding dimension"
                );
                self.db
                    .client
                    .query(format!(
                        "DEFINE INDEX OVERWRITE {idx} ON TABLE {table} FIELDS embedding HNSW DIMENSION {dimension} DIST COSINE TYPE F32 EFC 100 M 8;",
                        idx = hnsw_index_name(&table),
                    ))
                    .await
                    .map_err(AppError::Database)?
                    .check()
                    .map_err(AppError::Database)?;
            }
            None => {
                self.db
                    .client
                    .query(format!(
                        "DEFINE INDEX IF NOT EXISTS {idx} ON TABLE {table} FIELDS embedding HNSW DIMENSION {dimension} DIST COSINE TYPE F32 EFC 100 M 8;",
                        idx = hnsw_index_name(&table),
                    ))
                    .await
                    .map_err(AppError::Database)?
                    .check()
                    .map_err(AppError::Database)?;
            }
        }

        Ok(())
    }

    async fn upsert_batch(&self, collection: &str, records: Vec<MemoryRecord>) -> Result<(), AppError> {
        if records.is_empty() {
            return Ok(());
        }
        let table = collection_table_name(collection);

        let mut query = self.db.client.query("BEGIN TRANSACTION;");
        for (position, record) in records.iter().enumerate() {
            query = query
                .query(format!(
                    "UPSERT type::thing($table_{position}, $id_{position}) CONTENT $record_{position};"
                ))
                .bind((format!("table_{position}"), table.clone()))
                .bind((format!("id_{position}"), record.id.clone()))
                .bind((format!("record_{position}"), record.clone()));
        }
        query = query.query("COMMIT TRANSACTION;");

        let response = query.await.map_err(|err| {
            AppError::Storage(format!("upsert batch into {table} failed: {err}"))
        })?;
        response
            .check()
            .map_err(|err| AppError::Storage(format!("upsert batch into {table} failed: {err}")))?;

        Ok(())
    }

    async fn vector_search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        top_k: usize,
        filters: &[SearchFilter],
    ) -> Result<Vec<(MemoryRecord, f32)>, AppError> {
        let table = collection_table_name(collection);

        let mut predicate_clauses = Vec::new();
        let mut bindings: Vec<(String, Value)> = Vec::new();
        for (position, filter) in filters.iter().enumerate() {
            let field = SearchFilter::resolve_field_name(&filter.field);
            let param = format!("filter_{position}");
            predicate_clauses.push(format!("{field} = ${param}"));
            bindings.push((param, filter.value.clone()));
        }

        let where_clause = if predicate_clauses.is_empty() {
            String::new()
        } else {
            format!(" AND {}", predicate_clauses.join(" AND "))
        };

        let sql = format!(
            r#"
            SELECT *, vector::similarity::cosine(embedding, $embedding) AS score
            FROM {table}
            WHERE embedding <|{top_k},100|> $embedding{where_clause}
            ORDER BY score DESC
            LIMIT {top_k};
            "#
        );

        let mut query = self
            .db
            .client
            .query(sql)
            .bind(("embedding", query_embedding.to_vec()));
        for (name, value) in bindings {
            query = query.bind((name, value));
        }

        let mut response = match query.await {
            Ok(response) => response,
            Err(err) => {
                warn!(collection, error = %err, "vector search query failed");
                return Err(AppError::Storage(err.to_string()));
            }
        };

        #[derive(Deserialize)]
        struct Row {
            #[serde(flatten)]
            record: MemoryRecord,
            score: f32,
        }

        let rows: Vec<Row> = response.take(0).map_err(AppError::Database)?;
        Ok(rows.into_iter().map(|row| (row.record, row.score)).collect())
    }

    async fn list_collections(&self) -> Result<Vec<String>, AppError> {
        let mut response = self
            .db
            .client
            .query("INFO FOR DB;")
            .await
            .map_err(AppError::Database)?;
        let info: Option<Value> = response.take(0).map_err(AppError::Database)?;
        let Some(info) = info else {
            return Ok(Vec::new());
        };

        let tables = info
            .get("tables")
            .and_then(|tables| tables.as_object())
            .map(|tables| {
                tables
                    .keys()
                    .filter_map(|name| name.strip_prefix("mem_"))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(tables)
    }
}
