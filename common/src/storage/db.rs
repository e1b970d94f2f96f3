use std::ops::Deref;

use surrealdb::engine::any::{connect, Any};
use surrealdb::opt::auth::Root;
use surrealdb::{Error, Surreal};
use tracing::warn;

pub const FTS_ANALYZER_NAME: &str = "memory_fts_analyzer";

/// Thin wrapper around a connected `Surreal<Any>` client.
///
/// Kept deliberately small: the dynamic, per-index schema lives in
/// [`crate::storage::vector_store`] rather than here, since the vector store is the
/// only collaborator in this codebase that needs to define tables and indexes.
#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;
        db.signin(Root { username, password }).await?;
        db.use_ns(namespace).use_db(database).await?;
        Ok(Self { client: db })
    }

    /// Creates the full-text analyzer shared by every index-backed collection.
    /// Idempotent: safe to call on every startup.
    pub async fn ensure_initialized(&self) -> Result<(), Error> {
        let snowball_query = format!(
            "DEFINE ANALYZER IF NOT EXISTS {analyzer}
                TOKENIZERS class
                FILTERS lowercase, ascii, snowball(english);",
            analyzer = FTS_ANALYZER_NAME
        );

        match self.client.query(snowball_query).await.and_then(|response| response.check()) {
            Ok(_) => return Ok(()),
            _ => {
                warn!(
                    "snowball analyzer unavailable; falling back to lowercase+ascii ({})",
                    FTS_ANALYZER_NAME
                );
            }
        }

        let fallback_query = format!(
            "DEFINE ANALYZER IF NOT EXISTS {analyzer}
                TOKENIZERS class
                FILTERS lowercase, ascii;",
            analyzer = FTS_ANALYZER_NAME
        );
        self.client.query(fallback_query).await?.check()?;
        Ok(())
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Creates an isolated in-memory client for tests. Callers should pass a
    /// freshly generated database name so parallel tests never share state.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;
        db.use_ns(namespace).use_db(database).await?;
        Ok(Self { client: db })
    }
}
