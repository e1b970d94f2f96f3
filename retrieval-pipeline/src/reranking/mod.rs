//! Optional lexical reranker pool sitting in front of `Search` (§4.9 step 7).
//!
//! Vector search alone orders by cosine distance; a cross-encoder reranker
//! re-scores the candidate set against the literal query text and tends to
//! correct cases where the embedding model missed a lexical match. This is
//! opt-in: when disabled, `Search` falls back to the vector-ranked order and
//! applies `minRelevance` itself.

use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use common::{error::AppError, utils::config::RerankerConfig};
use fastembed::{RerankInitOptions, RerankResult, TextRerank};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

static NEXT_ENGINE: AtomicUsize = AtomicUsize::new(0);

fn pick_engine_index(pool_len: usize) -> usize {
    let n = NEXT_ENGINE.fetch_add(1, Ordering::Relaxed);
    n % pool_len
}

#[derive(Debug)]
pub struct RerankerPool {
    engines: Vec<Arc<Mutex<TextRerank>>>,
    semaphore: Arc<Semaphore>,
}

impl RerankerPool {
    /// Build the pool at startup from an explicit pool size.
    pub fn new(pool_size: usize) -> Result<Arc<Self>, AppError> {
        Self::new_with_options(pool_size, RerankInitOptions::default())
    }

    fn new_with_options(pool_size: usize, init_options: RerankInitOptions) -> Result<Arc<Self>, AppError> {
        if pool_size == 0 {
            return Err(AppError::Validation("reranker pool size must be greater than zero".to_string()));
        }

        fs::create_dir_all(&init_options.cache_dir)?;

        let mut engines = Vec::with_capacity(pool_size);
        for x in 0..pool_size {
            debug!("creating reranking engine: {x}");
            let model = TextRerank::try_new(init_options.clone()).map_err(|e| AppError::Internal(e.to_string()))?;
            engines.push(Arc::new(Mutex::new(model)));
        }

        Ok(Arc::new(Self {
            engines,
            semaphore: Arc::new(Semaphore::new(pool_size)),
        }))
    }

    /// Build a pool from configuration, or return `None` when reranking is disabled.
    pub fn maybe_from_config(config: &RerankerConfig) -> Result<Option<Arc<Self>>, AppError> {
        if !config.enabled {
            return Ok(None);
        }

        let mut init_options = RerankInitOptions::default();
        init_options.cache_dir = PathBuf::from(&config.cache_dir);
        init_options.show_download_progress = config.show_download_progress;
        if let Some(max_length) = config.max_length {
            init_options.max_length = max_length;
        }

        Self::new_with_options(config.pool_size, init_options).map(Some)
    }

    /// Check out capacity and pick an engine. The permit is released when the lease drops.
    pub async fn checkout(self: &Arc<Self>) -> RerankerLease {
        let permit = self.semaphore.clone().acquire_owned().await.expect("semaphore closed");

        let idx = pick_engine_index(self.engines.len());
        let engine = self.engines[idx].clone();

        RerankerLease { _permit: permit, engine }
    }
}

/// Active lease on a single `TextRerank` instance.
pub struct RerankerLease {
    _permit: OwnedSemaphorePermit,
    engine: Arc<Mutex<TextRerank>>,
}

impl RerankerLease {
    pub async fn rerank(&self, query: &str, documents: Vec<String>) -> Result<Vec<RerankResult>, AppError> {
        let mut guard = self.engine.lock().await;

        guard
            .rerank(query.to_owned(), documents, false, None)
            .map_err(|e| AppError::Internal(e.to_string()))
    }
}
