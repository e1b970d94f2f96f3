//! Thin CLI wrapper exposing the ingest/search/ask/list-indexes surface (§6.6, §10.5).
//!
//! Wiring only: configuration loading, logging initialization, and collaborator
//! construction. Deep testing of this binary is out of scope; the logic it calls
//! into is tested at the crate level.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use clap::{Parser, Subcommand};
use common::chat::OpenAiChatModel;
use common::embedding::{EmbeddingModel, OpenAiEmbeddingModel};
use common::error::AppError;
use common::extractor::HttpExtractorClient;
use common::pipeline_state::UploadedFile;
use common::prompts::EmbeddedPromptProvider;
use common::storage::db::SurrealDbClient;
use common::storage::{SurrealVectorStore, VectorStore};
use common::utils::config::{load_config, AppConfig};
use futures::StreamExt;
use ingestion_pipeline::{build_default_orchestrator, ChunkingStrategy};
use retrieval_pipeline::reranking::RerankerPool;
use retrieval_pipeline::service::RetrievalService;
use retrieval_pipeline::{AskEngine, SearchEngine};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "memory-cli", about = "Ingest, search and ask a retrieval-augmented memory index")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a file into an index.
    Ingest {
        #[arg(long, default_value = "default")]
        index: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Search an index for citations.
    Search {
        #[arg(long, default_value = "default")]
        index: String,
        query: String,
        #[arg(long)]
        min_relevance: Option<f32>,
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
    /// Ask a question, streaming the answer as it arrives.
    Ask {
        #[arg(long, default_value = "default")]
        index: String,
        question: String,
        #[arg(long)]
        min_relevance: Option<f32>,
    },
    /// List indexes (vector collections) known to the store.
    ListIndexes,
}

enum CliError {
    Cancelled,
    Pipeline(AppError),
}

impl From<AppError> for CliError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Cancelled => CliError::Cancelled,
            other => CliError::Pipeline(other),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load configuration");
            return ExitCode::from(2);
        }
    };

    let service = match build_service(&config).await {
        Ok(service) => service,
        Err(err) => {
            tracing::error!(error = %err, "failed to initialize collaborators");
            return ExitCode::from(2);
        }
    };

    match run(service, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Cancelled) => ExitCode::from(130),
        Err(CliError::Pipeline(err)) => {
            tracing::error!(error = %err, "command failed");
            ExitCode::from(3)
        }
    }
}

async fn build_service(config: &AppConfig) -> Result<RetrievalService, AppError> {
    let db = SurrealDbClient::new(
        &config.surrealdb_address,
        &config.surrealdb_username,
        &config.surrealdb_password,
        &config.surrealdb_namespace,
        &config.surrealdb_database,
    )
    .await
    .map_err(AppError::Database)?;
    db.ensure_initialized().await.map_err(AppError::Database)?;

    let store: Arc<dyn VectorStore> = Arc::new(SurrealVectorStore::new(db));

    let openai_client = async_openai::Client::with_config(
        OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    );

    let embedding_model: Arc<dyn EmbeddingModel> =
        Arc::new(OpenAiEmbeddingModel::new(openai_client.clone(), &config.embedding_model));
    let chat_model = Arc::new(OpenAiChatModel::new(openai_client, &config.chat_model));
    let extractor = Arc::new(HttpExtractorClient::new(&config.extractor)?);

    let orchestrator = build_default_orchestrator(
        config.orchestrator.clone(),
        config.chunker.clone(),
        ChunkingStrategy::Semantic,
        extractor,
        embedding_model.clone(),
        store.clone(),
    );

    let reranker = RerankerPool::maybe_from_config(&config.reranker)?;
    let search = Arc::new(SearchEngine::new(
        embedding_model,
        store.clone(),
        reranker,
        config.search.clone(),
    ));
    let ask = Arc::new(AskEngine::new(
        search.clone(),
        chat_model,
        Arc::new(EmbeddedPromptProvider),
        config.ask.clone(),
    ));

    Ok(RetrievalService::new(Arc::new(orchestrator), search, ask, store))
}

async fn run(service: RetrievalService, command: Command) -> Result<(), CliError> {
    match command {
        Command::Ingest { index, file } => {
            let bytes = std::fs::read(&file).map_err(AppError::Io)?;
            let file_name = file
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| "upload".to_string());
            let content_type = guess_content_type(&file_name);
            let upload = UploadedFile::new(file_name, bytes, content_type);

            let document_id = service.ingest(&index, upload).await?;
            println!("{document_id}");
            Ok(())
        }
        Command::Search {
            index,
            query,
            min_relevance,
            limit,
        } => {
            let results = service.search(&index, &query, &[], min_relevance, limit).await?;
            print_json(&results.results)
        }
        Command::Ask {
            index,
            question,
            min_relevance,
        } => {
            let mut stream = service.ask_stream(&index, &question, &[], min_relevance).await?;
            while let Some(answer) = stream.next().await {
                print!("{}", answer.result);
            }
            println!();
            Ok(())
        }
        Command::ListIndexes => {
            let indexes = service.list_indexes().await?;
            print_json(&indexes)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value).map_err(AppError::Serialization)?;
    println!("{rendered}");
    Ok(())
}

fn guess_content_type(file_name: &str) -> &'static str {
    match file_name.rsplit('.').next().unwrap_or_default() {
        "txt" | "md" => "text/plain",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        _ => "application/octet-stream",
    }
}
