use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Top-level application configuration, layered `config.toml` → environment.
///
/// Environment variables are read with the `MEMORY_` prefix and `__` as the
/// nesting separator (e.g. `MEMORY_CHUNKER__MAX_CHUNK_SIZE=1500`).
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    pub surrealdb_address: String,
    #[serde(default = "default_surrealdb_username")]
    pub surrealdb_username: String,
    #[serde(default = "default_surrealdb_password")]
    pub surrealdb_password: String,
    #[serde(default = "default_surrealdb_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surrealdb_database")]
    pub surrealdb_database: String,

    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub ask: AskConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_surrealdb_username() -> String {
    "root".to_string()
}

fn default_surrealdb_password() -> String {
    "root".to_string()
}

fn default_surrealdb_namespace() -> String {
    "memory_pipeline".to_string()
}

fn default_surrealdb_database() -> String {
    "memory_pipeline".to_string()
}

/// Connection and timeout settings for the remote markdown extractor (§6.1).
#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct ExtractorConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            request_timeout_secs: 300,
        }
    }
}

/// Tunables shared by the simple and semantic chunkers (§4.5, §4.6).
#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct ChunkerConfig {
    pub simple_max_chunk_size: usize,
    pub simple_text_overlap: usize,
    pub semantic_max_chunk_size: usize,
    pub semantic_min_chunk_size: usize,
    pub title_level_threshold: u8,
    pub include_title_context: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            simple_max_chunk_size: 1000,
            simple_text_overlap: 100,
            semantic_max_chunk_size: 2000,
            semantic_min_chunk_size: 100,
            title_level_threshold: 2,
            include_title_context: true,
        }
    }
}

/// Retry/backoff tunables for the orchestrator (§4.3).
#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_retries: u32,
    pub backoff_base_millis: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_millis: 200,
        }
    }
}

/// Defaults for the search engine (§4.9).
#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct SearchConfig {
    pub max_matches_count: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_matches_count: 10,
        }
    }
}

/// Prompt and sampling defaults for the ask engine (§4.10).
#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct AskConfig {
    pub fact_template: String,
    pub empty_answer: String,
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub answer_tokens: u32,
    pub max_ask_prompt_size: usize,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            fact_template: "Source: {{$source}} (relevance {{$relevance}}, id {{$memoryId}})\n{{$content}}".to_string(),
            empty_answer: "I don't have enough information to answer that.".to_string(),
            temperature: 0.2,
            top_p: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            answer_tokens: 800,
            max_ask_prompt_size: 12_000,
        }
    }
}

/// Pool sizing and model cache settings for the optional lexical reranker (§4.9).
#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub pool_size: usize,
    pub cache_dir: String,
    pub show_download_progress: bool,
    pub max_length: Option<usize>,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pool_size: 2,
            cache_dir: "./data/fastembed/reranker".to_string(),
            show_download_progress: true,
            max_length: None,
        }
    }
}

pub fn load_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::with_prefix("memory").separator("__"))
        .build()?;

    config.try_deserialize()
}
