//! Streaming ask engine: search for facts, prompt a chat model, stream the answer (§4.10).

use std::pin::Pin;
use std::sync::Arc;

use common::chat::{ChatMessage, ChatModel, ChatParams, TokenUsage};
use common::error::AppError;
use common::prompts::{PromptProvider, ASK_WITH_FACTS_PROMPT_NAME};
use common::storage::{Citation, SearchFilter};
use common::utils::config::AskConfig;
use futures::{Stream, StreamExt};
use tracing::instrument;

use crate::search::SearchEngine;

#[derive(Clone, Debug, Default)]
pub struct Answer {
    pub question: String,
    pub result: String,
    pub has_result: bool,
    pub sources: Vec<Citation>,
    pub token_usage: Option<TokenUsage>,
}

pub struct AskEngine {
    search: Arc<SearchEngine>,
    chat_model: Arc<dyn ChatModel>,
    prompts: Arc<dyn PromptProvider>,
    config: AskConfig,
}

impl AskEngine {
    pub fn new(
        search: Arc<SearchEngine>,
        chat_model: Arc<dyn ChatModel>,
        prompts: Arc<dyn PromptProvider>,
        config: AskConfig,
    ) -> Self {
        Self {
            search,
            chat_model,
            prompts,
            config,
        }
    }

    fn build_facts(&self, sources: &[Citation]) -> String {
        sources
            .iter()
            .map(|citation| {
                self.config
                    .fact_template
                    .replace("{{$content}}", &citation.content)
                    .replace("{{$source}}", &citation.source)
                    .replace("{{$relevance}}", &format!("{:.3}", citation.relevance_score))
                    .replace("{{$memoryId}}", &citation.id)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[instrument(skip_all, fields(index, question))]
    pub async fn ask_stream(
        &self,
        index: &str,
        question: &str,
        filters: &[SearchFilter],
        min_relevance: Option<f32>,
    ) -> Result<Pin<Box<dyn Stream<Item = Answer> + Send>>, AppError> {
        let search_results = self.search.search(index, question, filters, min_relevance, 0).await;

        let sources = match &search_results {
            Ok(results) if !results.results.is_empty() => results.results.clone(),
            _ => {
                let answer = Answer {
                    question: question.to_string(),
                    result: self.config.empty_answer.clone(),
                    has_result: false,
                    sources: Vec::new(),
                    token_usage: None,
                };
                return Ok(Box::pin(futures::stream::once(async move { answer })));
            }
        };

        let facts = self.build_facts(&sources);
        let prompt_template = self.prompts.read_prompt(ASK_WITH_FACTS_PROMPT_NAME)?;
        let prompt = prompt_template
            .replace("{{$facts}}", &facts)
            .replace("{{$input}}", question)
            .replace("{{$notFound}}", &self.config.empty_answer);

        let params = ChatParams {
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            presence_penalty: self.config.presence_penalty,
            frequency_penalty: self.config.frequency_penalty,
            stop: Vec::new(),
            max_tokens: (self.config.max_ask_prompt_size > 0).then_some(self.config.answer_tokens),
        };

        let mut chat_stream = self
            .chat_model
            .stream_chat(vec![ChatMessage::User(prompt)], params)
            .await?;

        let question = question.to_string();
        let empty_answer = self.config.empty_answer.clone();

        let stream = async_stream::stream! {
            let mut accumulated = String::new();
            let mut last_usage: Option<TokenUsage> = None;
            let mut first_yield = true;
            let mut yielded_any = false;

            while let Some(chunk) = chat_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(_) => break,
                };

                if chunk.usage.is_some() {
                    last_usage = chunk.usage;
                }

                if chunk.delta.is_empty() {
                    continue;
                }

                accumulated.push_str(&chunk.delta);
                yielded_any = true;

                let has_result = !accumulated.trim().is_empty()
                    && !accumulated.trim().eq_ignore_ascii_case(empty_answer.trim());

                yield Answer {
                    question: question.clone(),
                    result: accumulated.clone(),
                    has_result,
                    sources: if first_yield { sources.clone() } else { Vec::new() },
                    token_usage: last_usage.clone(),
                };
                first_yield = false;
            }

            if !yielded_any {
                let result = if accumulated.is_empty() {
                    "No response received from chat completion service.".to_string()
                } else {
                    accumulated
                };
                yield Answer {
                    question: question.clone(),
                    result,
                    has_result: false,
                    sources: sources.clone(),
                    token_usage: last_usage,
                };
            }
        };

        Ok(Box::pin(stream))
    }

    /// Non-streaming `Ask`: drains `ask_stream`, keeping the last answer but
    /// merging in the sources captured from the first yielded chunk.
    pub async fn ask(
        &self,
        index: &str,
        question: &str,
        filters: &[SearchFilter],
        min_relevance: Option<f32>,
    ) -> Result<Answer, AppError> {
        let mut stream = self.ask_stream(index, question, filters, min_relevance).await?;

        let mut first_sources = Vec::new();
        let mut last_answer: Option<Answer> = None;
        let mut first = true;

        while let Some(answer) = stream.next().await {
            if first {
                first_sources = answer.sources.clone();
                first = false;
            }
            last_answer = Some(answer);
        }

        let mut answer = last_answer.unwrap_or_else(|| Answer {
            question: question.to_string(),
            result: self.config.empty_answer.clone(),
            has_result: false,
            sources: Vec::new(),
            token_usage: None,
        });
        if answer.sources.is_empty() {
            answer.sources = first_sources;
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use async_trait::async_trait;
    use common::embedding::EmbeddingModel;
    use common::storage::{MemoryRecord, VectorStore};
    use common::utils::config::SearchConfig;
    use futures::stream;

    struct FixedEmbeddingModel;

    #[async_trait]
    impl EmbeddingModel for FixedEmbeddingModel {
        async fn embed(&self, _input: &str) -> Result<Vec<f32>, AppError> {
            Ok(vec![0.1, 0.2])
        }
    }

    struct FakeStore(Vec<(MemoryRecord, f32)>);

    #[async_trait]
    impl VectorStore for FakeStore {
        async fn ensure_collection(&self, _collection: &str, _dimension: usize) -> Result<(), AppError> {
            Ok(())
        }

        async fn upsert_batch(&self, _collection: &str, _records: Vec<MemoryRecord>) -> Result<(), AppError> {
            Ok(())
        }

        async fn vector_search(
            &self,
            _collection: &str,
            _query_embedding: &[f32],
            top_k: usize,
            _filters: &[SearchFilter],
        ) -> Result<Vec<(MemoryRecord, f32)>, AppError> {
            Ok(self.0.iter().take(top_k).cloned().collect())
        }

        async fn list_collections(&self) -> Result<Vec<String>, AppError> {
            Ok(Vec::new())
        }
    }

    struct EchoChatModel {
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl ChatModel for EchoChatModel {
        async fn stream_chat(
            &self,
            _messages: Vec<ChatMessage>,
            _params: ChatParams,
        ) -> Result<Pin<Box<dyn Stream<Item = Result<common::chat::ChatChunk, AppError>> + Send>>, AppError> {
            let items: Vec<Result<common::chat::ChatChunk, AppError>> = self
                .chunks
                .iter()
                .map(|text| {
                    Ok(common::chat::ChatChunk {
                        delta: text.to_string(),
                        usage: None,
                    })
                })
                .collect();
            Ok(Box::pin(stream::iter(items)))
        }
    }

    struct StaticPromptProvider;

    impl PromptProvider for StaticPromptProvider {
        fn read_prompt(&self, _name: &str) -> Result<String, AppError> {
            Ok("facts: {{$facts}} question: {{$input}} empty: {{$notFound}}".to_string())
        }
    }

    fn record(id: &str) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            document_id: "doc-1".to_string(),
            execution_id: "exec-1".to_string(),
            index: "default".to_string(),
            file_name: "doc.txt".to_string(),
            text: "alpha fact".to_string(),
            artifact_kind: "TextPartition".to_string(),
            partition_number: 0,
            section_number: 0,
            tags: HashMap::new(),
            created_at: chrono::Utc::now(),
            embedding: vec![0.1, 0.2],
        }
    }

    fn engine(chunks: Vec<&'static str>, matches: Vec<(MemoryRecord, f32)>) -> AskEngine {
        let search = Arc::new(SearchEngine::new(
            Arc::new(FixedEmbeddingModel),
            Arc::new(FakeStore(matches)),
            None,
            SearchConfig::default(),
        ));
        AskEngine::new(
            search,
            Arc::new(EchoChatModel { chunks }),
            Arc::new(StaticPromptProvider),
            AskConfig::default(),
        )
    }

    #[tokio::test]
    async fn empty_index_yields_a_no_result_terminal_answer() {
        let engine = engine(vec!["ignored"], Vec::new());

        let answer = engine.ask("default", "what is alpha?", &[], None).await.expect("ask");

        assert!(!answer.has_result);
        assert_eq!(answer.result, engine_empty_answer());
        assert!(answer.sources.is_empty());
    }

    fn engine_empty_answer() -> String {
        AskConfig::default().empty_answer
    }

    #[tokio::test]
    async fn streaming_answer_carries_sources_only_on_first_chunk() {
        let engine = engine(vec!["Al", "pha is a letter."], vec![(record("a"), 0.9)]);

        let mut stream = engine
            .ask_stream("default", "what is alpha?", &[], None)
            .await
            .expect("ask_stream");

        let first = stream.next().await.expect("first chunk");
        assert_eq!(first.sources.len(), 1);
        let second = stream.next().await.expect("second chunk");
        assert!(second.sources.is_empty());
        assert_eq!(second.result, "Alpha is a letter.");
        assert!(second.has_result);
    }

    #[tokio::test]
    async fn ask_merges_first_chunk_sources_into_final_answer() {
        let engine = engine(vec!["Alpha is a letter."], vec![(record("a"), 0.9)]);

        let answer = engine.ask("default", "what is alpha?", &[], None).await.expect("ask");

        assert_eq!(answer.result, "Alpha is a letter.");
        assert_eq!(answer.sources.len(), 1);
        assert!(answer.has_result);
    }
}
