//! Chat-completion client with streaming support (§4.10, §6.3).

use std::pin::Pin;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs, CreateChatCompletionStreamResponse, ChatCompletionStreamOptions,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::error::AppError;

#[derive(Clone, Debug)]
pub enum ChatMessage {
    System(String),
    User(String),
}

/// Sampling and stop-condition parameters (§4.10 step 5).
#[derive(Clone, Debug)]
pub struct ChatParams {
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub stop: Vec<String>,
    pub max_tokens: Option<u32>,
}

/// Token accounting reported by the provider, typed rather than reflected (§4.10 step 8).
#[derive(Clone, Debug, PartialEq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub model: String,
}

/// One streamed delta: accumulated text content plus usage, if the provider attached it.
#[derive(Clone, Debug)]
pub struct ChatChunk {
    pub delta: String,
    pub usage: Option<TokenUsage>,
}

/// Extracts provider-reported usage out of one raw streaming chunk.
///
/// Each provider gets its own adapter instead of probing field-name synonyms at
/// runtime; this is the one implementation needed for an OpenAI-compatible stream.
pub trait UsageAdapter: Send + Sync {
    fn usage_from_chunk(&self, chunk: &CreateChatCompletionStreamResponse) -> Option<TokenUsage>;
}

pub struct OpenAiUsageAdapter;

impl UsageAdapter for OpenAiUsageAdapter {
    fn usage_from_chunk(&self, chunk: &CreateChatCompletionStreamResponse) -> Option<TokenUsage> {
        let usage = chunk.usage.as_ref()?;
        Some(TokenUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            model: chunk.model.clone(),
        })
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        params: ChatParams,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<ChatChunk, AppError>> + Send>>, AppError>;
}

pub struct OpenAiChatModel {
    client: Client<OpenAIConfig>,
    model: String,
    usage_adapter: OpenAiUsageAdapter,
}

impl OpenAiChatModel {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            usage_adapter: OpenAiUsageAdapter,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        params: ChatParams,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<ChatChunk, AppError>> + Send>>, AppError> {
        let chat_messages = messages
            .into_iter()
            .map(|message| match message {
                ChatMessage::System(text) => ChatCompletionRequestSystemMessage::from(text).into(),
                ChatMessage::User(text) => ChatCompletionRequestUserMessage::from(text).into(),
            })
            .collect::<Vec<_>>();

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .messages(chat_messages)
            .temperature(params.temperature)
            .top_p(params.top_p)
            .presence_penalty(params.presence_penalty)
            .frequency_penalty(params.frequency_penalty)
            .stream_options(ChatCompletionStreamOptions {
                include_usage: true,
            });

        if !params.stop.is_empty() {
            builder.stop(params.stop);
        }
        if let Some(max_tokens) = params.max_tokens {
            builder.max_tokens(max_tokens);
        }

        let request = builder.build()?;
        let raw_stream = self.client.chat().create_stream(request).await?;

        let adapter = OpenAiUsageAdapter;
        let mapped = raw_stream.map(move |item| {
            let chunk = item?;
            let delta = chunk
                .choices
                .first()
                .and_then(|choice| choice.delta.content.clone())
                .unwrap_or_default();
            let usage = adapter.usage_from_chunk(&chunk);
            Ok(ChatChunk { delta, usage })
        });

        let _ = &self.usage_adapter;
        Ok(Box::pin(mapped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::types::{
        ChatChoiceStream, ChatCompletionStreamResponseDelta, CompletionUsage, Role,
    };

    fn sample_chunk(content: Option<&str>, usage: Option<CompletionUsage>) -> CreateChatCompletionStreamResponse {
        CreateChatCompletionStreamResponse {
            id: "chatcmpl-test".to_string(),
            choices: vec![ChatChoiceStream {
                index: 0,
                delta: ChatCompletionStreamResponseDelta {
                    content: content.map(str::to_string),
                    function_call: None,
                    tool_calls: None,
                    role: Some(Role::Assistant),
                    refusal: None,
                },
                finish_reason: None,
                logprobs: None,
            }],
            created: 0,
            model: "gpt-4o-mini".to_string(),
            service_tier: None,
            system_fingerprint: None,
            object: "chat.completion.chunk".to_string(),
            usage,
        }
    }

    #[test]
    fn usage_adapter_returns_none_without_usage_block() {
        let chunk = sample_chunk(Some("hi"), None);
        assert!(OpenAiUsageAdapter.usage_from_chunk(&chunk).is_none());
    }

    #[test]
    fn usage_adapter_maps_openai_field_names() {
        let usage = CompletionUsage {
            prompt_tokens: 12,
            completion_tokens: 34,
            total_tokens: 46,
            prompt_tokens_details: None,
            completion_tokens_details: None,
        };
        let chunk = sample_chunk(Some("hi"), Some(usage));
        let mapped = OpenAiUsageAdapter.usage_from_chunk(&chunk).expect("usage");
        assert_eq!(mapped.input_tokens, 12);
        assert_eq!(mapped.output_tokens, 34);
        assert_eq!(mapped.total_tokens, 46);
        assert_eq!(mapped.model, "gpt-4o-mini");
    }
}
