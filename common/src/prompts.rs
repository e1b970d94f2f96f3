//! Prompt provider (§6.4).

use crate::error::AppError;

pub static ASK_WITH_FACTS_PROMPT_NAME: &str = "AskWithFacts";

static DEFAULT_ASK_WITH_FACTS_PROMPT: &str = r#"You are answering a question using only the facts supplied below. Each fact carries its source and a relevance score.

Facts:
==================
{{$facts}}

Question:
==================
{{$input}}

Instructions:
- Answer using only the facts above; do not invent information that is not present in them.
- If the facts do not contain enough information to answer, respond with exactly: {{$notFound}}
- When you reference a fact, mention the source it came from.
"#;

/// Supplies named prompt text to the ask engine. A single operation, per the
/// interface contract: implementations may read from embedded resources or a
/// filesystem, as long as an unknown name produces a clear not-found error.
pub trait PromptProvider: Send + Sync {
    fn read_prompt(&self, name: &str) -> Result<String, AppError>;
}

/// Ships the required prompts as compiled-in string constants.
pub struct EmbeddedPromptProvider;

impl PromptProvider for EmbeddedPromptProvider {
    fn read_prompt(&self, name: &str) -> Result<String, AppError> {
        match name {
            "AskWithFacts" => Ok(DEFAULT_ASK_WITH_FACTS_PROMPT.to_string()),
            other => Err(AppError::NotFound(format!("unknown prompt '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_provider_resolves_ask_with_facts() {
        let provider = EmbeddedPromptProvider;
        let prompt = provider.read_prompt(ASK_WITH_FACTS_PROMPT_NAME).expect("prompt");
        assert!(prompt.contains("{{$facts}}"));
        assert!(prompt.contains("{{$input}}"));
        assert!(prompt.contains("{{$notFound}}"));
    }

    #[test]
    fn unknown_prompt_name_is_not_found() {
        let provider = EmbeddedPromptProvider;
        let err = provider.read_prompt("DoesNotExist").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
