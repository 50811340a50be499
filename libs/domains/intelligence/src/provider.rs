//! LLM and embedding provider seam.
//!
//! Workers name the model family they want; the provider implements the
//! mapping to a concrete backend. Keeping one capability here centralizes
//! the fallback policy: every worker treats a provider failure as a switch
//! to its rule-based path, never as a job failure.

use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Model family a worker can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    #[default]
    OpenAi,
    Anthropic,
    Gemini,
}

impl ModelFamily {
    /// Map a user-facing target-model label onto a family.
    ///
    /// Labels are free-form ("claude", "gpt-4", "openai", ...); unknown
    /// labels land on the default family.
    pub fn from_label(label: &str) -> Self {
        let lower = label.to_lowercase();
        if lower.contains("claude") || lower.contains("anthropic") {
            Self::Anthropic
        } else if lower.contains("gemini") || lower.contains("google") {
            Self::Gemini
        } else {
            Self::OpenAi
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

/// Options for a completion call.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub model: Option<ModelFamily>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionOptions {
    pub fn for_model(model: ModelFamily) -> Self {
        Self {
            model: Some(model),
            ..Default::default()
        }
    }
}

/// Opaque capability over the external LLM/embedding backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Complete a prompt, returning raw text.
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError>;

    /// Embed a text into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

#[async_trait]
impl<T: LlmProvider + ?Sized> LlmProvider for std::sync::Arc<T> {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        (**self).complete(prompt, options).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        (**self).embed(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_from_label() {
        assert_eq!(ModelFamily::from_label("claude"), ModelFamily::Anthropic);
        assert_eq!(ModelFamily::from_label("claude-3-opus"), ModelFamily::Anthropic);
        assert_eq!(ModelFamily::from_label("gemini-pro"), ModelFamily::Gemini);
        assert_eq!(ModelFamily::from_label("gpt-4"), ModelFamily::OpenAi);
        assert_eq!(ModelFamily::from_label("openai"), ModelFamily::OpenAi);
        assert_eq!(ModelFamily::from_label("mystery"), ModelFamily::OpenAi);
    }
}
