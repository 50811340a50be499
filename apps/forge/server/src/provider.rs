//! Provider wiring.
//!
//! The LLM/embedding backends are external collaborators reached over HTTP.
//! When no endpoint is configured the offline provider is wired instead and
//! every worker runs on its rule-based fallback path.

use async_trait::async_trait;
use domain_intelligence::{CompletionOptions, LlmProvider, ProviderError};
use serde_json::json;
use tracing::info;

/// Build the process-wide provider from `LLM_ENDPOINT`.
pub fn provider_from_env() -> domain_intelligence::SharedProvider {
    match std::env::var("LLM_ENDPOINT") {
        Ok(endpoint) if !endpoint.trim().is_empty() => {
            info!(endpoint = %endpoint, "Using HTTP LLM provider");
            std::sync::Arc::new(HttpProvider::new(endpoint))
        }
        _ => {
            info!("No LLM_ENDPOINT configured, workers run on rule-based fallbacks");
            std::sync::Arc::new(OfflineProvider)
        }
    }
}

/// Thin HTTP client for a completion/embedding service.
pub struct HttpProvider {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "prompt": prompt,
            "model": options.model.map(|m| m.as_str()),
            "maxTokens": options.max_tokens,
            "temperature": options.temperature,
        });

        let response = self
            .client
            .post(format!("{}/complete", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if response.status().as_u16() == 429 {
            return Err(ProviderError::RateLimited("completion throttled".to_string()));
        }
        if !response.status().is_success() {
            return Err(ProviderError::Unavailable(format!(
                "completion returned {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        value["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse("missing text field".to_string()))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let response = self
            .client
            .post(format!("{}/embed", self.endpoint))
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Unavailable(format!(
                "embedding returned {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        value["vector"]
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_f64())
                    .map(|v| v as f32)
                    .collect()
            })
            .ok_or_else(|| ProviderError::InvalidResponse("missing vector field".to_string()))
    }
}

/// Provider used when no endpoint is configured; always errors so workers
/// stay on their fallback paths.
pub struct OfflineProvider;

#[async_trait]
impl LlmProvider for OfflineProvider {
    async fn complete(
        &self,
        _prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::Unavailable("no provider configured".to_string()))
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Unavailable("no provider configured".to_string()))
    }
}
