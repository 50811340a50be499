//! Content classification.
//!
//! Extracts structural features, asks the LLM classifier for a judgment, and
//! falls back to a rule table when the provider fails or returns something
//! unparsable. Also derives the target-model list, a quality score, and a
//! complexity band.

use crate::error::ProviderError;
use crate::provider::{CompletionOptions, LlmProvider, ModelFamily};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

static VARIABLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*[\w.-]+\s*\}\}").expect("variable regex"));
static IMPERATIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:\d+\.\s*)?(?:please\s+)?(write|create|generate|analyze|summarize|explain|list|describe|answer|translate|review|read|extract|classify|convert|do|make|find)\b")
        .expect("imperative regex")
});
static EXAMPLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(example|e\.g\.|for instance|sample\s+(input|output))").expect("example regex"));
static CONDITIONAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(if|when|unless|otherwise|in case|depending on)\b").expect("conditional regex"));
static CONSTRAINT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(must|never|always|only|do not|don't|should not|limit|at most|at least|require)\b").expect("constraint regex"));
static PERSONALITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(you are|act as|persona|personality|your role|behave like|character)").expect("personality regex"));

/// Structural features of one piece of content.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentFeatures {
    pub length: usize,
    pub word_count: usize,
    pub has_variables: bool,
    pub has_instructions: bool,
    pub has_examples: bool,
    pub has_conditionals: bool,
    pub has_constraints: bool,
    pub has_personality: bool,
}

impl ContentFeatures {
    pub fn extract(content: &str) -> Self {
        Self {
            length: content.chars().count(),
            word_count: content.split_whitespace().count(),
            has_variables: VARIABLE_RE.is_match(content),
            has_instructions: IMPERATIVE_RE.is_match(content),
            has_examples: EXAMPLE_RE.is_match(content),
            has_conditionals: CONDITIONAL_RE.is_match(content),
            has_constraints: CONSTRAINT_RE.is_match(content),
            has_personality: PERSONALITY_RE.is_match(content),
        }
    }

    /// Count of the five structural features used for the complexity band.
    fn structural_count(&self) -> u32 {
        [
            self.has_variables,
            self.has_instructions,
            self.has_examples,
            self.has_conditionals,
            self.has_constraints,
        ]
        .iter()
        .filter(|f| **f)
        .count() as u32
    }
}

/// Outcome of a classification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    #[serde(rename = "type")]
    pub item_type: String,
    pub sub_type: Option<String>,
    /// Confidence in [0, 1]; the fallback path stays within [0.3, 0.8].
    pub confidence: f64,
    pub target_models: Vec<String>,
    pub metadata: Value,
}

const KNOWN_TYPES: [&str; 6] = ["prompt", "agent", "rule", "template", "snippet", "other"];

pub struct Classifier<P: LlmProvider> {
    provider: P,
}

impl<P: LlmProvider> Classifier<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Classify content, preferring the LLM judgment and falling back to the
    /// rule table on provider failure or an unparsable response.
    pub async fn classify(&self, content: &str, format: &str) -> ClassificationResult {
        let features = ContentFeatures::extract(content);

        match self.classify_with_llm(content, format, &features).await {
            Ok(mut result) => {
                result.target_models = derive_target_models(&result.item_type, features.length);
                result.metadata = build_metadata(&features, false);
                result
            }
            Err(e) => {
                warn!(error = %e, "LLM classification failed, using rule fallback");
                self.classify_with_rules(content, &features)
            }
        }
    }

    async fn classify_with_llm(
        &self,
        content: &str,
        format: &str,
        features: &ContentFeatures,
    ) -> Result<ClassificationResult, ProviderError> {
        let head: String = content.chars().take(1000).collect();
        let prompt = format!(
            "Classify this content artifact. Respond with JSON only: \
             {{\"type\": one of {KNOWN_TYPES:?}, \"subType\": optional string, \
             \"confidence\": number 0-1}}.\n\
             Format: {format}\n\
             Features: {}\n\
             Content (first 1000 chars):\n{head}",
            serde_json::to_string(features).unwrap_or_default(),
        );

        let response = self
            .provider
            .complete(&prompt, &CompletionOptions::for_model(ModelFamily::OpenAi))
            .await?;

        parse_llm_classification(&response)
    }

    /// Rule-table fallback, always producing a valid result for non-empty
    /// content.
    pub fn classify_with_rules(
        &self,
        content: &str,
        features: &ContentFeatures,
    ) -> ClassificationResult {
        let lower = content.to_lowercase();

        let item_type = if features.has_instructions && features.has_personality {
            "agent"
        } else if features.has_constraints && lower.contains("rule") {
            "rule"
        } else if features.has_variables && lower.contains("template") {
            "template"
        } else if features.length < 200 && !features.has_instructions {
            "snippet"
        } else {
            "prompt"
        };

        let confidence =
            (0.35 + 0.09 * f64::from(features.structural_count())).clamp(0.3, 0.8);

        debug!(item_type, confidence, "Rule-based classification");

        ClassificationResult {
            item_type: item_type.to_string(),
            sub_type: None,
            confidence: round2(confidence),
            target_models: derive_target_models(item_type, features.length),
            metadata: build_metadata(features, true),
        }
    }
}

fn parse_llm_classification(response: &str) -> Result<ClassificationResult, ProviderError> {
    // Providers sometimes wrap JSON in prose; take the outermost braces
    let start = response.find('{');
    let end = response.rfind('}');
    let json_str = match (start, end) {
        (Some(s), Some(e)) if e > s => &response[s..=e],
        _ => {
            return Err(ProviderError::InvalidResponse(
                "no JSON object in response".to_string(),
            ))
        }
    };

    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

    let item_type = value["type"]
        .as_str()
        .map(str::to_lowercase)
        .filter(|t| KNOWN_TYPES.contains(&t.as_str()))
        .ok_or_else(|| ProviderError::InvalidResponse("missing or unknown type".to_string()))?;

    let confidence = value["confidence"]
        .as_f64()
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);

    Ok(ClassificationResult {
        item_type,
        sub_type: value["subType"].as_str().map(str::to_string),
        confidence: round2(confidence),
        target_models: Vec::new(), // filled in by the caller
        metadata: Value::Null,
    })
}

/// Target-model list derived from the classified type and content length.
pub fn derive_target_models(item_type: &str, length: usize) -> Vec<String> {
    match item_type {
        "agent" => vec!["claude".to_string(), "openai".to_string()],
        "template" => vec!["openai".to_string(), "gemini".to_string()],
        _ if length > 2000 => vec!["claude".to_string()],
        _ => vec![
            "claude".to_string(),
            "openai".to_string(),
            "gemini".to_string(),
        ],
    }
}

fn build_metadata(features: &ContentFeatures, fallback: bool) -> Value {
    json!({
        "features": features,
        "fallback": fallback,
        "qualityScore": quality_score(features),
        "complexity": complexity(features),
    })
}

/// Quality score in [0, 1] from feature presence.
pub fn quality_score(features: &ContentFeatures) -> f64 {
    let present = [
        features.has_variables,
        features.has_instructions,
        features.has_examples,
        features.has_conditionals,
        features.has_constraints,
        features.has_personality,
    ]
    .iter()
    .filter(|f| **f)
    .count();

    round2(present as f64 / 6.0)
}

/// Complexity band from the 0-5 structural feature count.
pub fn complexity(features: &ContentFeatures) -> &'static str {
    match features.structural_count() {
        0 | 1 => "low",
        2 | 3 => "medium",
        _ => "high",
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use async_trait::async_trait;

    /// Provider that always fails, forcing the fallback path.
    struct DownProvider;

    #[async_trait]
    impl LlmProvider for DownProvider {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, ProviderError> {
            Err(ProviderError::Unavailable("offline".to_string()))
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Err(ProviderError::Unavailable("offline".to_string()))
        }
    }

    /// Provider that returns a canned completion.
    struct CannedProvider {
        response: String,
    }

    impl CannedProvider {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, ProviderError> {
            Ok(self.response.clone())
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![0.0; 8])
        }
    }

    #[test]
    fn test_feature_extraction() {
        let content = "You are a helpful reviewer. If the input {{code}} fails, \
                       explain why. Must never invent APIs. Example: ...";
        let features = ContentFeatures::extract(content);

        assert!(features.has_variables);
        assert!(features.has_conditionals);
        assert!(features.has_constraints);
        assert!(features.has_examples);
        assert!(features.has_personality);
    }

    #[tokio::test]
    async fn test_llm_path_used_when_available() {
        let provider =
            CannedProvider::new(r#"{"type": "prompt", "subType": "qa", "confidence": 0.92}"#);
        let classifier = Classifier::new(provider);

        let result = classifier
            .classify("Answer the user's question concisely.", ".md")
            .await;

        assert_eq!(result.item_type, "prompt");
        assert_eq!(result.sub_type.as_deref(), Some("qa"));
        assert_eq!(result.confidence, 0.92);
        assert_eq!(result.metadata["fallback"], false);
        assert!(!result.target_models.is_empty());
    }

    #[tokio::test]
    async fn test_prose_wrapped_json_still_parses() {
        let provider =
            CannedProvider::new(r#"Sure! Here you go: {"type": "agent", "confidence": 0.8} Hope that helps."#);
        let classifier = Classifier::new(provider);

        let result = classifier.classify("You are a bot. Do things.", ".md").await;
        assert_eq!(result.item_type, "agent");
        assert_eq!(result.target_models, vec!["claude", "openai"]);
    }

    #[tokio::test]
    async fn test_fallback_on_provider_failure() {
        let classifier = Classifier::new(DownProvider);
        let result = classifier
            .classify(
                "You are a helpful assistant. Answer the user's question.",
                ".md",
            )
            .await;

        // agent: instructions + personality
        assert_eq!(result.item_type, "agent");
        assert!(result.confidence >= 0.3 && result.confidence <= 0.8);
        assert_eq!(result.metadata["fallback"], true);
    }

    #[tokio::test]
    async fn test_fallback_on_garbage_response() {
        let classifier = Classifier::new(CannedProvider::new("I cannot classify this."));
        let result = classifier.classify("Summarize the following text.", ".md").await;

        assert_eq!(result.metadata["fallback"], true);
        assert!(KNOWN_TYPES.contains(&result.item_type.as_str()));
    }

    #[tokio::test]
    async fn test_fallback_rule_table() {
        let classifier = Classifier::new(DownProvider);

        let rule = classifier
            .classify("Rule: commit messages must never exceed 72 chars.", ".md")
            .await;
        assert_eq!(rule.item_type, "rule");

        let template = classifier
            .classify("Email template: Dear {{name}}, welcome to {{product}}.", ".md")
            .await;
        assert_eq!(template.item_type, "template");

        let snippet = classifier.classify("A short note.", ".md").await;
        assert_eq!(snippet.item_type, "snippet");
    }

    #[test]
    fn test_target_model_derivation() {
        assert_eq!(derive_target_models("agent", 100), vec!["claude", "openai"]);
        assert_eq!(derive_target_models("template", 100), vec!["openai", "gemini"]);
        assert_eq!(derive_target_models("prompt", 5000), vec!["claude"]);
        assert_eq!(
            derive_target_models("prompt", 100),
            vec!["claude", "openai", "gemini"]
        );
    }

    #[test]
    fn test_complexity_bands() {
        let none = ContentFeatures::extract("plain text here");
        assert_eq!(complexity(&none), "low");

        let some = ContentFeatures::extract(
            "Write a summary. If it is long, shorten it. Must be brief. \
             Use {{tone}}. Example: ...",
        );
        assert_eq!(complexity(&some), "high");
    }

    #[test]
    fn test_fallback_valid_for_any_nonempty_content() {
        let classifier = Classifier::new(DownProvider);
        for content in ["x", "hello world", "{{v}}", "if must rule template example"] {
            let features = ContentFeatures::extract(content);
            let result = classifier.classify_with_rules(content, &features);
            assert!(KNOWN_TYPES.contains(&result.item_type.as_str()));
            assert!(result.confidence >= 0.3 && result.confidence <= 0.8);
        }
    }
}
