//! For-model content optimization.
//!
//! Analyzes the content, derives an ordered list of improvement
//! opportunities, asks the LLM for a rewrite, and applies rule-based
//! transforms when the provider is unavailable. The improvement score is the
//! delta between the before and after analyses.

use crate::classify::round2;
use crate::error::ProviderError;
use crate::provider::{CompletionOptions, LlmProvider, ModelFamily};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

static STRUCTURE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(#{1,6}\s|\d+\.\s|[-*]\s|```)").expect("structure regex"));
static SPECIFIC_TERM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(\d+%?|e\.g\.|for example|exactly|specific|must|should|"[^"]+"|\{\{\s*[\w.-]+\s*\}\})"#)
        .expect("specific term regex")
});

/// Analysis of one piece of content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetrics {
    pub length: usize,
    pub sentence_count: usize,
    pub paragraph_count: usize,
    pub has_structure: bool,
    /// Falls off as mean sentence length grows past 12 words.
    pub clarity_score: f64,
    /// Density of concrete terms, numbers, and placeholders.
    pub specificity_score: f64,
    /// Heuristic fit for the requested target model.
    pub model_compatibility: f64,
}

/// Result of an optimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub optimized_content: String,
    pub suggestions: Vec<String>,
    pub metrics: OptimizationMetrics,
    /// Mean improvement across clarity, specificity, structure, and
    /// compatibility, in [0, 1].
    pub improvement_score: f64,
    pub fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationMetrics {
    pub before: ContentMetrics,
    pub after: ContentMetrics,
}

pub struct Optimizer<P: LlmProvider> {
    provider: P,
}

impl<P: LlmProvider> Optimizer<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Optimize content for the given target model label.
    pub async fn optimize(&self, content: &str, target_model: &str) -> OptimizationResult {
        let before = analyze_content(content, target_model);
        let opportunities = improvement_opportunities(&before, content, target_model);

        let (optimized, fallback) = match self
            .optimize_with_llm(content, target_model, &opportunities)
            .await
        {
            Ok(rewritten) => (rewritten, false),
            Err(e) => {
                warn!(error = %e, target_model, "LLM optimization failed, applying rule transforms");
                (apply_rule_transforms(content, target_model, &before), true)
            }
        };

        let after = analyze_content(&optimized, target_model);
        let improvement_score = improvement(&before, &after);

        OptimizationResult {
            optimized_content: optimized,
            suggestions: opportunities,
            metrics: OptimizationMetrics { before, after },
            improvement_score,
            fallback,
        }
    }

    async fn optimize_with_llm(
        &self,
        content: &str,
        target_model: &str,
        opportunities: &[String],
    ) -> Result<String, ProviderError> {
        let family = ModelFamily::from_label(target_model);
        let prompt = format!(
            "Rewrite the following content optimized for {target_model}. \
             Apply these improvements, in order:\n{}\n\
             Return only the rewritten content.\n\n{content}",
            opportunities
                .iter()
                .enumerate()
                .map(|(i, o)| format!("{}. {o}", i + 1))
                .collect::<Vec<_>>()
                .join("\n"),
        );

        let rewritten = self
            .provider
            .complete(&prompt, &CompletionOptions::for_model(family))
            .await?;

        if rewritten.trim().is_empty() {
            return Err(ProviderError::InvalidResponse("empty rewrite".to_string()));
        }
        Ok(rewritten)
    }
}

/// Analyze content against a target model label.
pub fn analyze_content(content: &str, target_model: &str) -> ContentMetrics {
    let sentences = split_sentences(content);
    let sentence_count = sentences.len();
    let word_count = content.split_whitespace().count();
    let avg_sentence_len = if sentence_count == 0 {
        0.0
    } else {
        word_count as f64 / sentence_count as f64
    };

    let clarity_score = if avg_sentence_len <= 12.0 {
        1.0
    } else {
        (1.0 - (avg_sentence_len - 12.0) * 0.04).max(0.0)
    };

    let specific_matches = SPECIFIC_TERM_RE.find_iter(content).count();
    let specificity_score = (specific_matches as f64 * 0.15).min(1.0);

    ContentMetrics {
        length: content.chars().count(),
        sentence_count,
        paragraph_count: content.split("\n\n").filter(|p| !p.trim().is_empty()).count(),
        has_structure: STRUCTURE_RE.is_match(content),
        clarity_score: round2(clarity_score),
        specificity_score: round2(specificity_score),
        model_compatibility: round2(model_compatibility(content, target_model)),
    }
}

fn model_compatibility(content: &str, target_model: &str) -> f64 {
    let mut score: f64 = 0.6;
    match ModelFamily::from_label(target_model) {
        ModelFamily::OpenAi => {
            if content.to_lowercase().contains("system:") {
                score += 0.3;
            }
            if STRUCTURE_RE.is_match(content) {
                score += 0.1;
            }
        }
        ModelFamily::Anthropic => {
            if content.contains('<') && content.contains('>') {
                score += 0.2;
            }
            if content.chars().count() > 1000 {
                score += 0.2;
            }
        }
        ModelFamily::Gemini => {
            score += 0.1;
            if STRUCTURE_RE.is_match(content) {
                score += 0.1;
            }
        }
    }
    score.min(1.0)
}

/// Ordered list of improvement opportunities for the content.
pub fn improvement_opportunities(
    metrics: &ContentMetrics,
    _content: &str,
    target_model: &str,
) -> Vec<String> {
    let mut opportunities = Vec::new();

    if !metrics.has_structure && metrics.sentence_count > 3 {
        opportunities.push("Convert prose into a numbered list of steps".to_string());
    }
    if metrics.clarity_score < 0.7 {
        opportunities.push("Shorten long sentences for clarity".to_string());
    }
    if metrics.specificity_score < 0.5 {
        opportunities.push("Add concrete examples, numbers, or constraints".to_string());
    }
    if metrics.model_compatibility < 0.8 {
        opportunities.push(format!(
            "Align formatting with {target_model} conventions"
        ));
    }
    if metrics.length > 4000 {
        opportunities.push("Trim redundant content to fit the context budget".to_string());
    }

    opportunities
}

/// Deterministic rewrite used when the provider is down.
pub fn apply_rule_transforms(
    content: &str,
    target_model: &str,
    metrics: &ContentMetrics,
) -> String {
    let mut result = if metrics.sentence_count > 3 && !metrics.has_structure {
        split_sentences(content)
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, s.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        content.to_string()
    };

    if ModelFamily::from_label(target_model) == ModelFamily::OpenAi
        && !result.to_lowercase().contains("system:")
    {
        result = format!("System: You are a precise assistant.\n\n{result}");
    }

    result
}

fn improvement(before: &ContentMetrics, after: &ContentMetrics) -> f64 {
    let structure_delta = match (before.has_structure, after.has_structure) {
        (false, true) => 1.0,
        (true, false) => -1.0,
        _ => 0.0,
    };
    let deltas = [
        after.clarity_score - before.clarity_score,
        after.specificity_score - before.specificity_score,
        structure_delta,
        after.model_compatibility - before.model_compatibility,
    ];
    let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
    round2(mean.clamp(0.0, 1.0))
}

fn split_sentences(content: &str) -> Vec<String> {
    content
        .split(|c| matches!(c, '.' | '!' | '?'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

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

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, ProviderError> {
            Ok("1. Do the thing\n2. Check the thing\n\nSystem: checked".to_string())
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![0.0; 8])
        }
    }

    const PROSE: &str = "Write a summary of the document. Keep it short. Focus on the key \
                         decisions that were made. Mention open questions at the end. Avoid \
                         speculation about things not in the document.";

    #[test]
    fn test_analyze_counts() {
        let metrics = analyze_content(PROSE, "openai");
        assert_eq!(metrics.sentence_count, 5);
        assert!(!metrics.has_structure);
        assert!(metrics.clarity_score > 0.8); // short sentences

        let structured = analyze_content("# Title\n\n1. One\n2. Two", "openai");
        assert!(structured.has_structure);
    }

    #[test]
    fn test_opportunities_ordered() {
        let metrics = analyze_content(PROSE, "claude");
        let opportunities = improvement_opportunities(&metrics, PROSE, "claude");

        // Prose with >3 sentences and no structure leads with the list
        // conversion
        assert!(opportunities[0].contains("numbered list"));
        assert!(opportunities.iter().any(|o| o.contains("claude")));
    }

    #[test]
    fn test_rule_transform_numbers_prose() {
        let metrics = analyze_content(PROSE, "claude");
        let rewritten = apply_rule_transforms(PROSE, "claude", &metrics);

        assert!(rewritten.starts_with("1. "));
        assert!(rewritten.contains("\n5. "));
    }

    #[test]
    fn test_rule_transform_prepends_openai_preamble() {
        let metrics = analyze_content("Short text", "gpt-4");
        let rewritten = apply_rule_transforms("Short text", "gpt-4", &metrics);
        assert!(rewritten.starts_with("System: "));
    }

    #[tokio::test]
    async fn test_fallback_sets_flag_and_improves() {
        let optimizer = Optimizer::new(DownProvider);
        let result = optimizer.optimize(PROSE, "openai").await;

        assert!(result.fallback);
        assert!(result.metrics.after.has_structure);
        assert!(result.improvement_score > 0.0);
        assert!(!result.suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_llm_rewrite_used_when_available() {
        let optimizer = Optimizer::new(EchoProvider);
        let result = optimizer.optimize(PROSE, "openai").await;

        assert!(!result.fallback);
        assert!(result.optimized_content.contains("1. Do the thing"));
    }

    #[test]
    fn test_improvement_score_clamped() {
        let before = analyze_content(PROSE, "openai");
        let after = analyze_content("1. One\n2. Two\n\nSystem: ok", "openai");
        let score = improvement(&before, &after);
        assert!((0.0..=1.0).contains(&score));
    }
}
