//! Pairwise similarity scoring.
//!
//! Three algorithms: syntactic (Jaccard over word sets), semantic (cosine
//! over provider embeddings, Jaccard fallback), and hybrid (weighted blend).

use crate::classify::round2;
use crate::dedupe::jaccard_similarity;
use crate::provider::LlmProvider;
use domain_jobs::SimilarityAlgorithm;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Result of one similarity scoring run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityScore {
    pub score: f64,
    pub algorithm: SimilarityAlgorithm,
    pub fallback: bool,
}

pub struct SimilarityScorer<P: LlmProvider> {
    provider: P,
}

impl<P: LlmProvider> SimilarityScorer<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub async fn score(
        &self,
        source: &str,
        target: &str,
        algorithm: SimilarityAlgorithm,
    ) -> SimilarityScore {
        match algorithm {
            SimilarityAlgorithm::Syntactic => SimilarityScore {
                score: round2(jaccard_similarity(source, target)),
                algorithm,
                fallback: false,
            },
            SimilarityAlgorithm::Semantic => {
                let (score, fallback) = self.semantic(source, target).await;
                SimilarityScore {
                    score: round2(score),
                    algorithm,
                    fallback,
                }
            }
            SimilarityAlgorithm::Hybrid => {
                let (semantic, fallback) = self.semantic(source, target).await;
                let syntactic = jaccard_similarity(source, target);
                SimilarityScore {
                    score: round2(0.6 * semantic + 0.4 * syntactic),
                    algorithm,
                    fallback,
                }
            }
        }
    }

    async fn semantic(&self, source: &str, target: &str) -> (f64, bool) {
        let embedded = tokio::try_join!(self.provider.embed(source), self.provider.embed(target));
        match embedded {
            Ok((a, b)) => (cosine_similarity(&a, &b).max(0.0), false),
            Err(e) => {
                warn!(error = %e, "Embedding failed, semantic similarity falls back to Jaccard");
                (jaccard_similarity(source, target), true)
            }
        }
    }
}

/// Cosine similarity of two vectors; 0.0 when either is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::CompletionOptions;
    use async_trait::async_trait;

    /// Embeds by letter histogram so related texts land close together.
    struct HistogramProvider;

    #[async_trait]
    impl LlmProvider for HistogramProvider {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, ProviderError> {
            Ok(String::new())
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            let mut histogram = vec![0.0f32; 26];
            for c in text.chars().filter(|c| c.is_ascii_alphabetic()) {
                let index = (c.to_ascii_lowercase() as u8 - b'a') as usize;
                histogram[index] += 1.0;
            }
            Ok(histogram)
        }
    }

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

    #[test]
    fn test_cosine_bounds() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[1.0, 1.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0], &[0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_syntactic_scoring() {
        let scorer = SimilarityScorer::new(DownProvider);
        let result = scorer
            .score("a b c d", "a b c d", SimilarityAlgorithm::Syntactic)
            .await;
        assert_eq!(result.score, 1.0);
        assert!(!result.fallback);
    }

    #[tokio::test]
    async fn test_semantic_uses_embeddings() {
        let scorer = SimilarityScorer::new(HistogramProvider);
        let same = scorer
            .score("hello world", "hello world", SimilarityAlgorithm::Semantic)
            .await;
        assert!(same.score > 0.99);
        assert!(!same.fallback);

        let different = scorer
            .score("aaaa", "zzzz", SimilarityAlgorithm::Semantic)
            .await;
        assert!(different.score < 0.01);
    }

    #[tokio::test]
    async fn test_semantic_fallback_to_jaccard() {
        let scorer = SimilarityScorer::new(DownProvider);
        let result = scorer
            .score("alpha beta", "alpha beta", SimilarityAlgorithm::Semantic)
            .await;
        assert_eq!(result.score, 1.0);
        assert!(result.fallback);
    }

    #[tokio::test]
    async fn test_hybrid_blends() {
        let scorer = SimilarityScorer::new(HistogramProvider);
        let result = scorer
            .score("abc def", "abc xyz", SimilarityAlgorithm::Hybrid)
            .await;
        assert!(result.score > 0.0 && result.score < 1.0);
        assert_eq!(result.algorithm, SimilarityAlgorithm::Hybrid);
    }
}
