//! Pairwise deduplication.
//!
//! Three similarity signals feed a greedy grouping pass:
//! 1. exact — identical normalized content
//! 2. structural — fingerprint overlap plus length closeness
//! 3. semantic — LLM judgment with a Jaccard fallback
//!
//! Groups pick a canonical by content length ratio, then name length, then
//! input order.

use crate::classify::round2;
use crate::error::ProviderError;
use crate::provider::{CompletionOptions, LlmProvider, ModelFamily};
use domain_jobs::DedupItem;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::warn;

static NUMBERED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*\d+\.\s").expect("numbered regex"));
static BULLET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*[-*+]\s").expect("bullet regex"));
static HEADER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s").expect("header regex"));
static VARIABLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*[\w.-]+\s*\}\}").expect("variable regex"));
static CODE_BLOCK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```").expect("code regex"));
static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]+\]\([^)]+\)").expect("link regex"));
static TABLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\|.+\|\s*$").expect("table regex"));

/// Kind of similarity signal that produced a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityKind {
    Exact,
    Structural,
    Semantic,
}

/// One scored pair of items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityRecord {
    pub id1: String,
    pub id2: String,
    pub score: f64,
    pub kind: SimilarityKind,
    pub confidence: f64,
}

/// One group of duplicates with its chosen canonical.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub canonical_id: String,
    pub duplicate_ids: Vec<String>,
    /// Score of the pair that seeded the group.
    pub similarity: f64,
}

/// Full outcome of a deduplication run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeduplicationOutcome {
    pub groups: Vec<DuplicateGroup>,
    pub similarities: Vec<SimilarityRecord>,
    /// True when the semantic signal ran on the Jaccard fallback.
    pub fallback: bool,
}

pub struct Deduplicator<P: LlmProvider> {
    provider: P,
}

impl<P: LlmProvider> Deduplicator<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Run all three signals over the items and group the results.
    pub async fn deduplicate(
        &self,
        items: &[DedupItem],
        threshold: f64,
    ) -> DeduplicationOutcome {
        let mut similarities = Vec::new();
        let mut seen_pairs: HashSet<(String, String)> = HashSet::new();

        // 1. exact: bucket by normalized content
        let mut buckets: HashMap<String, Vec<&DedupItem>> = HashMap::new();
        for item in items {
            buckets
                .entry(normalize_content(&item.content))
                .or_default()
                .push(item);
        }
        for bucket in buckets.values().filter(|b| b.len() >= 2) {
            for i in 0..bucket.len() {
                for j in (i + 1)..bucket.len() {
                    seen_pairs.insert(pair_key(&bucket[i].id, &bucket[j].id));
                    similarities.push(SimilarityRecord {
                        id1: bucket[i].id.clone(),
                        id2: bucket[j].id.clone(),
                        score: 1.0,
                        kind: SimilarityKind::Exact,
                        confidence: 1.0,
                    });
                }
            }
        }

        // 2. structural: fingerprint overlap for every remaining pair
        for i in 0..items.len() {
            for j in (i + 1)..items.len() {
                if seen_pairs.contains(&pair_key(&items[i].id, &items[j].id)) {
                    continue;
                }
                let score = structural_similarity(&items[i].content, &items[j].content);
                if score > 0.7 {
                    seen_pairs.insert(pair_key(&items[i].id, &items[j].id));
                    similarities.push(SimilarityRecord {
                        id1: items[i].id.clone(),
                        id2: items[j].id.clone(),
                        score: round2(score),
                        kind: SimilarityKind::Structural,
                        confidence: 0.8,
                    });
                }
            }
        }

        // 3. semantic: LLM judgment for pairs not already matched
        let mut fallback = false;
        for i in 0..items.len() {
            for j in (i + 1)..items.len() {
                if seen_pairs.contains(&pair_key(&items[i].id, &items[j].id)) {
                    continue;
                }
                let (score, used_fallback) = self
                    .semantic_similarity(&items[i].content, &items[j].content)
                    .await;
                fallback |= used_fallback;
                if score > threshold {
                    similarities.push(SimilarityRecord {
                        id1: items[i].id.clone(),
                        id2: items[j].id.clone(),
                        score: round2(score),
                        kind: SimilarityKind::Semantic,
                        confidence: 0.7,
                    });
                }
            }
        }

        let groups = group_duplicates(items, &similarities);

        DeduplicationOutcome {
            groups,
            similarities,
            fallback,
        }
    }

    /// 0.0-1.0 semantic similarity; the bool reports whether the Jaccard
    /// fallback was used.
    async fn semantic_similarity(&self, a: &str, b: &str) -> (f64, bool) {
        let head_a: String = a.chars().take(500).collect();
        let head_b: String = b.chars().take(500).collect();
        let prompt = format!(
            "Rate the semantic similarity of these two texts from 0.0 to 1.0. \
             Respond with just the number.\n\nText A:\n{head_a}\n\nText B:\n{head_b}"
        );

        match self
            .provider
            .complete(&prompt, &CompletionOptions::for_model(ModelFamily::OpenAi))
            .await
            .and_then(parse_score)
        {
            Ok(score) => (score, false),
            Err(e) => {
                warn!(error = %e, "Semantic similarity fell back to Jaccard");
                (jaccard_similarity(a, b), true)
            }
        }
    }
}

fn parse_score(response: String) -> Result<f64, ProviderError> {
    response
        .trim()
        .split_whitespace()
        .find_map(|token| token.trim_matches(|c: char| !c.is_ascii_digit() && c != '.').parse::<f64>().ok())
        .filter(|s| (0.0..=1.0).contains(s))
        .ok_or_else(|| ProviderError::InvalidResponse(format!("no score in '{response}'")))
}

/// Lowercase, collapse whitespace, strip punctuation.
pub fn normalize_content(content: &str) -> String {
    let lowered = content.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Structure fingerprint: the set of layout markers present.
pub fn structure_fingerprint(content: &str) -> BTreeSet<&'static str> {
    let mut markers = BTreeSet::new();
    if NUMBERED_RE.is_match(content) {
        markers.insert("numbered_list");
    }
    if BULLET_RE.is_match(content) {
        markers.insert("bullet_list");
    }
    if HEADER_RE.is_match(content) {
        markers.insert("headers");
    }
    if VARIABLE_RE.is_match(content) {
        markers.insert("variables");
    }
    if CODE_BLOCK_RE.is_match(content) {
        markers.insert("code_blocks");
    }
    if LINK_RE.is_match(content) {
        markers.insert("links");
    }
    if TABLE_RE.is_match(content) {
        markers.insert("tables");
    }
    markers
}

/// 0.7·marker overlap + 0.3·length closeness.
pub fn structural_similarity(a: &str, b: &str) -> f64 {
    let fp_a = structure_fingerprint(a);
    let fp_b = structure_fingerprint(b);

    let marker_part = if fp_a.is_empty() && fp_b.is_empty() {
        0.0
    } else {
        let intersection = fp_a.intersection(&fp_b).count() as f64;
        intersection / fp_a.len().max(fp_b.len()) as f64
    };

    let len_a = a.chars().count() as f64;
    let len_b = b.chars().count() as f64;
    let length_part = if len_a.max(len_b) == 0.0 {
        1.0
    } else {
        1.0 - (len_a - len_b).abs() / len_a.max(len_b)
    };

    0.7 * marker_part + 0.3 * length_part
}

/// Jaccard similarity over tokenized word sets.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = normalize_content(a)
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let set_b: HashSet<String> = normalize_content(b)
        .split_whitespace()
        .map(str::to_string)
        .collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Greedy grouping over similarities sorted by score descending.
fn group_duplicates(items: &[DedupItem], similarities: &[SimilarityRecord]) -> Vec<DuplicateGroup> {
    let by_id: HashMap<&str, &DedupItem> =
        items.iter().map(|item| (item.id.as_str(), item)).collect();
    let order: HashMap<&str, usize> = items
        .iter()
        .enumerate()
        .map(|(index, item)| (item.id.as_str(), index))
        .collect();

    let mut sorted: Vec<&SimilarityRecord> = similarities.iter().collect();
    sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut groups: Vec<DuplicateGroup> = Vec::new();
    let mut grouped: HashMap<String, usize> = HashMap::new();

    for record in sorted {
        let in_a = grouped.get(&record.id1).copied();
        let in_b = grouped.get(&record.id2).copied();

        match (in_a, in_b) {
            (None, None) => {
                let (Some(a), Some(b)) = (by_id.get(record.id1.as_str()), by_id.get(record.id2.as_str()))
                else {
                    continue;
                };
                let canonical = choose_canonical(a, b, &order);
                let duplicate = if canonical == record.id1 {
                    record.id2.clone()
                } else {
                    record.id1.clone()
                };
                let index = groups.len();
                groups.push(DuplicateGroup {
                    canonical_id: canonical.clone(),
                    duplicate_ids: vec![duplicate.clone()],
                    similarity: record.score,
                });
                grouped.insert(canonical, index);
                grouped.insert(duplicate, index);
            }
            (Some(index), None) => {
                groups[index].duplicate_ids.push(record.id2.clone());
                grouped.insert(record.id2.clone(), index);
            }
            (None, Some(index)) => {
                groups[index].duplicate_ids.push(record.id1.clone());
                grouped.insert(record.id1.clone(), index);
            }
            (Some(_), Some(_)) => {} // both settled already
        }
    }

    groups
}

/// Content length ratio ≥ 1.2 wins; else longer name; else input order.
fn choose_canonical(a: &DedupItem, b: &DedupItem, order: &HashMap<&str, usize>) -> String {
    let len_a = a.content.chars().count() as f64;
    let len_b = b.content.chars().count() as f64;

    if len_b > 0.0 && len_a / len_b.max(1.0) >= 1.2 {
        return a.id.clone();
    }
    if len_a > 0.0 && len_b / len_a.max(1.0) >= 1.2 {
        return b.id.clone();
    }

    let name_a = a.name.chars().count();
    let name_b = b.name.chars().count();
    if name_a > name_b {
        return a.id.clone();
    }
    if name_b > name_a {
        return b.id.clone();
    }

    let order_a = order.get(a.id.as_str()).copied().unwrap_or(usize::MAX);
    let order_b = order.get(b.id.as_str()).copied().unwrap_or(usize::MAX);
    if order_a <= order_b {
        a.id.clone()
    } else {
        b.id.clone()
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
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

    fn item(id: &str, name: &str, content: &str) -> DedupItem {
        DedupItem {
            id: id.to_string(),
            name: name.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_content("HELLO   world!!"), "hello world");
        assert_eq!(normalize_content("Hello, World."), "hello world");
        assert_eq!(normalize_content("  hello\n\tworld  "), "hello world");
    }

    #[test]
    fn test_normalized_equality_is_equivalence() {
        let contents = ["hello world", "HELLO world!!", "Hello, World", "other thing"];
        // reflexive
        for c in contents {
            assert_eq!(normalize_content(c), normalize_content(c));
        }
        // symmetric + transitive within the equal bucket
        let a = normalize_content(contents[0]);
        let b = normalize_content(contents[1]);
        let c = normalize_content(contents[2]);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a, c);
        assert_ne!(a, normalize_content(contents[3]));
    }

    #[test]
    fn test_structure_fingerprint() {
        let content = "# Head\n1. step\n- bullet\n```code```\n[x](http://y)\n|a|b|\n{{var}}";
        let fp = structure_fingerprint(content);
        assert_eq!(fp.len(), 7);
    }

    #[test]
    fn test_structural_similarity_formula() {
        let a = "1. one\n2. two\n# header";
        let b = "1. uno\n2. dos\n# cabecera";
        let score = structural_similarity(a, b);
        // identical fingerprints and near-equal lengths push past 0.9
        assert!(score > 0.9, "score {score}");

        let unrelated = structural_similarity("plain text", "1. list\n# header");
        assert!(unrelated < 0.7, "score {unrelated}");
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard_similarity("a b c", "a b c"), 1.0);
        assert_eq!(jaccard_similarity("a b", "c d"), 0.0);
        let half = jaccard_similarity("a b c d", "a b e f");
        assert!((half - 2.0 / 6.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_exact_duplicates_collapse_into_one_group() {
        let dedup = Deduplicator::new(DownProvider);
        let items = vec![
            item("a", "first", "hello world"),
            item("b", "second", "hello world"),
            item("c", "third", "HELLO world!!"),
        ];

        let outcome = dedup.deduplicate(&items, 0.8).await;

        // All three normalize to the same bucket: one group, two duplicates
        assert_eq!(outcome.groups.len(), 1);
        let group = &outcome.groups[0];
        assert_eq!(group.duplicate_ids.len(), 2);

        let exact_pairs = outcome
            .similarities
            .iter()
            .filter(|s| s.kind == SimilarityKind::Exact)
            .count();
        assert_eq!(exact_pairs, 3);

        // Canonical choice: lengths 11 vs 13 stay under the 1.2 ratio, so
        // the longer name wins
        assert_eq!(group.canonical_id, "b");
    }

    #[tokio::test]
    async fn test_canonical_prefers_much_longer_content() {
        let dedup = Deduplicator::new(DownProvider);
        let long = "explain the concept in detail with examples and context";
        let short = "explain the concept in detail with examples";
        let items = vec![item("short", "nm", short), item("long", "nm", long)];

        let outcome = dedup.deduplicate(&items, 0.3).await;
        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(outcome.groups[0].canonical_id, "long");
        assert!(outcome.fallback, "provider is down, Jaccard must be used");
    }

    #[tokio::test]
    async fn test_unrelated_items_stay_ungrouped() {
        let dedup = Deduplicator::new(DownProvider);
        let items = vec![
            item("a", "a", "completely different text about cats"),
            item("b", "b", "# structured\n1. list\n2. items"),
        ];

        let outcome = dedup.deduplicate(&items, 0.8).await;
        assert!(outcome.groups.is_empty());
    }

    #[tokio::test]
    async fn test_one_endpoint_grouped_joins_existing_group() {
        let dedup = Deduplicator::new(DownProvider);
        let items = vec![
            item("a", "aaa", "alpha beta gamma delta"),
            item("b", "bb", "alpha beta gamma delta"),
            item("c", "c", "alpha beta gamma delta epsilon zeta"),
        ];

        let outcome = dedup.deduplicate(&items, 0.5).await;
        assert_eq!(outcome.groups.len(), 1);
        let group = &outcome.groups[0];
        assert_eq!(group.duplicate_ids.len(), 2);
        // a and b tie on content; longer name wins the seed pair
        assert_eq!(group.canonical_id, "a");
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("0.85".to_string()).unwrap(), 0.85);
        assert_eq!(parse_score("Score: 0.4".to_string()).unwrap(), 0.4);
        assert!(parse_score("none".to_string()).is_err());
        assert!(parse_score("5.0".to_string()).is_err());
    }
}
