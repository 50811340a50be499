//! Content quality assessment.
//!
//! Produces five sub-scores (clarity, completeness, specificity, consistency,
//! usability), an issue list with severities, suggestions, and a
//! recommendation block with an effort estimate. All scores live in [0, 1]
//! and are rounded to two decimals; the overall score is the arithmetic mean.

use crate::classify::round2;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

static HEADER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s+\S").expect("header regex"));
static BULLET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*[-*]\s+\S").expect("bullet regex"));
static NUMBERED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*\d+[.)]\s+\S").expect("numbered regex"));
static CODE_FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```").expect("fence regex"));
static VARIABLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*[\w.-]+\s*\}\}").expect("variable regex"));
static TITLE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[A-Z][^\n]{0,60}:\s*$").expect("title line regex"));
static INSTRUCTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:\d+[.)]\s*)?(?:please\s+)?(write|create|generate|analyze|summarize|explain|list|describe|answer|translate|review|read|extract|classify|convert|do|make|find)\b")
        .expect("instruction regex")
});
static EXAMPLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(example|e\.g\.|for instance)").expect("example regex"));
static CONSTRAINT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(must|never|always|only|require|do not|don't)\b").expect("constraint regex"));
static ERROR_HANDLING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(if .* fail|error|otherwise|in case|fallback)\b").expect("error regex"));
static VALIDATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(valid|verify|check|ensure|confirm)\b").expect("validation regex"));
static REUSABILITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(template|placeholder|parameter|customize|reusable)\b").expect("reuse regex"));
static SYSTEM_USER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*(system|user|assistant)\s*:").expect("role regex"));
static PERSONA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(you are|act as|persona|your role)").expect("persona regex"));

const JARGON_WORDS: [&str; 14] = [
    "api", "endpoint", "schema", "token", "embedding", "vector", "llm", "prompt", "parameter",
    "config", "middleware", "async", "runtime", "payload",
];

/// Issue severity, ordered by weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn weight(&self) -> u32 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}

/// One identified quality issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityIssue {
    pub severity: Severity,
    pub category: String,
    pub description: String,
    pub suggestion: String,
}

/// Recommendation block summarizing the assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    /// excellent | good | fair | poor
    pub overall: String,
    /// low | medium | high
    pub priority: String,
    pub action_items: Vec<String>,
    /// low (weights ≤ 3) | medium (≤ 8) | high
    pub estimated_effort: String,
}

/// Completeness boolean checks, surfaced in the result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletenessChecks {
    pub has_title: bool,
    pub has_description: bool,
    pub has_examples: bool,
    pub has_instructions: bool,
    pub has_constraints: bool,
    pub has_placeholders: bool,
    /// Type-specific check (prompt role markers, agent persona, template
    /// placeholders); None for types with no extra check.
    pub type_check: Option<bool>,
}

/// Readability metrics surfaced alongside the scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadabilitySummary {
    /// Simplified Flesch reading ease, clamped to [0, 100].
    pub flesch: f64,
    /// very_easy | easy | fairly_easy | standard | fairly_difficult |
    /// difficult | very_difficult
    pub level: String,
    pub avg_sentence_length: f64,
    pub avg_word_length: f64,
    pub complex_words: usize,
    /// low | medium | high, by density of domain vocabulary.
    pub jargon_level: String,
}

/// Full quality assessment for one piece of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityAssessment {
    pub clarity: f64,
    pub completeness: f64,
    pub specificity: f64,
    pub consistency: f64,
    pub usability: f64,
    /// Arithmetic mean of the five sub-scores.
    pub overall: f64,
    pub completeness_checks: CompletenessChecks,
    pub readability: ReadabilitySummary,
    pub issues: Vec<QualityIssue>,
    pub suggestions: Vec<String>,
    pub recommendation: Recommendation,
}

/// Assess content of a given item type ("prompt", "agent", "template", ...).
pub fn assess(content: &str, item_type: &str, _format: &str) -> QualityAssessment {
    let structure = analyze_structure(content);
    let readability = analyze_readability(content);
    let (completeness, checks) = completeness_score(content, item_type);
    let (consistency, consistency_issues) = consistency_score(content);
    let usability = usability_score(content, &structure);
    let clarity = clarity_score(&readability, &structure);
    let specificity = specificity_score(content);

    let mut issues = Vec::new();

    if readability.flesch < 30.0 {
        issues.push(QualityIssue {
            severity: Severity::High,
            category: "Readability".to_string(),
            description: format!("Flesch score {:.0} is very difficult", readability.flesch),
            suggestion: "Use shorter sentences and simpler words".to_string(),
        });
    }
    if readability.avg_sentence_len > 25.0 {
        issues.push(QualityIssue {
            severity: Severity::Medium,
            category: "Readability".to_string(),
            description: format!(
                "Average sentence length {:.0} words is hard to follow",
                readability.avg_sentence_len
            ),
            suggestion: "Split long sentences".to_string(),
        });
    }
    if completeness < 0.6 {
        issues.push(QualityIssue {
            severity: Severity::High,
            category: "Completeness".to_string(),
            description: "Content is missing expected sections".to_string(),
            suggestion: "Add a title, instructions, examples, and constraints".to_string(),
        });
    }
    if !structure.indentation_consistent {
        issues.push(QualityIssue {
            severity: Severity::Medium,
            category: "Structure".to_string(),
            description: "Indentation mixes widths".to_string(),
            suggestion: "Indent with a consistent multiple of 2 or 4 spaces".to_string(),
        });
    }
    if structure.avg_line_len > 120.0 {
        issues.push(QualityIssue {
            severity: Severity::Low,
            category: "Structure".to_string(),
            description: "Lines average over 120 characters".to_string(),
            suggestion: "Wrap long lines".to_string(),
        });
    }
    for issue in &consistency_issues {
        issues.push(QualityIssue {
            severity: Severity::Medium,
            category: "Consistency".to_string(),
            description: issue.clone(),
            suggestion: "Pick one style and apply it throughout".to_string(),
        });
    }

    let suggestions: Vec<String> = issues.iter().map(|i| i.suggestion.clone()).collect();

    let overall = round2((clarity + completeness + specificity + consistency + usability) / 5.0);
    let recommendation = recommend(overall, &issues);

    QualityAssessment {
        clarity,
        completeness,
        specificity,
        consistency,
        usability,
        overall,
        completeness_checks: checks,
        readability: ReadabilitySummary {
            flesch: round2(readability.flesch),
            level: readability.level.to_string(),
            avg_sentence_length: round2(readability.avg_sentence_len),
            avg_word_length: round2(readability.avg_word_len),
            complex_words: readability.complex_words,
            jargon_level: readability.jargon_level.to_string(),
        },
        issues,
        suggestions,
        recommendation,
    }
}

struct StructureAnalysis {
    line_count: usize,
    has_headers: bool,
    has_bullets: bool,
    has_numbers: bool,
    has_code_fences: bool,
    has_variables: bool,
    section_count: usize,
    indentation_consistent: bool,
    avg_line_len: f64,
}

fn analyze_structure(content: &str) -> StructureAnalysis {
    let lines: Vec<&str> = content.lines().collect();
    let non_blank: Vec<&str> = lines.iter().copied().filter(|l| !l.trim().is_empty()).collect();

    // Three regex families contribute sections: markdown headers, numbered
    // section starters, and colon-terminated title lines
    let section_count = HEADER_RE.find_iter(content).count()
        + NUMBERED_RE.find_iter(content).count()
        + TITLE_LINE_RE.find_iter(content).count();

    let indentation_consistent = non_blank.iter().all(|line| {
        let indent = line.len() - line.trim_start_matches(' ').len();
        indent % 2 == 0
    });

    let avg_line_len = if non_blank.is_empty() {
        0.0
    } else {
        non_blank.iter().map(|l| l.chars().count()).sum::<usize>() as f64 / non_blank.len() as f64
    };

    StructureAnalysis {
        line_count: lines.len(),
        has_headers: HEADER_RE.is_match(content),
        has_bullets: BULLET_RE.is_match(content),
        has_numbers: NUMBERED_RE.is_match(content),
        has_code_fences: CODE_FENCE_RE.is_match(content),
        has_variables: VARIABLE_RE.is_match(content),
        section_count,
        indentation_consistent,
        avg_line_len,
    }
}

struct ReadabilityAnalysis {
    avg_sentence_len: f64,
    avg_word_len: f64,
    flesch: f64,
    level: &'static str,
    complex_words: usize,
    jargon_level: &'static str,
}

fn analyze_readability(content: &str) -> ReadabilityAnalysis {
    let words: Vec<&str> = content.split_whitespace().collect();
    let sentence_count = content
        .split(|c| matches!(c, '.' | '!' | '?'))
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1);

    let avg_sentence_len = words.len() as f64 / sentence_count as f64;
    let avg_word_len = if words.is_empty() {
        0.0
    } else {
        words.iter().map(|w| w.chars().count()).sum::<usize>() as f64 / words.len() as f64
    };

    // Simplified Flesch with average word length standing in for syllables
    let flesch =
        (206.835 - 1.015 * avg_sentence_len - 84.6 * avg_word_len / 4.7).clamp(0.0, 100.0);

    let level = match flesch {
        f if f >= 90.0 => "very_easy",
        f if f >= 80.0 => "easy",
        f if f >= 70.0 => "fairly_easy",
        f if f >= 60.0 => "standard",
        f if f >= 50.0 => "fairly_difficult",
        f if f >= 30.0 => "difficult",
        _ => "very_difficult",
    };

    let complex_words = words
        .iter()
        .filter(|w| w.chars().count() > 6 && !w.chars().all(|c| c.is_numeric()) && !w.contains('.'))
        .count();

    let jargon_count = words
        .iter()
        .filter(|w| {
            let clean: String = w
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            JARGON_WORDS.contains(&clean.as_str())
        })
        .count();
    let jargon_ratio = if words.is_empty() {
        0.0
    } else {
        jargon_count as f64 / words.len() as f64
    };
    let jargon_level = if jargon_ratio < 0.02 {
        "low"
    } else if jargon_ratio < 0.05 {
        "medium"
    } else {
        "high"
    };

    ReadabilityAnalysis {
        avg_sentence_len,
        avg_word_len,
        flesch,
        level,
        complex_words,
        jargon_level,
    }
}

fn clarity_score(readability: &ReadabilityAnalysis, structure: &StructureAnalysis) -> f64 {
    let flesch_part = 0.5 * readability.flesch / 100.0;
    let sentence_part = if readability.avg_sentence_len <= 20.0 { 0.3 } else { 0.1 };
    let structured = structure.has_headers
        || structure.has_bullets
        || structure.has_numbers
        || structure.has_code_fences;
    let structure_part = if structured { 0.2 } else { 0.05 };
    round2((flesch_part + sentence_part + structure_part).clamp(0.0, 1.0))
}

fn specificity_score(content: &str) -> f64 {
    static SPECIFIC_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"(?i)(\d+%?|e\.g\.|for example|exactly|specific|"[^"]+"|\{\{\s*[\w.-]+\s*\}\})"#)
            .expect("specificity regex")
    });
    let matches = SPECIFIC_RE.find_iter(content).count();
    round2((0.2 + matches as f64 * 0.15).min(1.0))
}

fn completeness_score(content: &str, item_type: &str) -> (f64, CompletenessChecks) {
    let first_line = content.lines().next().unwrap_or("").trim();
    let has_title = HEADER_RE.is_match(first_line)
        || (!first_line.is_empty() && first_line.chars().count() <= 60 && content.lines().count() > 1);
    let body_len: usize = content
        .lines()
        .skip(1)
        .map(|l| l.chars().count())
        .sum();
    let has_description = body_len > 100 || content.split("\n\n").count() > 2;
    let has_examples = EXAMPLE_RE.is_match(content);
    let has_instructions = INSTRUCTION_RE.is_match(content);
    let has_constraints = CONSTRAINT_RE.is_match(content);
    let has_placeholders = VARIABLE_RE.is_match(content);

    let type_check = match item_type {
        "prompt" => Some(SYSTEM_USER_RE.is_match(content)),
        "agent" => Some(PERSONA_RE.is_match(content)),
        "template" => Some(has_placeholders),
        _ => None,
    };

    let mut passed = [
        has_title,
        has_description,
        has_examples,
        has_instructions,
        has_constraints,
        has_placeholders,
    ]
    .iter()
    .filter(|c| **c)
    .count();
    let mut total = 6;
    if let Some(check) = type_check {
        total += 1;
        if check {
            passed += 1;
        }
    }

    (
        round2(passed as f64 / total as f64),
        CompletenessChecks {
            has_title,
            has_description,
            has_examples,
            has_instructions,
            has_constraints,
            has_placeholders,
            type_check,
        },
    )
}

fn consistency_score(content: &str) -> (f64, Vec<String>) {
    let mut issues = Vec::new();

    let uses_dash = Regex::new(r"(?m)^\s*-\s+\S").map(|re| re.is_match(content)).unwrap_or(false);
    let uses_star = Regex::new(r"(?m)^\s*\*\s+\S").map(|re| re.is_match(content)).unwrap_or(false);
    if uses_dash && uses_star {
        issues.push("Bullet lists mix '-' and '*' markers".to_string());
    }

    // Header level jumps of more than one are non-monotonic
    let mut last_level = 0usize;
    for line in content.lines() {
        let level = line.chars().take_while(|c| *c == '#').count();
        if level > 0 && line.chars().nth(level).map(|c| c == ' ').unwrap_or(false) {
            if last_level > 0 && level > last_level + 1 {
                issues.push(format!(
                    "Header level jumps from h{last_level} to h{level}"
                ));
            }
            last_level = level;
        }
    }

    let mut styles: HashSet<&'static str> = HashSet::new();
    for capture in VARIABLE_RE.find_iter(content) {
        let inner = capture
            .as_str()
            .trim_start_matches('{')
            .trim_end_matches('}')
            .trim();
        if inner.contains('_') {
            styles.insert("snake");
        } else if inner.contains('-') {
            styles.insert("kebab");
        } else if inner.chars().any(|c| c.is_uppercase()) {
            styles.insert("camel");
        } else {
            styles.insert("lower");
        }
    }
    if styles.len() > 1 {
        issues.push("Variable names mix naming styles".to_string());
    }

    let score = (1.0 - 0.2 * issues.len() as f64).max(0.0);
    (round2(score), issues)
}

fn usability_score(content: &str, structure: &StructureAnalysis) -> f64 {
    let modular = structure.line_count > 1
        && structure.section_count > 1
        && content.chars().count() / structure.section_count.max(1) <= 500;
    let reusable = structure.has_variables || REUSABILITY_RE.is_match(content);

    let factors = [
        EXAMPLE_RE.is_match(content),
        INSTRUCTION_RE.is_match(content),
        ERROR_HANDLING_RE.is_match(content),
        VALIDATION_RE.is_match(content),
        modular,
        reusable,
    ];

    round2(factors.iter().filter(|f| **f).count() as f64 / factors.len() as f64)
}

fn recommend(overall: f64, issues: &[QualityIssue]) -> Recommendation {
    let label = if overall >= 0.8 {
        "excellent"
    } else if overall >= 0.6 {
        "good"
    } else if overall >= 0.4 {
        "fair"
    } else {
        "poor"
    };

    let priority = if issues
        .iter()
        .any(|i| matches!(i.severity, Severity::High | Severity::Critical))
    {
        "high"
    } else if issues.iter().any(|i| i.severity == Severity::Medium) {
        "medium"
    } else {
        "low"
    };

    let effort_weight: u32 = issues.iter().map(|i| i.severity.weight()).sum();
    let estimated_effort = if effort_weight <= 3 {
        "low"
    } else if effort_weight <= 8 {
        "medium"
    } else {
        "high"
    };

    Recommendation {
        overall: label.to_string(),
        priority: priority.to_string(),
        action_items: issues.iter().map(|i| i.suggestion.clone()).collect(),
        estimated_effort: estimated_effort.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = "# Title\n\nPlease do the following:\n1. Read {{input}}\n2. Summarize\n";

    #[test]
    fn test_well_formed_prompt_scores() {
        let assessment = assess(WELL_FORMED, "prompt", ".md");

        assert!(assessment.clarity > 0.4, "clarity {}", assessment.clarity);
        assert!(
            assessment.completeness > 0.4,
            "completeness {}",
            assessment.completeness
        );
        assert!(
            assessment.specificity > 0.4,
            "specificity {}",
            assessment.specificity
        );
        assert!(
            assessment.consistency > 0.4,
            "consistency {}",
            assessment.consistency
        );
        assert!(assessment.usability > 0.4, "usability {}", assessment.usability);
        assert!(assessment.overall > 0.5, "overall {}", assessment.overall);

        assert!(assessment.completeness_checks.has_title);
        assert!(assessment.completeness_checks.has_placeholders);
        assert_eq!(assessment.recommendation.estimated_effort, "low");
    }

    #[test]
    fn test_overall_is_mean_of_subscores() {
        let a = assess(WELL_FORMED, "prompt", ".md");
        let mean = (a.clarity + a.completeness + a.specificity + a.consistency + a.usability) / 5.0;
        assert!((a.overall - mean).abs() < 0.01);
    }

    #[test]
    fn test_scores_rounded_and_bounded() {
        let a = assess("word", "other", ".txt");
        for score in [a.clarity, a.completeness, a.specificity, a.consistency, a.usability] {
            assert!((0.0..=1.0).contains(&score));
            assert_eq!(score, (score * 100.0).round() / 100.0);
        }
    }

    #[test]
    fn test_long_sentences_flag_readability() {
        let rambling = "This sentence keeps going on and on and on without any break at all \
                        while adding clause after clause after clause until nobody can follow \
                        what the actual point of the whole construction was supposed to be";
        let a = assess(rambling, "other", ".txt");
        assert!(a
            .issues
            .iter()
            .any(|i| i.category == "Readability" && i.severity == Severity::Medium));
    }

    #[test]
    fn test_mixed_bullets_cost_consistency() {
        let mixed = "- one\n* two\n- three";
        let (score, issues) = consistency_score(mixed);
        assert_eq!(issues.len(), 1);
        assert!((score - 0.8).abs() < 0.001);
    }

    #[test]
    fn test_header_level_jump_detected() {
        let jumpy = "# Top\n### Deep\n";
        let (_, issues) = consistency_score(jumpy);
        assert!(issues.iter().any(|i| i.contains("h1") && i.contains("h3")));
    }

    #[test]
    fn test_mixed_variable_styles_detected() {
        let mixed = "Use {{user_name}} and {{userEmail}} here.";
        let (_, issues) = consistency_score(mixed);
        assert!(issues.iter().any(|i| i.contains("naming styles")));
    }

    #[test]
    fn test_inconsistent_indentation_flagged() {
        let content = "steps:\n  ok indent\n   odd indent\n";
        let a = assess(content, "other", ".txt");
        assert!(a
            .issues
            .iter()
            .any(|i| i.category == "Structure" && i.description.contains("Indentation")));
    }

    #[test]
    fn test_incomplete_content_raises_high_issue() {
        let a = assess("do", "other", ".txt");
        assert!(a
            .issues
            .iter()
            .any(|i| i.category == "Completeness" && i.severity == Severity::High));
        assert_eq!(a.recommendation.priority, "high");
    }

    #[test]
    fn test_effort_bands() {
        // Weights: high(3) alone stays low
        let one_high = vec![QualityIssue {
            severity: Severity::High,
            category: "X".to_string(),
            description: String::new(),
            suggestion: String::new(),
        }];
        assert_eq!(recommend(0.5, &one_high).estimated_effort, "low");

        // 3 + 3 + 2 = 8 stays medium; one more pushes high
        let mut many = Vec::new();
        for severity in [Severity::High, Severity::High, Severity::Medium] {
            many.push(QualityIssue {
                severity,
                category: "X".to_string(),
                description: String::new(),
                suggestion: String::new(),
            });
        }
        assert_eq!(recommend(0.5, &many).estimated_effort, "medium");

        many.push(QualityIssue {
            severity: Severity::Low,
            category: "X".to_string(),
            description: String::new(),
            suggestion: String::new(),
        });
        assert_eq!(recommend(0.5, &many).estimated_effort, "high");
    }

    #[test]
    fn test_jargon_levels() {
        let jargon_heavy = "api endpoint schema token payload config runtime";
        let readability = analyze_readability(jargon_heavy);
        assert_eq!(readability.jargon_level, "high");

        let plain = "Write a short story about a quiet afternoon in the park.";
        let readability = analyze_readability(plain);
        assert_eq!(readability.jargon_level, "low");
    }

    #[test]
    fn test_readability_levels_and_complex_words() {
        let readability = analyze_readability("Cat sat on mat. Dog ran far.");
        assert!(readability.flesch > 60.0);
        assert_eq!(readability.complex_words, 0);

        let readability = analyze_readability(
            "Multidimensional organizational considerations necessitate comprehensive \
             architectural deliberations.",
        );
        assert!(readability.complex_words >= 4);
        assert_eq!(readability.level, "very_difficult");
    }
}
