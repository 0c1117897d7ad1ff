//! Query analysis: key terms, query type, intent and related queries

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("valid word regex"));

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is", "are", "was",
    "were", "be", "been", "have", "has", "had", "do", "does", "did", "will", "would", "could", "should", "what",
    "how", "why", "when", "where", "who", "which", "whose", "between", "this", "that", "can", "from", "about",
];

const MAX_KEY_TERMS: usize = 10;
const MAX_RELATED: usize = 5;

/// Broad category of a query
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Factual,
    Procedural,
    Conceptual,
    Question,
    General,
}

/// What the caller most likely wants
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    InformationSeeking,
    InstructionSeeking,
    ExplanationSeeking,
    General,
}

/// Result of analyzing a query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryAnalysis {
    pub original_query: String,
    pub processed_query: String,
    pub query_type: QueryType,
    pub intent: QueryIntent,
    pub key_terms: Vec<String>,
    pub confidence: f32,
    pub related_queries: Vec<String>,
}

/// Lower-cased content words longer than two characters, de-duplicated, at most ten
pub fn extract_key_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    WORD.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .take(MAX_KEY_TERMS)
        .collect()
}

/// Stateless query analyzer
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryAnalyzer;

impl QueryAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        let processed = super::models::normalize_text(&query.to_lowercase());
        let query_type = classify(&processed);
        let key_terms = extract_key_terms(&processed);

        let mut confidence = 0.5 + (0.1 * key_terms.len() as f32).min(0.3);
        if query_type != QueryType::General {
            confidence += 0.2;
        }

        QueryAnalysis {
            original_query: query.to_string(),
            related_queries: related_queries(query_type, &key_terms),
            intent: intent_for(query_type),
            processed_query: processed,
            query_type,
            key_terms,
            confidence: confidence.min(1.0),
        }
    }

    /// Related queries for autocomplete; inputs shorter than three characters yield nothing
    pub fn suggestions(&self, partial: &str) -> Vec<String> {
        if partial.trim().chars().count() < 3 {
            return Vec::new();
        }
        self.analyze(partial).related_queries
    }
}

fn classify(processed: &str) -> QueryType {
    let words: Vec<&str> = processed
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has_any = |candidates: &[&str]| words.iter().any(|w| candidates.contains(w));

    if has_any(&["what", "who", "when", "where", "which"]) {
        QueryType::Factual
    } else if has_any(&["how", "steps", "process", "guide"]) {
        QueryType::Procedural
    } else if has_any(&["why", "explain", "concept", "meaning"]) {
        QueryType::Conceptual
    } else if processed.trim_end().ends_with('?') {
        QueryType::Question
    } else {
        QueryType::General
    }
}

fn intent_for(query_type: QueryType) -> QueryIntent {
    match query_type {
        QueryType::Factual | QueryType::Question => QueryIntent::InformationSeeking,
        QueryType::Procedural => QueryIntent::InstructionSeeking,
        QueryType::Conceptual => QueryIntent::ExplanationSeeking,
        QueryType::General => QueryIntent::General,
    }
}

fn related_queries(query_type: QueryType, terms: &[String]) -> Vec<String> {
    let mut related = Vec::new();

    if let [a, b, ..] = terms {
        related.push(format!("{} and {}", a, b));
        related.push(format!("difference between {} and {}", a, b));
    }

    for term in terms.iter().take(2) {
        match query_type {
            QueryType::Factual => {
                related.push(format!("how to use {}", term));
                related.push(format!("examples of {}", term));
            }
            QueryType::Procedural => {
                related.push(format!("what is {}", term));
                related.push(format!("benefits of {}", term));
            }
            QueryType::Conceptual => related.push(format!("how does {} work", term)),
            QueryType::Question | QueryType::General => {}
        }
    }

    related.truncate(MAX_RELATED);
    related
}
