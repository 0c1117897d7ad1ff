//! Heuristic answer quality scoring

use super::citation::extract_markers;
use crate::rag::extract_key_terms;
use serde::{Deserialize, Serialize};

const LOW_INFORMATION_PATTERNS: &[&str] = &[
    "i don't know",
    "i do not know",
    "cannot answer",
    "can't answer",
    "unable to answer",
    "no information",
    "not sure",
    "unable to determine",
    "cannot determine",
];

/// Answers with at least this many words count as elaborated
const ELABORATION_WORDS: usize = 25;

const SHORT_PENALTY: f32 = 0.3;
const LONG_PENALTY: f32 = 0.1;
const LOW_INFORMATION_PENALTY: f32 = 0.4;
const OFF_TOPIC_PENALTY: f32 = 0.2;
const UNCITED_PENALTY: f32 = 0.1;
const VALID_ABOVE: f32 = 0.3;

/// Outcome of validating an answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityReport {
    /// 0 (useless) to 1 (no issues found)
    pub score: f32,
    pub issues: Vec<String>,
    pub is_valid: bool,
}

impl QualityReport {
    /// Report for an answer that could not be generated
    pub fn unavailable() -> Self {
        Self {
            score: 0.0,
            issues: vec!["generation unavailable".to_string()],
            is_valid: false,
        }
    }
}

/// Scores answers; never rejects them
#[derive(Debug, Clone)]
pub struct AnswerQualityValidator {
    min_chars: usize,
    max_chars: usize,
}

impl Default for AnswerQualityValidator {
    fn default() -> Self {
        Self::new(10, 5000)
    }
}

impl AnswerQualityValidator {
    pub fn new(min_chars: usize, max_chars: usize) -> Self {
        Self { min_chars, max_chars }
    }

    /// Score `answer`; `context_len` is the number of fragments placed in the prompt
    ///
    /// Only markers naming one of those fragments count as citations.
    pub fn validate(&self, answer: &str, question: &str, context_len: usize) -> QualityReport {
        let mut score = 1.0_f32;
        let mut issues = Vec::new();
        let length = answer.chars().count();

        if length < self.min_chars {
            issues.push("answer too short".to_string());
            score -= SHORT_PENALTY;
        }
        if length > self.max_chars {
            issues.push("answer too long".to_string());
            score -= LONG_PENALTY;
        }

        let lowered = answer.to_lowercase();
        let low_information = LOW_INFORMATION_PATTERNS.iter().any(|p| lowered.contains(p));
        if low_information && answer.split_whitespace().count() < ELABORATION_WORDS {
            issues.push("answer may be low quality".to_string());
            score -= LOW_INFORMATION_PENALTY;
        }

        let terms = extract_key_terms(question);
        if terms.len() >= 2 {
            let present = terms.iter().filter(|t| lowered.contains(t.as_str())).count();
            if present < 2 {
                issues.push("answer may not address the question".to_string());
                score -= OFF_TOPIC_PENALTY;
            }
        }

        if context_len > 0 && extract_markers(answer, context_len).is_empty() {
            issues.push("answer cites no sources".to_string());
            score -= UNCITED_PENALTY;
        }

        let score = score.clamp(0.0, 1.0);
        QualityReport {
            score,
            issues,
            is_valid: score > VALID_ABOVE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_good_answer_scores_full() {
        let report = AnswerQualityValidator::default().validate(
            "The refund policy allows returns within 30 days of purchase [1].",
            "What is the refund policy?",
            1,
        );
        assert_eq!(report.score, 1.0);
        assert!(report.issues.is_empty());
        assert!(report.is_valid);
    }

    #[test]
    fn test_low_information_answer_is_invalid() {
        let report = AnswerQualityValidator::default().validate("Not sure.", "What is the refund policy?", 1);

        // short, low information, off topic and uncited
        assert_eq!(report.issues.len(), 4);
        assert!(report.score < 1e-5);
        assert!(!report.is_valid);
    }

    #[test]
    fn test_elaborated_hedge_is_not_penalized() {
        let answer = format!(
            "I'm not sure the refund policy covers gift cards, but the policy states {} [1].",
            "that purchases can be returned within thirty days when the receipt is presented at any store ".repeat(2)
        );
        let report = AnswerQualityValidator::default().validate(&answer, "refund policy gift cards", 1);
        assert!(!report.issues.iter().any(|i| i.contains("low quality")));
    }

    #[test]
    fn test_penalties_accumulate() {
        let report = AnswerQualityValidator::default().validate("no", "refund policy window", 1);
        assert_eq!(report.issues.len(), 3);
        assert!((report.score - 0.4).abs() < 1e-5);
        assert!(report.is_valid);
    }

    #[test]
    fn test_too_long() {
        let report = AnswerQualityValidator::new(10, 20).validate("refund policy text that is too long [1]", "refund policy", 1);
        assert_eq!(report.issues, vec!["answer too long".to_string()]);
        assert!((report.score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_out_of_range_marker_is_uncited() {
        let validator = AnswerQualityValidator::default();
        let answer = "The refund policy allows returns within 30 days of purchase [9].";

        let report = validator.validate(answer, "What is the refund policy?", 2);
        assert_eq!(report.issues, vec!["answer cites no sources".to_string()]);

        let without_context = validator.validate(answer, "What is the refund policy?", 0);
        assert!(without_context.issues.is_empty());
    }
}
