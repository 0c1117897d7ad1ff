//! Input validation for API requests

use crate::rag::SearchFilters;
use tracing::{debug, warn};

/// Maximum question length in characters
pub const MAX_QUESTION_LENGTH: usize = 1000;

/// Maximum conversation title length in characters
pub const MAX_TITLE_LENGTH: usize = 200;

/// Maximum improvement feedback length in characters
pub const MAX_FEEDBACK_LENGTH: usize = 2000;

/// Maximum message length stored in a conversation
pub const MAX_MESSAGE_LENGTH: usize = 20_000;

/// Maximum page size for paginated listings
pub const MAX_PAGE_SIZE: usize = 100;

/// Input validator
pub struct InputValidator;

impl InputValidator {
    fn validate_text(field: &'static str, text: &str, max_length: usize) -> Result<(), ValidationError> {
        if text.trim().is_empty() {
            warn!(field, "Validation failed: empty text");
            return Err(ValidationError::EmptyInput { field });
        }

        let length = text.chars().count();
        if length > max_length {
            warn!(field, "Validation failed: text too long ({} > {})", length, max_length);
            return Err(ValidationError::TextTooLong {
                field,
                length,
                max_length,
            });
        }

        // Whitespace control characters (newline, tab) are allowed
        if text.chars().any(|c| c.is_control() && !c.is_whitespace()) {
            warn!(field, "Validation failed: contains control characters");
            return Err(ValidationError::InvalidCharacters { field });
        }

        Ok(())
    }

    /// Validate a search or answer question
    pub fn validate_question(question: &str) -> Result<(), ValidationError> {
        Self::validate_text("question", question, MAX_QUESTION_LENGTH)?;
        debug!("Question validation passed");
        Ok(())
    }

    /// Validate a conversation title
    pub fn validate_title(title: &str) -> Result<(), ValidationError> {
        Self::validate_text("title", title, MAX_TITLE_LENGTH)
    }

    /// Validate improvement feedback
    pub fn validate_feedback(feedback: &str) -> Result<(), ValidationError> {
        Self::validate_text("feedback", feedback, MAX_FEEDBACK_LENGTH)
    }

    /// Validate a stored conversation message
    pub fn validate_message(content: &str) -> Result<(), ValidationError> {
        Self::validate_text("content", content, MAX_MESSAGE_LENGTH)
    }

    /// Validate a result limit against the configured maximum
    pub fn validate_limit(limit: usize, max: usize) -> Result<(), ValidationError> {
        if limit == 0 || limit > max {
            warn!("Validation failed: limit {} outside 1..={}", limit, max);
            return Err(ValidationError::InvalidLimit { limit, max });
        }
        Ok(())
    }

    /// Validate an optional score threshold override
    pub fn validate_score_threshold(score: f32) -> Result<(), ValidationError> {
        if !(0.0..=1.0).contains(&score) {
            warn!("Validation failed: invalid score threshold ({})", score);
            return Err(ValidationError::InvalidScoreThreshold { score });
        }
        Ok(())
    }

    /// Validate search filter ranges
    pub fn validate_filters(filters: &SearchFilters) -> Result<(), ValidationError> {
        if let Some(range) = &filters.date_range {
            if let (Some(start), Some(end)) = (range.start, range.end) {
                if start > end {
                    warn!("Validation failed: date range start after end");
                    return Err(ValidationError::InvalidRange { field: "date_range" });
                }
            }
        }

        if let Some(range) = &filters.file_size {
            if let (Some(min), Some(max)) = (range.min, range.max) {
                if min > max {
                    warn!("Validation failed: file size min above max");
                    return Err(ValidationError::InvalidRange { field: "file_size" });
                }
            }
        }

        if filters.document_types.iter().any(|t| t.trim().is_empty()) {
            return Err(ValidationError::EmptyInput { field: "document_types" });
        }

        Ok(())
    }

    /// Validate a conversation message role
    pub fn validate_role(role: &str) -> Result<(), ValidationError> {
        match role {
            "user" | "assistant" => Ok(()),
            other => {
                warn!("Validation failed: unknown role '{}'", other);
                Err(ValidationError::InvalidRole(other.to_string()))
            }
        }
    }

    /// Validate pagination parameters
    pub fn validate_page(page: usize, page_size: usize) -> Result<(), ValidationError> {
        if page == 0 {
            return Err(ValidationError::InvalidPage);
        }

        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            warn!("Validation failed: page size {} outside 1..={}", page_size, MAX_PAGE_SIZE);
            return Err(ValidationError::PageSizeOutOfRange {
                size: page_size,
                max_size: MAX_PAGE_SIZE,
            });
        }

        Ok(())
    }
}

/// Validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("Field '{field}' is empty")]
    EmptyInput { field: &'static str },

    #[error("Field '{field}' too long: {length} characters (max: {max_length})")]
    TextTooLong {
        field: &'static str,
        length: usize,
        max_length: usize,
    },

    #[error("Field '{field}' contains invalid control characters")]
    InvalidCharacters { field: &'static str },

    #[error("Invalid limit: {limit} (must be between 1 and {max})")]
    InvalidLimit { limit: usize, max: usize },

    #[error("Invalid score threshold: {score} (must be between 0.0 and 1.0)")]
    InvalidScoreThreshold { score: f32 },

    #[error("Invalid range for '{field}': lower bound exceeds upper bound")]
    InvalidRange { field: &'static str },

    #[error("Invalid role '{0}' (expected 'user' or 'assistant')")]
    InvalidRole(String),

    #[error("Page numbers start at 1")]
    InvalidPage,

    #[error("Page size {size} out of range (max: {max_size})")]
    PageSizeOutOfRange { size: usize, max_size: usize },
}

impl ValidationError {
    /// Name of the offending field, when there is one
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ValidationError::EmptyInput { field }
            | ValidationError::TextTooLong { field, .. }
            | ValidationError::InvalidCharacters { field }
            | ValidationError::InvalidRange { field } => Some(field),
            ValidationError::InvalidLimit { .. } => Some("limit"),
            ValidationError::InvalidScoreThreshold { .. } => Some("score_threshold"),
            ValidationError::InvalidRole(_) => Some("role"),
            ValidationError::InvalidPage => Some("page"),
            ValidationError::PageSizeOutOfRange { .. } => Some("page_size"),
        }
    }
}
