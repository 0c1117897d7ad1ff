//! Answer synthesis: prompt construction, generation, citations and quality scoring

pub mod citation;
pub mod prompt;
pub mod quality;
pub mod service;

pub use citation::{extract_citations, extract_markers};
pub use prompt::{Prompt, PromptBuilder, PromptTemplate, SYSTEM_PROMPT};
pub use quality::{AnswerQualityValidator, QualityReport};
pub use service::AnswerService;

use crate::rag::{SearchOptions, SearchStats};
use serde::{Deserialize, Serialize};

/// A source fragment referenced by an answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    /// Marker number as it appears in the answer, e.g. `[2]`
    pub number: usize,
    pub fragment_id: String,
    pub document_id: String,
    pub document_name: String,
    pub relevance_score: f32,
}

/// A generated answer with its sources and quality annotation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub quality: QualityReport,
    pub template: PromptTemplate,
    /// Set when generation was unavailable and only search results are returned
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub latency_ms: u64,
    /// Fragments placed in the prompt
    pub context_fragments: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_stats: Option<SearchStats>,
}

/// Options for answering a question
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerOptions {
    #[serde(default)]
    pub search: SearchOptions,
    /// Pin generation to one provider
    #[serde(default)]
    pub provider: Option<String>,
}

/// Event emitted by a streamed answer
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerEvent {
    /// Next piece of generated text
    Chunk { content: String },
    /// Generation finished; carries the complete annotated result
    Done { result: Box<AnswerResult> },
    /// Generation failed mid-stream
    Error { message: String },
}

impl AnswerEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            AnswerEvent::Chunk { .. } => "chunk",
            AnswerEvent::Done { .. } => "done",
            AnswerEvent::Error { .. } => "error",
        }
    }
}
