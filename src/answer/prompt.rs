//! Prompt templates for grounded answers

use crate::ai::ChatMessage;
use crate::conversation::{ConversationTurn, Role};
use crate::rag::RankedResult;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

pub const SYSTEM_PROMPT: &str = "You are a knowledge base assistant. Answer the user's question using only \
the documents provided in the prompt, never your own background knowledge.

Guidelines:
- If the documents do not contain the answer, say so plainly.
- Cite every statement with the number of the document it comes from, e.g. [1] or [2][3].
- Keep the answer accurate, concise and helpful.
- If the question is ambiguous, ask the user to clarify.";

/// Which prompt shape produced an answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    WithContext,
    NoContext,
    ConversationWithContext,
    ConversationNoContext,
    Improvement,
}

impl PromptTemplate {
    /// Template for a question given whether context and history exist
    pub fn select(has_context: bool, has_history: bool) -> Self {
        match (has_context, has_history) {
            (true, false) => PromptTemplate::WithContext,
            (false, false) => PromptTemplate::NoContext,
            (true, true) => PromptTemplate::ConversationWithContext,
            (false, true) => PromptTemplate::ConversationNoContext,
        }
    }
}

/// A ready-to-send prompt and the fragments it cites
#[derive(Debug, Clone)]
pub struct Prompt {
    pub template: PromptTemplate,
    pub messages: Vec<ChatMessage>,
    /// Fragments in marker order: `context[0]` is `[1]`
    pub context: Vec<RankedResult>,
}

/// Builds prompts from ranked results and conversation history
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_context_fragments: usize,
    history_turns: usize,
}

impl PromptBuilder {
    pub fn new(max_context_fragments: usize, history_turns: usize) -> Self {
        Self {
            max_context_fragments,
            history_turns,
        }
    }

    pub fn history_turns(&self) -> usize {
        self.history_turns
    }

    /// Numbered context block
    pub fn format_context(results: &[RankedResult]) -> String {
        let mut out = String::new();
        for (index, result) in results.iter().enumerate() {
            let _ = writeln!(
                out,
                "[{}] Document: {} (relevance: {:.2})\n{}\n---",
                index + 1,
                result.hit.metadata.document_name,
                result.adjusted_score,
                result.hit.content
            );
        }
        out.trim_end().to_string()
    }

    /// "User: / Assistant:" transcript lines
    pub fn format_history(turns: &[ConversationTurn]) -> String {
        turns
            .iter()
            .map(|turn| match turn.role {
                Role::User => format!("User: {}", turn.content),
                Role::Assistant => format!("Assistant: {}", turn.content),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn trim_history<'a>(&self, history: &'a [ConversationTurn]) -> &'a [ConversationTurn] {
        &history[history.len().saturating_sub(self.history_turns)..]
    }

    /// Prompt for answering a question
    pub fn build(&self, question: &str, results: &[RankedResult], history: &[ConversationTurn]) -> Prompt {
        let context: Vec<RankedResult> = results.iter().take(self.max_context_fragments).cloned().collect();
        let history = self.trim_history(history);
        let has_context = !context.is_empty();
        let has_history = !history.is_empty();

        let body = match (has_context, has_history) {
            (true, false) => format!(
                "Answer the question using the documents below.\n\n\
                 === Documents ===\n{}\n\n\
                 === Question ===\n{}\n\n\
                 Cite the documents you use with their [n] markers. If they do not answer the question, say so.",
                Self::format_context(&context),
                question
            ),
            (true, true) => format!(
                "Answer the current question using the conversation so far and the documents below.\n\n\
                 === Conversation ===\n{}\n\n\
                 === Documents ===\n{}\n\n\
                 === Current question ===\n{}\n\n\
                 Cite the documents you use with their [n] markers.",
                Self::format_history(history),
                Self::format_context(&context),
                question
            ),
            (false, false) => format!(
                "No relevant material was found in the user's documents for this question.\n\n\
                 === Question ===\n{}\n\n\
                 Tell the user that their knowledge base does not cover this question. Do not guess or \
                 answer from general knowledge. Suggest rephrasing with different keywords or uploading \
                 relevant documents.",
                question
            ),
            (false, true) => format!(
                "No relevant material was found in the user's documents for the current question.\n\n\
                 === Conversation ===\n{}\n\n\
                 === Current question ===\n{}\n\n\
                 You may refer back to the conversation, but do not invent facts. If the conversation \
                 does not answer the question, say that the knowledge base does not cover it.",
                Self::format_history(history),
                question
            ),
        };

        Prompt {
            template: PromptTemplate::select(has_context, has_history),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(body)],
            context,
        }
    }

    /// Prompt asking for a revised answer that addresses feedback
    pub fn build_improvement(
        &self,
        question: &str,
        original_answer: &str,
        feedback: &str,
        results: &[RankedResult],
        history: &[ConversationTurn],
    ) -> Prompt {
        let context: Vec<RankedResult> = results.iter().take(self.max_context_fragments).cloned().collect();
        let history = self.trim_history(history);

        let mut body = String::from("Improve the answer below based on the user's feedback.\n\n");
        if !history.is_empty() {
            let _ = write!(body, "=== Conversation ===\n{}\n\n", Self::format_history(history));
        }
        let _ = write!(
            body,
            "=== Question ===\n{}\n\n=== Original answer ===\n{}\n\n=== Feedback ===\n{}\n\n",
            question, original_answer, feedback
        );
        if context.is_empty() {
            body.push_str("=== Documents ===\nNo relevant documents were found.\n\n");
        } else {
            let _ = write!(body, "=== Documents ===\n{}\n\n", Self::format_context(&context));
        }
        body.push_str(
            "Revise the answer so that it addresses the feedback, stays faithful to the documents, \
             and cites them with [n] markers.",
        );

        Prompt {
            template: PromptTemplate::Improvement,
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(body)],
            context,
        }
    }
}
