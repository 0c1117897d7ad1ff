//! Answer service: search, prompt, generate, cite and score

use super::citation::{cite_all, extract_citations};
use super::prompt::{Prompt, PromptBuilder};
use super::quality::{AnswerQualityValidator, QualityReport};
use super::{AnswerEvent, AnswerOptions, AnswerResult};
use crate::ai::{AiServiceManager, GenerationOptions};
use crate::config::AnswerConfig;
use crate::conversation::{ConversationStore, ConversationTurn, Role};
use crate::error::Result;
use crate::middleware::InputValidator;
use crate::rag::{RagQueryService, SearchStats};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};

/// Text returned when generation is unavailable but search succeeded
pub const DEGRADED_NOTICE: &str = "Answer generation is temporarily unavailable. \
The most relevant passages from your documents are listed as sources.";

/// Everything needed to generate once the search and history are in hand
struct Prepared {
    prompt: Prompt,
    search_stats: SearchStats,
    started: Instant,
}

/// Produces cited, quality-scored answers grounded in the caller's documents
pub struct AnswerService {
    rag: Arc<RagQueryService>,
    ai: Arc<AiServiceManager>,
    conversations: Arc<dyn ConversationStore>,
    prompts: PromptBuilder,
    validator: AnswerQualityValidator,
    config: AnswerConfig,
}

impl AnswerService {
    pub fn new(
        rag: Arc<RagQueryService>,
        ai: Arc<AiServiceManager>,
        conversations: Arc<dyn ConversationStore>,
        config: AnswerConfig,
    ) -> Self {
        Self {
            rag,
            ai,
            conversations,
            prompts: PromptBuilder::new(config.max_context_fragments, config.history_turns),
            validator: AnswerQualityValidator::new(config.min_answer_chars, config.max_answer_chars),
            config,
        }
    }

    fn generation_options(&self, options: &AnswerOptions) -> GenerationOptions {
        GenerationOptions {
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            provider: options.provider.clone(),
        }
    }

    async fn history(&self, owner_id: &str, conversation_id: Option<&str>) -> Result<Vec<ConversationTurn>> {
        match conversation_id {
            Some(id) => self.conversations.recent_turns(owner_id, id, self.prompts.history_turns()).await,
            None => Ok(Vec::new()),
        }
    }

    async fn prepare(
        &self,
        owner_id: &str,
        question: &str,
        conversation_id: Option<&str>,
        options: &AnswerOptions,
    ) -> Result<Prepared> {
        let started = Instant::now();
        InputValidator::validate_question(question)?;

        let search = self.rag.search(owner_id, question, &options.search).await?;
        let history = self.history(owner_id, conversation_id).await?;
        let prompt = self.prompts.build(question, &search.results, &history);

        debug!(
            template = ?prompt.template,
            context = prompt.context.len(),
            history = history.len(),
            "Prepared answer prompt"
        );

        Ok(Prepared {
            prompt,
            search_stats: search.stats,
            started,
        })
    }

    /// Answer a question from the caller's documents
    #[instrument(skip(self, question, options), fields(owner_id = %owner_id))]
    pub async fn answer(
        &self,
        owner_id: &str,
        question: &str,
        conversation_id: Option<&str>,
        options: &AnswerOptions,
    ) -> Result<AnswerResult> {
        let prepared = self.prepare(owner_id, question, conversation_id, options).await?;
        let generation = self
            .ai
            .generate(prepared.prompt.messages.clone(), &self.generation_options(options))
            .await?;

        Ok(assemble(&self.validator, prepared, question, generation.value, Some(generation.provider)))
    }

    /// Like [`answer`](Self::answer), but returns the search results as a degraded
    /// answer when no provider can generate
    #[instrument(skip(self, question, options), fields(owner_id = %owner_id))]
    pub async fn answer_or_degrade(
        &self,
        owner_id: &str,
        question: &str,
        conversation_id: Option<&str>,
        options: &AnswerOptions,
    ) -> Result<AnswerResult> {
        let prepared = self.prepare(owner_id, question, conversation_id, options).await?;
        let generation = self
            .ai
            .generate(prepared.prompt.messages.clone(), &self.generation_options(options))
            .await;

        match generation {
            Ok(generation) => Ok(assemble(&self.validator, prepared, question, generation.value, Some(generation.provider))),
            Err(e) if e.is_degradation() && self.config.degraded_mode => {
                warn!(error = %e, "Generation unavailable, returning degraded answer");
                Ok(degraded(prepared))
            }
            Err(e) => Err(e),
        }
    }

    /// Stream an answer as it is generated
    ///
    /// Chunks arrive in provider order, followed by a final `Done` event with
    /// citations and quality. Dropping the stream abandons generation.
    #[instrument(skip(self, question, options), fields(owner_id = %owner_id))]
    pub async fn answer_stream(
        &self,
        owner_id: &str,
        question: &str,
        conversation_id: Option<&str>,
        options: &AnswerOptions,
    ) -> Result<ReceiverStream<AnswerEvent>> {
        let prepared = self.prepare(owner_id, question, conversation_id, options).await?;
        let mut chunks = self
            .ai
            .generate_stream(prepared.prompt.messages.clone(), &self.generation_options(options))
            .await?;

        let (tx, rx) = mpsc::channel(self.config.stream_buffer.max(1));
        let validator = self.validator.clone();
        let question = question.to_string();

        tokio::spawn(async move {
            let provider = chunks.provider().to_string();
            let mut answer = String::new();

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        debug!(provider = %provider, "Answer stream dropped by client");
                        return;
                    }
                    next = chunks.next() => next,
                };

                match next {
                    Some(Ok(content)) => {
                        answer.push_str(&content);
                        if tx.send(AnswerEvent::Chunk { content }).await.is_err() {
                            debug!(provider = %provider, "Answer stream dropped by client");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(provider = %provider, error = %e, "Answer stream failed");
                        let _ = tx.send(AnswerEvent::Error { message: e.to_string() }).await;
                        return;
                    }
                    None => break,
                }
            }

            let result = assemble(&validator, prepared, &question, answer, Some(provider));
            let _ = tx
                .send(AnswerEvent::Done {
                    result: Box::new(result),
                })
                .await;
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Revise a previous answer according to caller feedback
    ///
    /// The search runs again and quality is scored on the revised text alone.
    #[instrument(skip(self, original_answer, question, feedback), fields(owner_id = %owner_id))]
    pub async fn improve(
        &self,
        owner_id: &str,
        original_answer: &str,
        question: &str,
        feedback: &str,
        conversation_id: Option<&str>,
    ) -> Result<AnswerResult> {
        let started = Instant::now();
        InputValidator::validate_question(question)?;
        InputValidator::validate_feedback(feedback)?;

        let options = AnswerOptions::default();
        let search = self.rag.search(owner_id, question, &options.search).await?;
        let history = self.history(owner_id, conversation_id).await?;
        let prompt = self
            .prompts
            .build_improvement(question, original_answer, feedback, &search.results, &history);

        let generation = self
            .ai
            .generate(prompt.messages.clone(), &self.generation_options(&options))
            .await?;

        info!(provider = %generation.provider, "Improved answer");
        let prepared = Prepared {
            prompt,
            search_stats: search.stats,
            started,
        };
        Ok(assemble(&self.validator, prepared, question, generation.value, Some(generation.provider)))
    }

    /// Persist a question and its answer as two conversation turns
    pub async fn record_exchange(
        &self,
        owner_id: &str,
        conversation_id: &str,
        question: &str,
        result: &AnswerResult,
    ) -> Result<()> {
        self.conversations
            .append_turn(owner_id, conversation_id, Role::User, question.to_string(), None)
            .await?;

        let metadata = json!({
            "citations": result.citations,
            "template": result.template,
            "quality_score": result.quality.score,
            "degraded": result.degraded,
        });
        self.conversations
            .append_turn(owner_id, conversation_id, Role::Assistant, result.answer.clone(), Some(metadata))
            .await?;
        Ok(())
    }
}

fn assemble(
    validator: &AnswerQualityValidator,
    prepared: Prepared,
    question: &str,
    answer: String,
    provider: Option<String>,
) -> AnswerResult {
    let citations = extract_citations(&answer, &prepared.prompt.context);
    let quality = validator.validate(&answer, question, prepared.prompt.context.len());

    AnswerResult {
        answer,
        citations,
        quality,
        template: prepared.prompt.template,
        degraded: false,
        provider,
        latency_ms: prepared.started.elapsed().as_millis() as u64,
        context_fragments: prepared.prompt.context.len(),
        search_stats: Some(prepared.search_stats),
    }
}

fn degraded(prepared: Prepared) -> AnswerResult {
    AnswerResult {
        answer: DEGRADED_NOTICE.to_string(),
        citations: cite_all(&prepared.prompt.context),
        quality: QualityReport::unavailable(),
        template: prepared.prompt.template,
        degraded: true,
        provider: None,
        latency_ms: prepared.started.elapsed().as_millis() as u64,
        context_fragments: prepared.prompt.context.len(),
        search_stats: Some(prepared.search_stats),
    }
}
