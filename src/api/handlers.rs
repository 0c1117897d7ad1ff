//! API request handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Extension, Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::ApiError;
use crate::{
    ai::AiServiceManager,
    answer::{AnswerEvent, AnswerOptions, AnswerResult, AnswerService},
    config::Config,
    conversation::{ConversationStore, Role},
    middleware::{AuthMiddleware, CallerIdentity, InputValidator, RateLimiter},
    observability::{HealthChecker, MetricsCollector},
    rag::{QueryAnalysis, RagQueryService, SearchFilters, SearchOptions, SearchResponse},
};

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rag: Arc<RagQueryService>,
    pub answers: Arc<AnswerService>,
    pub ai: Arc<AiServiceManager>,
    pub conversations: Arc<dyn ConversationStore>,
    pub health_checker: Arc<HealthChecker>,
    pub metrics: Arc<MetricsCollector>,
    pub auth: Arc<AuthMiddleware>,
    pub rate_limiter: Arc<RateLimiter>,
}

fn default_true() -> bool {
    true
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

/// Request to search the caller's documents
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub question: String,
    #[serde(default)]
    pub filters: SearchFilters,
    pub limit: Option<usize>,
    pub score_threshold: Option<f32>,
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

/// Request to answer a question
#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    pub conversation_id: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub filters: SearchFilters,
    /// Pin generation to one provider
    pub provider: Option<String>,
}

/// Request to revise an earlier answer
#[derive(Debug, Deserialize)]
pub struct ImproveRequest {
    pub original_answer: String,
    pub question: String,
    pub feedback: String,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SuggestionsQuery {
    #[serde(default)]
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct SuggestionsResponse {
    pub question: String,
    pub suggestions: Vec<String>,
    pub analysis: QueryAnalysis,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct AppendMessageRequest {
    pub role: String,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    pub max_turns: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct InvalidateCacheRequest {
    pub owner_id: String,
}

/// Generic success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

impl SuccessResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self { message: message.into() })
    }
}

fn search_options(state: &AppState, limit: Option<usize>, filters: SearchFilters) -> ApiResult<SearchOptions> {
    if let Some(limit) = limit {
        InputValidator::validate_limit(limit, state.config.search.max_limit)?;
    }
    InputValidator::validate_filters(&filters)?;

    Ok(SearchOptions {
        limit,
        filters,
        ..Default::default()
    })
}

fn answer_options(state: &AppState, req: &AnswerRequest) -> ApiResult<AnswerOptions> {
    Ok(AnswerOptions {
        search: search_options(state, req.limit, req.filters.clone())?,
        provider: req.provider.clone(),
    })
}

/// Semantic search over the caller's documents
pub async fn search(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    InputValidator::validate_question(&req.question)?;
    if let Some(threshold) = req.score_threshold {
        InputValidator::validate_score_threshold(threshold)?;
    }

    let mut options = search_options(&state, req.limit, req.filters)?;
    options.score_threshold = req.score_threshold;
    options.use_cache = req.use_cache;

    let response = state.rag.search(&caller.owner_id, &req.question, &options).await?;
    Ok(Json(response))
}

/// Answer a question; the exchange is recorded when a conversation is given
pub async fn answer(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(req): Json<AnswerRequest>,
) -> ApiResult<Json<AnswerResult>> {
    let options = answer_options(&state, &req)?;
    let conversation_id = req.conversation_id.as_deref();

    let result = state
        .answers
        .answer_or_degrade(&caller.owner_id, &req.question, conversation_id, &options)
        .await?;

    if let Some(conversation_id) = conversation_id {
        state
            .answers
            .record_exchange(&caller.owner_id, conversation_id, &req.question, &result)
            .await?;
    }

    Ok(Json(result))
}

fn sse_event(event: &AnswerEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// Stream an answer as server-sent events: `chunk`* then `done` or `error`
pub async fn answer_stream(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(req): Json<AnswerRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let options = answer_options(&state, &req)?;
    let events = state
        .answers
        .answer_stream(&caller.owner_id, &req.question, req.conversation_id.as_deref(), &options)
        .await?;

    let answers = state.answers.clone();
    let owner_id = caller.owner_id;
    let question = req.question;
    let conversation_id = req.conversation_id;

    let stream = events.map(move |event| {
        if let (AnswerEvent::Done { result }, Some(conversation_id)) = (&event, &conversation_id) {
            let answers = answers.clone();
            let owner_id = owner_id.clone();
            let question = question.clone();
            let conversation_id = conversation_id.clone();
            let result = result.clone();
            tokio::spawn(async move {
                if let Err(e) = answers
                    .record_exchange(&owner_id, &conversation_id, &question, &result)
                    .await
                {
                    warn!(conversation_id = %conversation_id, error = %e, "Failed to record streamed answer");
                }
            });
        }
        Ok::<_, Infallible>(sse_event(&event))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Revise an earlier answer from caller feedback
pub async fn improve_answer(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(req): Json<ImproveRequest>,
) -> ApiResult<Json<AnswerResult>> {
    let result = state
        .answers
        .improve(
            &caller.owner_id,
            &req.original_answer,
            &req.question,
            &req.feedback,
            req.conversation_id.as_deref(),
        )
        .await?;
    Ok(Json(result))
}

/// Related query suggestions plus an analysis of the partial question
pub async fn suggestions(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<SuggestionsQuery>,
) -> ApiResult<Json<SuggestionsResponse>> {
    InputValidator::validate_question(&query.question)?;

    Ok(Json(SuggestionsResponse {
        suggestions: state.rag.suggestions(&caller.owner_id, &query.question),
        analysis: state.rag.analyze(&query.question),
        question: query.question,
    }))
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    body: Option<Json<CreateConversationRequest>>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = body.unwrap_or_default();
    if let Some(title) = &req.title {
        InputValidator::validate_title(title)?;
    }

    let conversation = state.conversations.create_conversation(&caller.owner_id, req.title).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(page): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    InputValidator::validate_page(page.page, page.page_size)?;
    let listing = state
        .conversations
        .list_conversations(&caller.owner_id, page.page, page.page_size)
        .await?;
    Ok(Json(listing))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let summary = state.conversations.get_conversation(&caller.owner_id, &id).await?;
    Ok(Json(summary))
}

pub async fn update_conversation(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
    Json(req): Json<UpdateConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    InputValidator::validate_title(&req.title)?;
    let conversation = state
        .conversations
        .update_title(&caller.owner_id, &id, req.title)
        .await?;
    Ok(Json(conversation))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.conversations.delete_conversation(&caller.owner_id, &id).await?;
    Ok(SuccessResponse::new(format!("Conversation {} deleted", id)))
}

pub async fn append_message(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
    Json(req): Json<AppendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let role: Role = req.role.parse()?;
    InputValidator::validate_message(&req.content)?;

    let turn = state
        .conversations
        .append_turn(&caller.owner_id, &id, role, req.content, req.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(turn)))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
    Query(page): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    InputValidator::validate_page(page.page, page.page_size)?;
    let turns = state
        .conversations
        .list_turns(&caller.owner_id, &id, page.page, page.page_size)
        .await?;
    Ok(Json(turns))
}

/// Most recent turns, oldest first, as they would be fed into a prompt
pub async fn conversation_context(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
    Query(query): Query<ContextQuery>,
) -> ApiResult<impl IntoResponse> {
    let max_turns = query.max_turns.unwrap_or(state.config.answer.history_turns);
    let turns = state
        .conversations
        .recent_turns(&caller.owner_id, &id, max_turns)
        .await?;
    Ok(Json(json!({
        "conversation_id": id,
        "max_turns": max_turns,
        "turns": turns,
    })))
}

pub async fn providers_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "any_available": state.ai.any_available(),
        "providers": state.ai.health_summary(),
    }))
}

pub async fn providers_models(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let models = state.ai.list_models().await?;
    Ok(Json(json!({ "models": models })))
}

pub async fn reset_provider(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.ai.reset_circuit(&id)?;
    info!(provider = %id, owner_id = %caller.owner_id, "Provider circuit reset via API");
    Ok(SuccessResponse::new(format!("Circuit for provider {} reset", id)))
}

pub async fn reset_all_providers(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> impl IntoResponse {
    state.ai.reset_all();
    info!(owner_id = %caller.owner_id, "All provider circuits reset via API");
    SuccessResponse::new("All provider circuits reset")
}

/// Drop the caller's cached searches
pub async fn clear_cache(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> impl IntoResponse {
    state.rag.invalidate_owner_cache(&caller.owner_id).await;
    SuccessResponse::new(format!("Search cache cleared for {}", caller.owner_id))
}

/// Drop the cached searches of a given owner; other owners need an admin caller
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(req): Json<InvalidateCacheRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    state.auth.authorize_owner(&caller, &req.owner_id)?;

    info!(owner_id = %req.owner_id, requested_by = %caller.owner_id, "Invalidating search cache");
    state.rag.invalidate_owner_cache(&req.owner_id).await;
    Ok(SuccessResponse::new(format!("Search cache invalidated for {}", req.owner_id)))
}
