//! API route configuration

use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::warn;
use uuid::Uuid;

use super::error::{ApiError, CORRELATION_ID};
use super::handlers::{self, AppState};
use crate::{
    error::RagError,
    middleware::CallerIdentity,
    observability::HealthStatus,
};

/// Header carrying the correlation id in both directions
pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const OWNER_HEADER: &str = "x-owner-id";
const MAX_REQUEST_ID_LEN: usize = 128;

/// Build the complete API router with middleware
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.server.max_body_size_mb.max(1) * 1024 * 1024;

    // Public routes (no auth)
    let public_routes = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/metrics", get(metrics_handler));

    // Authenticated, rate limited routes
    let api_routes = Router::new()
        .route("/search", post(handlers::search))
        .route("/answer", post(handlers::answer))
        .route("/answer/stream", post(handlers::answer_stream))
        .route("/answer/improve", post(handlers::improve_answer))
        .route("/suggestions", get(handlers::suggestions))
        .route(
            "/conversations",
            post(handlers::create_conversation).get(handlers::list_conversations),
        )
        .route(
            "/conversations/:id",
            get(handlers::get_conversation)
                .patch(handlers::update_conversation)
                .delete(handlers::delete_conversation),
        )
        .route(
            "/conversations/:id/messages",
            post(handlers::append_message).get(handlers::list_messages),
        )
        .route("/conversations/:id/context", get(handlers::conversation_context))
        .route("/providers/health", get(handlers::providers_health))
        .route("/providers/models", get(handlers::providers_models))
        .route("/providers/reset", post(handlers::reset_all_providers))
        .route("/providers/:id/reset", post(handlers::reset_provider))
        .route("/cache", axum::routing::delete(handlers::clear_cache))
        .route("/cache/invalidate", post(handlers::invalidate_cache))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
                .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
                .layer(middleware::from_fn_with_state(state.clone(), timeout_middleware))
                .layer(RequestBodyLimitLayer::new(body_limit)),
        );

    public_routes
        .nest("/api/v1", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(state.clone(), metrics_middleware)),
        )
        .with_state(state)
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "knowledge-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

fn health_status_code(status: &HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.health_checker.check_health().await;
    (health_status_code(&health.status), Json(health))
}

/// Liveness probe - always returns 200
async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "alive"})))
}

/// Readiness probe - unhealthy components make the service not ready
async fn readiness_handler(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.health_checker.check_health().await;
    let status_code = health_status_code(&health.status);
    let readiness = if status_code == StatusCode::OK { "ready" } else { "not_ready" };

    (status_code, Json(json!({"status": readiness, "details": health})))
}

/// Prometheus scrape endpoint
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut output = state.metrics.export_prometheus();
    output.push_str(&state.ai.export_prometheus());

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        output,
    )
}

/// Reuse or mint a correlation id, scope it for error envelopes and echo it back
async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
    }

    let mut response = CORRELATION_ID.scope(request_id.clone(), next.run(req)).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
    }
    response
}

/// Count requests, latency and failures
async fn metrics_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let response = next.run(req).await;

    state.metrics.record_request(start.elapsed());
    if response.status().is_server_error() {
        state.metrics.record_error();
    }
    response
}

/// Resolve the caller and attach a [`CallerIdentity`] to the request
async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    // Scoped so no borrow of `req` lives across the await below
    let (authorization, owner) = {
        let header_value = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        (header_value(header::AUTHORIZATION.as_str()), header_value(OWNER_HEADER))
    };

    let caller = state
        .auth
        .authenticate(authorization.as_deref(), owner.as_deref())
        .map_err(RagError::from)?;

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

/// Per-owner request limiting; runs after authentication
async fn rate_limit_middleware(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, ApiError> {
    let owner_id = req
        .extensions()
        .get::<CallerIdentity>()
        .map(|caller| caller.owner_id.clone())
        .ok_or_else(|| RagError::Internal("caller identity missing".to_string()))?;

    if let Err(e) = state.rate_limiter.check(&owner_id) {
        warn!(owner_id = %owner_id, "Rejecting request: {}", e);
        return Err(e.into());
    }
    Ok(next.run(req).await)
}

/// Bound the time a handler may take to produce its response
async fn timeout_middleware(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, ApiError> {
    let limit = Duration::from_secs(state.config.server.request_timeout_secs.max(1));
    tokio::time::timeout(limit, next.run(req))
        .await
        .map_err(|_| ApiError(RagError::Timeout(limit)))
}
