//! JSON error envelope for API responses

use crate::error::RagError;
use crate::middleware::AuthError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, warn};

tokio::task_local! {
    /// Correlation id of the request being served
    pub static CORRELATION_ID: String;
}

/// Correlation id for the current request, if one is in scope
pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.try_with(|id| id.clone()).ok()
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    code: &'static str,
    timestamp: String,
    correlation_id: Option<String>,
    details: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

/// Error returned by API handlers
#[derive(Debug)]
pub struct ApiError(pub RagError);

impl<E> From<E> for ApiError
where
    E: Into<RagError>,
{
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RagError::Validation(_) => StatusCode::BAD_REQUEST,
            RagError::Auth(AuthError::Forbidden) => StatusCode::FORBIDDEN,
            RagError::Auth(_) => StatusCode::UNAUTHORIZED,
            RagError::NotFound { .. } => StatusCode::NOT_FOUND,
            RagError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            RagError::CircuitOpen { .. } | RagError::ServiceDegradation { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RagError::AiService { .. } | RagError::Search(_) => StatusCode::BAD_GATEWAY,
            RagError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RagError::Cache(_) | RagError::Config(_) | RagError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match &self.0 {
            RagError::Validation(_) => "VALIDATION_ERROR",
            RagError::Auth(AuthError::Forbidden) => "FORBIDDEN",
            RagError::Auth(_) => "AUTHENTICATION_ERROR",
            RagError::NotFound { .. } => "NOT_FOUND",
            RagError::RateLimit { .. } => "RATE_LIMIT_EXCEEDED",
            RagError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            RagError::ServiceDegradation { .. } => "SERVICE_UNAVAILABLE",
            RagError::AiService { .. } => "AI_SERVICE_ERROR",
            RagError::Search(_) => "SEARCH_ERROR",
            RagError::Timeout(_) => "TIMEOUT",
            RagError::Cache(_) | RagError::Config(_) | RagError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn message(&self) -> String {
        match &self.0 {
            RagError::ServiceDegradation { .. } => "AI services are temporarily unavailable".to_string(),
            RagError::Cache(_) | RagError::Config(_) | RagError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    fn details(&self) -> Option<Value> {
        match &self.0 {
            RagError::ServiceDegradation { attempted } => Some(json!({ "attempted_providers": attempted })),
            RagError::CircuitOpen { provider, remaining } => Some(json!({
                "provider": provider,
                "retry_after_ms": remaining.as_millis() as u64,
            })),
            RagError::AiService { provider, .. } => Some(json!({ "provider": provider })),
            RagError::RateLimit { provider, retry_after } => Some(json!({
                "provider": provider,
                "retry_after_secs": retry_after.map(|d| d.as_secs_f64().ceil() as u64),
            })),
            RagError::Validation(e) => e.field().map(|field| json!({ "field": field })),
            RagError::NotFound { resource, id } => Some(json!({ "resource": resource, "id": id })),
            _ => None,
        }
    }

    /// Seconds for the `Retry-After` header
    fn retry_after_secs(&self) -> Option<u64> {
        match &self.0 {
            RagError::RateLimit { retry_after, .. } => Some(retry_after.map(|d| d.as_secs_f64().ceil() as u64).unwrap_or(1).max(1)),
            RagError::CircuitOpen { remaining, .. } => Some((remaining.as_secs_f64().ceil() as u64).max(1)),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let correlation_id = current_correlation_id();

        if status.is_server_error() {
            error!(correlation_id = ?correlation_id, error = %self.0, "Request failed");
        } else {
            warn!(correlation_id = ?correlation_id, error = %self.0, "Request rejected");
        }

        let envelope = ErrorEnvelope {
            error: ErrorBody {
                message: self.message(),
                code: self.code(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                correlation_id,
                details: self.details(),
            },
        };

        let mut response = (status, Json(envelope)).into_response();
        if let Some(secs) = self.retry_after_secs() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
