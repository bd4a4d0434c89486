use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sea_orm::DbErr;
use serde_json::json;
use thiserror::Error;
use validator::ValidationErrors;

/// Error vocabulary shared by the HTTP surface and the saga workers.
///
/// Each variant carries enough information to decide both the HTTP status
/// (via `IntoResponse`) and the event-bus redelivery policy (via
/// `requires_redelivery`) from the same value, so a handler and a worker
/// consuming the same repository call agree on what a given failure means.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient stock for product {product_id}")]
    InsufficientStock { product_id: uuid::Uuid },

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("event bus error: {0}")]
    EventBus(String),

    #[error("circuit breaker open for {0}")]
    CircuitBreakerOpen(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Transient failures are ones where the saga's at-least-once delivery
    /// should retry the event rather than dead-lettering it: a dropped DB
    /// connection or an open circuit breaker says nothing about whether the
    /// operation itself was valid. Validation/NotFound/Conflict/OutOfStock
    /// are terminal for the event that triggered them — redelivering won't
    /// change the outcome.
    pub fn requires_redelivery(&self) -> bool {
        matches!(
            self,
            ServiceError::Database(_)
                | ServiceError::Cache(_)
                | ServiceError::EventBus(_)
                | ServiceError::CircuitBreakerOpen(_)
                | ServiceError::Internal(_)
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::InsufficientStock { .. } => StatusCode::CONFLICT,
            ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden => StatusCode::FORBIDDEN,
            ServiceError::Database(_)
            | ServiceError::Cache(_)
            | ServiceError::EventBus(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::CircuitBreakerOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(errors: ValidationErrors) -> ServiceError {
        ServiceError::Validation(errors.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
