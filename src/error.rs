use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the HTTP layer.
///
/// The security core itself never produces these: it answers with verdicts
/// (`RateLimitDecision`, `InputAnalysis`, `bool`). Middleware and routes map
/// those verdicts onto `AppError` so every rejection shares one JSON envelope.
#[derive(Debug, Error)]
pub enum AppError {
    /// For internal server errors that are not expected to be handled by the client.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
    /// For client errors due to invalid requests.
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// For when a requested resource is not found.
    #[error("Not found: {0}")]
    NotFound(String),
    /// For when a request is not authorized.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// For when the caller is known but not allowed to perform the action.
    #[error("Forbidden: {0}")]
    Forbidden(String),
    /// Missing, malformed, expired or forged anti-forgery token.
    #[error("CSRF validation failed: {0}")]
    CsrfRejected(String),
    /// For when a client has sent too many requests in a given amount of time.
    #[error("Rate limited. Retry after {retry_after_seconds} seconds")]
    RateLimited {
        /// The number of seconds to wait before retrying the request.
        retry_after_seconds: u64,
    },
    /// Input matched one or more attack signatures.
    #[error("Potentially malicious input rejected: {}", threats.join(", "))]
    ThreatDetected { threats: Vec<String> },
    /// For when a specific field in a request fails validation.
    #[error("Validation error on field '{field}': {message}")]
    ValidationError {
        /// The name of the field that failed validation.
        field: String,
        /// A message describing the validation error.
        message: String,
    },
    #[error("Payload too large: limit is {limit} bytes")]
    PayloadTooLarge { limit: usize },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retry_after = match &self {
            AppError::RateLimited { retry_after_seconds } => Some(*retry_after_seconds),
            _ => None,
        };

        let (status, error_code, error_message, details) = match self {
            AppError::Internal(e) => {
                let error_id = uuid::Uuid::new_v4();
                tracing::error!(%error_id, "Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                    Some(json!({ "error_id": error_id.to_string() })),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg, None),
            AppError::CsrfRejected(msg) => (StatusCode::FORBIDDEN, "CSRF_REJECTED", msg, None),
            AppError::RateLimited { retry_after_seconds } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                format!("Too many requests. Please retry after {} seconds", retry_after_seconds),
                Some(json!({ "retry_after_seconds": retry_after_seconds })),
            ),
            AppError::ThreatDetected { threats } => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                "Request contains potentially malicious input".to_string(),
                Some(json!({ "threats": threats })),
            ),
            AppError::ValidationError { field, message } => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("Validation failed for field '{}'", field),
                Some(json!({ "field": field, "message": message })),
            ),
            AppError::PayloadTooLarge { limit } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                format!("Request body exceeds maximum size of {} bytes", limit),
                None,
            ),
        };

        let mut body = json!({
            "error": {
                "code": error_code,
                "message": error_message,
            },
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// A type alias for `Result<T, AppError>`, used throughout the application.
pub type AppResult<T> = Result<T, AppError>;

/// An extension trait for `Option` that provides a convenient way to convert
/// an `Option` to a `Result` with a `NotFound` error.
pub trait OptionExt<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T> {
        self.ok_or_else(|| AppError::NotFound(format!("{} not found", entity)))
    }
}
