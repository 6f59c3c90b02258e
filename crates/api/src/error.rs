use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use unplugd_core::error::CoreError;
use unplugd_db::StoreError;
use unplugd_pipeline::{ServiceError, StartError, StorageError};

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain, store and pipeline errors and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON error
/// responses of the form `{ "error": message, "code": CODE }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

type Classified = (StatusCode, &'static str, String);

fn internal(error: &dyn std::fmt::Display) -> Classified {
    tracing::error!(error = %error, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn classify_core(err: &CoreError) -> Classified {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
        CoreError::Internal(msg) => internal(msg),
    }
}

/// - `NotFound` maps to 404.
/// - `AlreadyExists` and rejected transitions map to 409.
/// - Database and corrupt-record errors map to 500 with a sanitized message.
fn classify_store(err: &StoreError) -> Classified {
    match err {
        StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        StoreError::AlreadyExists { .. } => (StatusCode::CONFLICT, "CONFLICT", err.to_string()),
        StoreError::InvalidTransition { .. } => {
            (StatusCode::CONFLICT, "INVALID_TRANSITION", err.to_string())
        }
        StoreError::Corrupt(_) | StoreError::Database(_) => internal(err),
    }
}

fn classify_storage(err: &StorageError) -> Classified {
    match err {
        StorageError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        StorageError::Backend(_) => internal(err),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core(core),
            AppError::Store(store) => classify_store(store),

            AppError::Start(start) => match start {
                StartError::NotFound { .. } => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", start.to_string())
                }
                StartError::AlreadyStarted(_) => {
                    (StatusCode::CONFLICT, "ALREADY_STARTED", start.to_string())
                }
                StartError::NotRetryable(_) => {
                    (StatusCode::CONFLICT, "NOT_RETRYABLE", start.to_string())
                }
                StartError::Store(store) => classify_store(store),
            },

            AppError::Service(service) => match service {
                ServiceError::Invalid(core) => classify_core(core),
                ServiceError::Store(store) => classify_store(store),
                ServiceError::Storage(storage) => classify_storage(storage),
            },

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
