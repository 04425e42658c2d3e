use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use serde::Serialize;
use utoipa::ToSchema;

use crate::export::ExportError;
use crate::sampler::{PushError, SamplerError};
use crate::store::PersistenceError;

pub enum ApiError {
    Validation(String),
    NotFound(&'static str),
    Conflict(&'static str),
    Unavailable(String),
    Busy,
    Storage(PersistenceError),
    Internal(String),
}

impl From<PersistenceError> for ApiError {
    fn from(e: PersistenceError) -> Self {
        ApiError::Storage(e)
    }
}

impl From<SamplerError> for ApiError {
    fn from(e: SamplerError) -> Self {
        match e {
            SamplerError::Config(e) => ApiError::Validation(e.to_string()),
            SamplerError::Unavailable(reason) => ApiError::Unavailable(reason.to_string()),
        }
    }
}

impl From<PushError> for ApiError {
    fn from(e: PushError) -> Self {
        match e {
            PushError::NotSubscribed => ApiError::Conflict("not_tracking"),
            PushError::Disabled => ApiError::Unavailable(e.to_string()),
            PushError::Backlogged => ApiError::Busy,
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::Empty => ApiError::NotFound("no_samples"),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::with_message("validation_failed", &msg)),
            )
                .into_response(),
            ApiError::NotFound(reason) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse::new(reason))).into_response()
            }
            ApiError::Conflict(reason) => {
                (StatusCode::CONFLICT, Json(ErrorResponse::new(reason))).into_response()
            }
            ApiError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::with_message("capture_unavailable", &msg)),
            )
                .into_response(),
            ApiError::Busy => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorResponse::new("fix_queue_full")),
            )
                .into_response(),
            ApiError::Storage(e) => {
                error!("Storage error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::with_message("storage_error", &e.to_string())),
                )
                    .into_response()
            }
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::with_message("internal_error", &msg)),
                )
                    .into_response()
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: &str) -> Self {
        ErrorResponse {
            error: error.to_string(),
            message: None,
        }
    }

    pub fn with_message(error: &str, message: &str) -> Self {
        ErrorResponse {
            error: error.to_string(),
            message: Some(message.to_string()),
        }
    }
}
