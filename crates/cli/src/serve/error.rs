//! Engine errors to HTTP responses.
//!
//! Body shape: `{"error": {"code": ..., "message": ..., "fields": {...}?}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use postmortem_core::{EngineError, ErrorKind};

#[derive(Debug)]
pub(crate) enum ApiError {
    Engine(EngineError),
    /// Malformed request body or query string.
    BadRequest(String),
    Unauthenticated(&'static str),
    RouteNotFound,
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

pub(crate) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::InvalidState => StatusCode::CONFLICT,
        ErrorKind::Conflict => StatusCode::PRECONDITION_FAILED,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Infrastructure => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn body(status: StatusCode, code: &str, message: String) -> Response {
    (status, Json(json!({"error": {"code": code, "message": message}}))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Engine(e) => {
                let kind = e.kind();
                let mut error = json!({"code": kind.code(), "message": e.to_string()});
                if let Some(fields) = e.field_errors() {
                    error["fields"] = json!(fields);
                }
                (status_for(kind), Json(json!({ "error": error }))).into_response()
            }
            ApiError::BadRequest(message) => body(StatusCode::BAD_REQUEST, "bad_request", message),
            ApiError::Unauthenticated(message) => {
                body(StatusCode::UNAUTHORIZED, "unauthenticated", message.to_string())
            }
            ApiError::RouteNotFound => {
                body(StatusCode::NOT_FOUND, "not_found", "no such route".to_string())
            }
        }
    }
}
