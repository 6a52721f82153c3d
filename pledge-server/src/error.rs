//! HTTP error responses
//!
//! Body shape: `{ "error": message, "kind": kind }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pledge_core::{EngineError, ErrorKind};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("invalid dashboard token")]
    Forbidden,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(err) => match err.kind() {
                ErrorKind::Validation => match err {
                    EngineError::UnknownGroup(_) | EngineError::UnknownVariant(_) => {
                        StatusCode::NOT_FOUND
                    }
                    _ => StatusCode::BAD_REQUEST,
                },
                ErrorKind::Protocol => StatusCode::CONFLICT,
                ErrorKind::Capacity => StatusCode::NOT_FOUND,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Engine(err) => match err.kind() {
                ErrorKind::Validation => "validation",
                ErrorKind::Protocol => "protocol",
                ErrorKind::Capacity => "capacity",
            },
            ApiError::BadRequest(_) | ApiError::NotFound(_) => "validation",
            ApiError::Conflict(_) => "protocol",
            ApiError::Forbidden => "auth",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::debug!("Request rejected ({}): {}", status, self);
        let body = json!({ "error": self.to_string(), "kind": self.kind() });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;
