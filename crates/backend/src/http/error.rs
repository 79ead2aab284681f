//! API error responses.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;

use crate::coordinator::CoordinatorError;

/// Fixed message returned for writes rejected during a rebuild.
pub const READ_ONLY_MESSAGE: &str = "Service is currently in read-only mode";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error("{0}")]
  InvalidInput(String),
  #[error("Service is currently in read-only mode")]
  ReadOnly,
  #[error("{0}")]
  Unavailable(String),
  #[error("{0}")]
  Internal(String),
}

impl From<CoordinatorError> for ApiError {
  fn from(e: CoordinatorError) -> Self {
    match e {
      CoordinatorError::Request(e) => ApiError::InvalidInput(e.to_string()),
      CoordinatorError::Store(_) | CoordinatorError::Bus(_) => ApiError::Unavailable(e.to_string()),
      CoordinatorError::Engine(_) => ApiError::Internal(e.to_string()),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, code) = match &self {
      ApiError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
      ApiError::ReadOnly => (StatusCode::SERVICE_UNAVAILABLE, "READ_ONLY"),
      ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
      ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };

    let body = json!({
      "error": {
        "code": code,
        "message": self.to_string(),
      }
    });
    (status, Json(body)).into_response()
  }
}
