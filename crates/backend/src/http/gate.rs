//! Admission gate: the system goes read-only while a rebuild runs.

use std::sync::Arc;

use axum::{
  extract::{Request, State},
  http::Method,
  middleware::Next,
  response::Response,
};
use tracing::debug;

use super::error::ApiError;
use crate::coordinator::RebuildCoordinator;

/// The rebuild trigger is never gated.
pub const REBUILD_TRIGGER_PATH: &str = "/rebuild/run";

pub fn is_mutating(method: &Method) -> bool {
  matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

/// Reject mutating requests with 503 while a rebuild is running.
///
/// Reads always pass. A status store failure also rejects the write rather
/// than letting it through unchecked.
///
/// Layer onto any router with
/// `axum::middleware::from_fn_with_state(coordinator, admission_gate)`.
pub async fn admission_gate(
  State(coordinator): State<Arc<RebuildCoordinator>>,
  request: Request,
  next: Next,
) -> Result<Response, ApiError> {
  if !is_mutating(request.method()) || request.uri().path() == REBUILD_TRIGGER_PATH {
    return Ok(next.run(request).await);
  }

  if coordinator.is_rebuilding().await? {
    debug!(method = %request.method(), path = request.uri().path(), "Rejecting write during rebuild");
    return Err(ApiError::ReadOnly);
  }

  Ok(next.run(request).await)
}
