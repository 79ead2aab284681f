//! HTTP surface.
//!
//! - `GET /rebuild/projections`: registered projection names
//! - `POST /rebuild/run`: request a rebuild of a set of projections
//! - `GET /rebuild/status`: current status, or an SSE feed with
//!   `Accept: text/event-stream`
//! - `POST /events`: append an event to the simulated store (gated)
//! - `POST /seed`: bulk-append [`SEED_EVENT_COUNT`] events (gated)
//!
//! Every route sits behind the [`admission_gate`].

mod error;
mod gate;
mod stream;

use std::{
  sync::Arc,
  time::{Duration, Instant},
};

use axum::{
  Json, Router,
  extract::{Request, State},
  http::{HeaderMap, StatusCode, header},
  middleware::{self, Next},
  response::{IntoResponse, Response, Sse, sse::KeepAlive},
  routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};

pub use error::{ApiError, READ_ONLY_MESSAGE};
pub use gate::{REBUILD_TRIGGER_PATH, admission_gate, is_mutating};
pub use stream::status_stream;

use crate::{
  coordinator::{RebuildCoordinator, RequestOutcome, RunOutcome},
  domain::{request::ProjectionSet, status::RebuildStatus},
  engine::SimulatedEngine,
};

#[derive(Clone)]
pub struct ApiState {
  pub coordinator: Arc<RebuildCoordinator>,
  /// Event store behind the demo write route.
  pub events: SimulatedEngine,
  /// Store poll cadence of the status feed.
  pub poll_interval: Duration,
  /// Ends open status feeds on shutdown.
  pub shutdown: CancellationToken,
}

/// Body of `POST /rebuild/run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RunResponse {
  Inline { status: RebuildStatus },
  NotLeader,
  Broadcast,
  AlreadyRunning,
}

impl From<RequestOutcome> for RunResponse {
  fn from(outcome: RequestOutcome) -> Self {
    match outcome {
      RequestOutcome::Inline(RunOutcome::Finished(status)) => RunResponse::Inline { status },
      RequestOutcome::Inline(RunOutcome::NotLeader) => RunResponse::NotLeader,
      RequestOutcome::Broadcast => RunResponse::Broadcast,
      RequestOutcome::AlreadyRunning => RunResponse::AlreadyRunning,
    }
  }
}

/// Body of `POST /events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAppended {
  pub sequence: u64,
}

/// Events appended by `POST /seed`.
pub const SEED_EVENT_COUNT: u64 = 100_000;

/// Body of `POST /seed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsSeeded {
  pub count: u64,
  /// Sequence of the last appended event.
  pub sequence: u64,
}

pub fn router(state: ApiState) -> Router {
  Router::new()
    .route("/rebuild/projections", get(list_projections))
    .route(REBUILD_TRIGGER_PATH, post(run_rebuild))
    .route("/rebuild/status", get(rebuild_status))
    .route("/events", post(append_event))
    .route("/seed", post(seed_events))
    .layer(middleware::from_fn_with_state(state.coordinator.clone(), admission_gate))
    .layer(middleware::from_fn(trace_request))
    .with_state(state)
}

async fn list_projections(State(state): State<ApiState>) -> Json<Vec<String>> {
  Json(state.coordinator.projections())
}

async fn run_rebuild(
  State(state): State<ApiState>,
  Json(projections): Json<ProjectionSet>,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
  // Detached so an inline run still resumes processing if the client goes away
  let coordinator = state.coordinator.clone();
  let outcome = tokio::spawn(async move { coordinator.request_rebuild(projections).await })
    .await
    .map_err(|e| ApiError::Internal(format!("Rebuild task failed: {e}")))??;

  let code = match outcome {
    RequestOutcome::Broadcast => StatusCode::ACCEPTED,
    _ => StatusCode::OK,
  };
  Ok((code, Json(outcome.into())))
}

async fn rebuild_status(State(state): State<ApiState>, headers: HeaderMap) -> Result<Response, ApiError> {
  if wants_event_stream(&headers) {
    let stream = status_stream(state.coordinator.clone(), state.poll_interval, state.shutdown.clone());
    return Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response());
  }

  Ok(Json(state.coordinator.status().await?).into_response())
}

async fn append_event(State(state): State<ApiState>) -> (StatusCode, Json<EventAppended>) {
  let sequence = state.events.append_event();
  (StatusCode::CREATED, Json(EventAppended { sequence }))
}

async fn seed_events(State(state): State<ApiState>) -> (StatusCode, Json<EventsSeeded>) {
  let sequence = state.events.append_events(SEED_EVENT_COUNT);
  info!(count = SEED_EVENT_COUNT, sequence, "Seeded events");
  (
    StatusCode::CREATED,
    Json(EventsSeeded {
      count: SEED_EVENT_COUNT,
      sequence,
    }),
  )
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
  headers
    .get(header::ACCEPT)
    .and_then(|h| h.to_str().ok())
    .is_some_and(|accept| accept.contains("text/event-stream"))
}

async fn trace_request(request: Request, next: Next) -> Response {
  let span = info_span!("http", method = %request.method(), path = %request.uri().path());

  async move {
    let started = Instant::now();
    let response = next.run(request).await;
    debug!(
      status = response.status().as_u16(),
      elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
      "Request handled"
    );
    response
  }
  .instrument(span)
  .await
}
