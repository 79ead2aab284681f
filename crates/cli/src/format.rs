//! Human-readable rendering of rebuild statuses.

use rebuildd::{http::RunResponse, status::RebuildStatus};

pub fn format_status(status: &RebuildStatus) -> String {
  match status {
    RebuildStatus::Unknown => "Unknown (no rebuild activity)".to_string(),
    s if s.is_pending() => "Running (preparing)".to_string(),
    RebuildStatus::Running { projection } => format!("Running: {}", projection),
    RebuildStatus::Errored {
      projection,
      occurred_at,
      error_kind,
    } => {
      let projection = if projection.is_empty() { "<none>" } else { projection };
      format!(
        "Errored: {} ({}) at {}",
        projection,
        error_kind,
        occurred_at.format("%Y-%m-%d %H:%M:%S UTC")
      )
    }
    RebuildStatus::Completed {
      projections,
      finished_at,
      elapsed,
    } => format!(
      "Completed: {} in {:.1}s at {}",
      projections,
      elapsed.as_secs_f64(),
      finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    ),
  }
}

pub fn format_run(response: &RunResponse) -> String {
  match response {
    RunResponse::Inline { status } => format_status(status),
    RunResponse::NotLeader => "Ignored: this node does not lead processing".to_string(),
    RunResponse::Broadcast => "Rebuild requested; follow with `rebuildd status --watch`".to_string(),
    RunResponse::AlreadyRunning => "A rebuild is already running; request ignored".to_string(),
  }
}
