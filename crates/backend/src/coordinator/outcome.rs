//! Per-projection results of a rebuild run.

use std::sync::Mutex;

use tracing::warn;

use crate::engine::{ShardFailure, ShardObserver, ShardState};

/// Result of rebuilding a single projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardOutcome {
  Succeeded,
  Failed(ShardFailure),
}

/// Captures shard failures reported during a run.
///
/// Subscribed to the rebuild daemon as an observer and also fed synchronous
/// errors by the coordinator. Only the first failure is kept for the final
/// status; later ones are logged.
#[derive(Debug, Default)]
pub struct FailureCollector {
  first: Mutex<Option<(String, ShardFailure)>>,
  count: Mutex<usize>,
}

impl FailureCollector {
  pub fn record(&self, projection: &str, failure: ShardFailure) {
    warn!(projection, kind = %failure.kind, message = %failure.message, "Projection rebuild failure captured");
    *self.count.lock().unwrap_or_else(|e| e.into_inner()) += 1;

    let mut first = self.first.lock().unwrap_or_else(|e| e.into_inner());
    if first.is_none() {
      *first = Some((projection.to_string(), failure));
    }
  }

  /// Projection and failure of the earliest captured failure.
  pub fn first(&self) -> Option<(String, ShardFailure)> {
    self.first.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  pub fn count(&self) -> usize {
    *self.count.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl ShardObserver for FailureCollector {
  fn on_shard_state(&self, state: &ShardState) {
    if let Some(failure) = &state.failure {
      self.record(&state.projection, failure.clone());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn failure(kind: &str) -> ShardFailure {
    ShardFailure {
      kind: kind.into(),
      message: "boom".into(),
    }
  }

  #[test]
  fn test_first_failure_wins() {
    let collector = FailureCollector::default();
    assert!(collector.first().is_none());

    collector.on_shard_state(&ShardState {
      projection: "Weather".into(),
      shard: "Weather:All".into(),
      sequence: 3,
      failure: None,
    });
    assert_eq!(collector.count(), 0);

    collector.on_shard_state(&ShardState {
      projection: "Weather".into(),
      shard: "Weather:All".into(),
      sequence: 3,
      failure: Some(failure("InvalidEvent")),
    });
    collector.record("Orders", failure("Timeout"));

    assert_eq!(collector.count(), 2);
    assert_eq!(collector.first(), Some(("Weather".to_string(), failure("InvalidEvent"))));
  }
}
