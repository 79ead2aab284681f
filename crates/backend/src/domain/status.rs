//! Cluster-wide rebuild status.
//!
//! A single [`RebuildStatus`] value is authoritative for the whole cluster. It
//! is written by the coordinator at each phase transition and read by the
//! admission gate, the status stream and operators.
//!
//! Wire shape is a tagged object with a `state` discriminant:
//!
//! ```text
//! {"state":"Unknown"}
//! {"state":"Running","projection":"Weather"}
//! {"state":"Errored","projection":"Weather","occurredAt":"...","errorKind":"Timeout"}
//! {"state":"Completed","projections":["Weather"],"finishedAt":"...","elapsed":1520}
//! ```
//!
//! `elapsed` is serialized as whole milliseconds.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::ProjectionSet;

/// Projection name written while a rebuild is being prepared (leader
/// confirmed, continuous processing pausing) but no projection has started.
pub const PENDING_PROJECTION: &str = "**PENDING**";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all_fields = "camelCase")]
pub enum RebuildStatus {
  /// No rebuild activity is known (never ran, or the last status expired).
  #[default]
  Unknown,
  Running {
    projection: String,
  },
  Errored {
    projection: String,
    occurred_at: DateTime<Utc>,
    error_kind: String,
  },
  Completed {
    projections: ProjectionSet,
    finished_at: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    elapsed: Duration,
  },
}

impl RebuildStatus {
  pub fn pending() -> Self {
    Self::Running {
      projection: PENDING_PROJECTION.to_string(),
    }
  }

  pub fn running(projection: impl Into<String>) -> Self {
    Self::Running {
      projection: projection.into(),
    }
  }

  /// `Completed`, with `elapsed` truncated to the whole milliseconds it is
  /// stored as.
  pub fn completed(projections: ProjectionSet, finished_at: DateTime<Utc>, elapsed: Duration) -> Self {
    let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    Self::Completed {
      projections,
      finished_at,
      elapsed: Duration::from_millis(millis),
    }
  }

  /// True for `Running`, including the pending phase.
  pub fn is_running(&self) -> bool {
    matches!(self, Self::Running { .. })
  }

  pub fn is_pending(&self) -> bool {
    matches!(self, Self::Running { projection } if projection == PENDING_PROJECTION)
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Errored { .. } | Self::Completed { .. })
  }

  pub fn state(&self) -> &'static str {
    match self {
      Self::Unknown => "Unknown",
      Self::Running { .. } => "Running",
      Self::Errored { .. } => "Errored",
      Self::Completed { .. } => "Completed",
    }
  }
}

mod duration_millis {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_millis(u64::deserialize(deserializer)?))
  }
}
