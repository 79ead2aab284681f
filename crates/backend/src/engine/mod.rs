//! Projection engine collaborator.
//!
//! The event store and its projection machinery live outside this crate. The
//! coordinator drives them through two traits:
//!
//! - [`ProjectionEngine`]: the node's continuous processing (pause/resume) and
//!   a factory for dedicated rebuild daemons
//! - [`RebuildDaemon`]: a rebuild-only processing engine that replays
//!   projections and reports per-shard progress to [`ShardObserver`]s
//!
//! Shard failures are reported through observers, not returned, so one failing
//! shard never aborts the remaining rebuild work.

pub mod simulated;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use simulated::SimulatedEngine;

#[async_trait]
pub trait ProjectionEngine: Send + Sync {
  /// Names of every registered projection.
  fn projections(&self) -> Vec<String>;

  /// Stop continuous projection processing on this node.
  async fn pause_all_processing(&self) -> Result<(), EngineError>;

  /// Restart continuous projection processing on this node.
  async fn resume_all_processing(&self) -> Result<(), EngineError>;

  /// Start a processing engine dedicated to rebuilds.
  async fn build_rebuild_daemon(&self) -> Result<Box<dyn RebuildDaemon>, EngineError>;
}

#[async_trait]
pub trait RebuildDaemon: Send + Sync {
  fn subscribe(&self, observer: Arc<dyn ShardObserver>);

  /// Tear down and replay `projection`.
  async fn rebuild_projection(
    &self,
    projection: &str,
    shard_timeout: Duration,
    cancel: CancellationToken,
  ) -> Result<(), EngineError>;

  /// Stop every shard started by this daemon.
  async fn stop_all(&self) -> Result<(), EngineError>;
}

/// Receives shard progress from a [`RebuildDaemon`].
pub trait ShardObserver: Send + Sync {
  fn on_shard_state(&self, state: &ShardState);
}

/// Progress report for one shard of a projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardState {
  pub projection: String,
  pub shard: String,
  /// Highest event sequence processed by the shard.
  pub sequence: u64,
  pub failure: Option<ShardFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFailure {
  /// Error classification, surfaced to operators as `errorKind`.
  pub kind: String,
  pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
  #[error("Unknown projection: {0}")]
  UnknownProjection(String),
  #[error("Rebuild of {projection} timed out after {timeout:?}")]
  Timeout { projection: String, timeout: Duration },
  #[error("Rebuild cancelled")]
  Cancelled,
  #[error("Shard {shard} failed ({kind}): {message}")]
  Shard {
    shard: String,
    kind: String,
    message: String,
  },
  #[error("Projection engine unavailable: {0}")]
  Unavailable(String),
  #[error("Rebuild panicked: {0}")]
  Panic(String),
}

impl EngineError {
  /// Error classification reported in an `Errored` status.
  pub fn kind(&self) -> &str {
    match self {
      EngineError::UnknownProjection(_) => "UnknownProjection",
      EngineError::Timeout { .. } => "Timeout",
      EngineError::Cancelled => "Cancelled",
      EngineError::Shard { kind, .. } => kind,
      EngineError::Unavailable(_) => "Unavailable",
      EngineError::Panic(_) => "Panic",
    }
  }
}
