//! Cluster-wide rebuild request fan-out.
//!
//! A [`RebuildRequested`] event must reach every node, once per node. Each
//! node attaches its own exclusive subscription and evaluates the request
//! itself; leadership gating happens later, inside the coordinator.

pub mod consumer;
pub mod local;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub use consumer::RebuildConsumer;
pub use local::LocalBus;

use crate::domain::{node::NodeId, request::ProjectionSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildRequested {
  pub projections: ProjectionSet,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
  #[error("Broker unavailable: {0}")]
  Unavailable(String),
  #[error("Serialization error: {0}")]
  Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait RebuildBus: Send + Sync {
  async fn publish(&self, event: RebuildRequested) -> Result<(), BusError>;

  /// Open an exclusive subscription for `node`. Every subscription receives
  /// every event published after it was opened.
  fn subscribe(&self, node: &NodeId) -> BoxStream<'static, RebuildRequested>;
}
