//! Leadership of continuous projection processing.
//!
//! In a hot/cold deployment exactly one node processes projections. The
//! [`LeaderProbe`] answers whether that node is us, and pauses/resumes local
//! processing around a rebuild.

pub mod lease;

use std::sync::Arc;

use async_trait::async_trait;

pub use lease::{Lease, LeaseElector, LeaseLeaderProbe};

use crate::engine::{EngineError, ProjectionEngine};

#[async_trait]
pub trait LeaderProbe: Send + Sync {
  /// True iff this node currently owns continuous projection processing.
  async fn is_local_leader(&self) -> bool;

  async fn pause_local(&self) -> Result<(), EngineError>;

  async fn resume_local(&self) -> Result<(), EngineError>;
}

/// Probe for single-node deployments: this node always owns processing.
pub struct SoloLeaderProbe {
  engine: Arc<dyn ProjectionEngine>,
}

impl SoloLeaderProbe {
  pub fn new(engine: Arc<dyn ProjectionEngine>) -> Self {
    Self { engine }
  }
}

#[async_trait]
impl LeaderProbe for SoloLeaderProbe {
  async fn is_local_leader(&self) -> bool {
    true
  }

  async fn pause_local(&self) -> Result<(), EngineError> {
    self.engine.pause_all_processing().await
  }

  async fn resume_local(&self) -> Result<(), EngineError> {
    self.engine.resume_all_processing().await
  }
}
