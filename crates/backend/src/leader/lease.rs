//! Lease-based leader election.
//!
//! Nodes compete for a lease record in the shared cache. The holder renews it
//! on every heartbeat; if it stops renewing (crash, partition) the lease
//! expires and another node takes over on its next heartbeat.
//!
//! With an engine attached, the heartbeat also hands continuous processing
//! over: it resumes processing when this node gains the lease and pauses it
//! when the lease is lost or released.

use std::{
  sync::{Arc, Mutex},
  time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::LeaderProbe;
use crate::{
  cache::{CacheBackend, CacheError},
  clock::Clock,
  domain::node::NodeId,
  engine::{EngineError, ProjectionEngine},
};

/// Key of the leadership lease record.
pub const LEASE_KEY: &str = "rebuild:leader";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
  pub holder: NodeId,
  pub expires_at: DateTime<Utc>,
}

pub struct LeaseElector {
  node: NodeId,
  backend: Arc<dyn CacheBackend>,
  clock: Arc<dyn Clock>,
  ttl: Duration,
  /// Expiry of the lease as last written by us.
  held_until: Mutex<Option<DateTime<Utc>>>,
  /// Continuous processing owned by the lease holder.
  engine: Option<Arc<dyn ProjectionEngine>>,
}

impl LeaseElector {
  pub fn new(node: NodeId, backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
    Self {
      node,
      backend,
      clock,
      ttl,
      held_until: Mutex::new(None),
      engine: None,
    }
  }

  /// Run continuous processing on `engine` only while this node holds the lease.
  pub fn with_engine(mut self, engine: Arc<dyn ProjectionEngine>) -> Self {
    self.engine = Some(engine);
    self
  }

  pub fn node(&self) -> &NodeId {
    &self.node
  }

  /// The unexpired lease, whoever holds it.
  pub async fn current(&self) -> Result<Option<Lease>, CacheError> {
    let (lease, _) = self.read().await?;
    Ok(lease.filter(|l| l.expires_at > self.clock.now()))
  }

  /// Acquire the lease if it is free or expired, or renew it if we hold it.
  pub async fn try_acquire(&self) -> Result<bool, CacheError> {
    let (current, raw) = self.read().await?;
    let now = self.clock.now();

    let available = match &current {
      None => true,
      Some(lease) => lease.holder == self.node || lease.expires_at <= now,
    };
    if !available {
      self.set_held(None);
      return Ok(false);
    }

    let lease = Lease {
      holder: self.node.clone(),
      expires_at: self.clock.deadline(self.ttl),
    };
    let acquired = self
      .backend
      .put_if(LEASE_KEY, raw.as_deref(), serde_json::to_vec(&lease)?, self.ttl)
      .await?;

    self.set_held(acquired.then_some(lease.expires_at));
    Ok(acquired)
  }

  /// Whether we hold an unexpired lease.
  pub fn is_leader(&self) -> bool {
    let held_until = *self.held_until.lock().unwrap_or_else(|e| e.into_inner());
    held_until.is_some_and(|until| until > self.clock.now())
  }

  /// Give the lease up so another node can take over immediately.
  pub async fn release(&self) -> Result<(), CacheError> {
    let (current, raw) = self.read().await?;
    self.set_held(None);

    if current.is_some_and(|lease| lease.holder == self.node) {
      let expired = Lease {
        holder: self.node.clone(),
        expires_at: self.clock.now(),
      };
      self
        .backend
        .put_if(LEASE_KEY, raw.as_deref(), serde_json::to_vec(&expired)?, Duration::from_secs(1))
        .await?;
      info!(node = %self.node, "Released leadership lease");
    }
    Ok(())
  }

  /// Renew or contend for the lease every `interval` until cancelled.
  pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
    let mut heartbeat = tokio::time::interval(interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut was_leader: Option<bool> = None;

    info!(node = %self.node, ttl_secs = self.ttl.as_secs(), "Lease heartbeat started");

    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          debug!("Lease heartbeat shutting down (cancelled)");
          break;
        }

        _ = heartbeat.tick() => {
          if let Err(e) = self.try_acquire().await {
            warn!(node = %self.node, error = %e, "Lease heartbeat failed");
          }

          let is_leader = self.is_leader();
          if was_leader != Some(is_leader) {
            match (was_leader, is_leader) {
              (_, true) => info!(node = %self.node, "Acquired leadership"),
              (Some(true), false) => warn!(node = %self.node, "Lost leadership"),
              _ => debug!(node = %self.node, "Following current leader"),
            }
            self.hand_over(is_leader).await;
          }
          was_leader = Some(is_leader);
        }
      }
    }

    if let Err(e) = self.release().await {
      warn!(node = %self.node, error = %e, "Failed to release lease");
    }
    self.hand_over(false).await;
  }

  /// Start or stop continuous processing to match leadership.
  async fn hand_over(&self, leading: bool) {
    let Some(engine) = &self.engine else {
      return;
    };

    let result = if leading {
      engine.resume_all_processing().await
    } else {
      engine.pause_all_processing().await
    };
    if let Err(e) = result {
      error!(node = %self.node, leading, error = %e, "Failed to hand over continuous processing");
    }
  }

  async fn read(&self) -> Result<(Option<Lease>, Option<Vec<u8>>), CacheError> {
    let raw = self.backend.get(LEASE_KEY).await?;
    let lease = raw.as_deref().and_then(|bytes| match serde_json::from_slice::<Lease>(bytes) {
      Ok(lease) => Some(lease),
      Err(e) => {
        warn!("Ignoring undecodable lease record: {}", e);
        None
      }
    });
    Ok((lease, raw))
  }

  fn set_held(&self, until: Option<DateTime<Utc>>) {
    *self.held_until.lock().unwrap_or_else(|e| e.into_inner()) = until;
  }
}

/// Leader probe backed by a [`LeaseElector`].
pub struct LeaseLeaderProbe {
  elector: Arc<LeaseElector>,
  engine: Arc<dyn ProjectionEngine>,
}

impl LeaseLeaderProbe {
  pub fn new(elector: Arc<LeaseElector>, engine: Arc<dyn ProjectionEngine>) -> Self {
    Self { elector, engine }
  }
}

#[async_trait]
impl LeaderProbe for LeaseLeaderProbe {
  async fn is_local_leader(&self) -> bool {
    self.elector.is_leader()
  }

  async fn pause_local(&self) -> Result<(), EngineError> {
    self.engine.pause_all_processing().await
  }

  /// Resumes only while the lease is held; a node that lost it mid-rebuild
  /// leaves processing to the new leader.
  async fn resume_local(&self) -> Result<(), EngineError> {
    if !self.elector.is_leader() {
      warn!(node = %self.elector.node(), "Lease no longer held, leaving continuous processing paused");
      return Ok(());
    }
    self.engine.resume_all_processing().await
  }
}
