//! Shared rebuild status slot.
//!
//! The whole cluster shares one status record under [`STATUS_KEY`]. Each write
//! carries its own lifetime; once it elapses the record reads back as
//! `Unknown`, so a crashed rebuild cannot hold the cluster read-only forever.
//!
//! Change notification is node-local: only listeners attached to the store
//! that performed the write are pushed the new value. Other nodes see it on
//! their next [`StatusStore::get`].

use std::{
  sync::{Arc, Mutex, Weak},
  time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
  backend::{CacheBackend, CacheError},
  listener::{ListenerSlot, StatusListener},
};
use crate::{
  clock::{Clock, SystemClock},
  domain::status::RebuildStatus,
};

/// Well-known key of the cluster-wide status record.
pub const STATUS_KEY: &str = "rebuild:status";

#[derive(Debug, Serialize, Deserialize)]
struct StoredStatus {
  status: RebuildStatus,
  expires_at: DateTime<Utc>,
}

pub struct StatusStore {
  backend: Arc<dyn CacheBackend>,
  clock: Arc<dyn Clock>,
  listeners: Mutex<Vec<Weak<ListenerSlot>>>,
}

impl StatusStore {
  pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
    Self::with_clock(backend, Arc::new(SystemClock))
  }

  pub fn with_clock(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
    Self {
      backend,
      clock,
      listeners: Mutex::new(Vec::new()),
    }
  }

  pub fn clock(&self) -> &Arc<dyn Clock> {
    &self.clock
  }

  /// Read the current status, `Unknown` when absent or expired.
  pub async fn get(&self) -> Result<RebuildStatus, CacheError> {
    let Some(bytes) = self.backend.get(STATUS_KEY).await? else {
      return Ok(RebuildStatus::Unknown);
    };

    let stored: StoredStatus = match serde_json::from_slice(&bytes) {
      Ok(stored) => stored,
      Err(e) => {
        warn!("Discarding undecodable rebuild status: {}", e);
        return Ok(RebuildStatus::Unknown);
      }
    };

    if stored.expires_at <= self.clock.now() {
      debug!(state = stored.status.state(), "Rebuild status expired");
      return Ok(RebuildStatus::Unknown);
    }

    Ok(stored.status)
  }

  /// Overwrite the status for `ttl`, then notify local listeners.
  pub async fn put(&self, status: RebuildStatus, ttl: Duration) -> Result<(), CacheError> {
    let stored = StoredStatus {
      expires_at: self.clock.deadline(ttl),
      status,
    };
    let bytes = serde_json::to_vec(&stored)?;
    self.backend.put(STATUS_KEY, bytes, ttl).await?;

    debug!(state = stored.status.state(), ttl_secs = ttl.as_secs(), "Rebuild status written");
    self.notify(&stored.status);
    Ok(())
  }

  pub async fn is_rebuilding(&self) -> Result<bool, CacheError> {
    Ok(self.get().await?.is_running())
  }

  /// Attach a listener for statuses written through this store.
  pub fn listen(&self) -> StatusListener {
    let slot = Arc::new(ListenerSlot::default());
    self.lock_listeners().push(Arc::downgrade(&slot));
    StatusListener::new(slot)
  }

  /// Number of attached listeners.
  pub fn listener_count(&self) -> usize {
    let mut listeners = self.lock_listeners();
    listeners.retain(|slot| slot.upgrade().is_some_and(|s| !s.is_closed()));
    listeners.len()
  }

  fn notify(&self, status: &RebuildStatus) {
    let mut listeners = self.lock_listeners();
    listeners.retain(|weak| match weak.upgrade() {
      Some(slot) if !slot.is_closed() => {
        slot.offer(status.clone());
        true
      }
      _ => false,
    });
  }

  fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<Weak<ListenerSlot>>> {
    self.listeners.lock().unwrap_or_else(|e| e.into_inner())
  }
}
