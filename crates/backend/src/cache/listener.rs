//! Coalescing listener for local status changes.
//!
//! Each listener owns a single slot. A new status overwrites whatever is still
//! waiting there, so a slow consumer always ends up with the latest status and
//! never with a backlog.

use std::sync::{
  Arc, Mutex,
  atomic::{AtomicBool, Ordering},
};

use tokio::sync::Notify;

use crate::domain::status::RebuildStatus;

#[derive(Debug, Default)]
pub(crate) struct ListenerSlot {
  pending: Mutex<Option<RebuildStatus>>,
  notify: Notify,
  closed: AtomicBool,
}

impl ListenerSlot {
  /// Offer a status, dropping any undelivered one.
  pub(crate) fn offer(&self, status: RebuildStatus) {
    if self.is_closed() {
      return;
    }
    *self.lock() = Some(status);
    self.notify.notify_one();
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  fn close(&self) {
    self.closed.store(true, Ordering::Release);
    self.lock().take();
    self.notify.notify_one();
  }

  fn take(&self) -> Option<RebuildStatus> {
    self.lock().take()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Option<RebuildStatus>> {
    self.pending.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Receives status changes written by this node.
///
/// Writes made by other nodes are not pushed here; see
/// [`StatusStore`](super::StatusStore) for the polling side. Dropping the
/// listener detaches it from the store.
#[derive(Debug)]
pub struct StatusListener {
  slot: Arc<ListenerSlot>,
}

impl StatusListener {
  pub(crate) fn new(slot: Arc<ListenerSlot>) -> Self {
    Self { slot }
  }

  /// Wait for the next status. Returns `None` once detached.
  pub async fn next_update(&self) -> Option<RebuildStatus> {
    loop {
      if let Some(status) = self.slot.take() {
        return Some(status);
      }
      if self.slot.is_closed() {
        return None;
      }
      self.slot.notify.notified().await;
    }
  }

  /// Take the waiting status without blocking.
  pub fn try_next(&self) -> Option<RebuildStatus> {
    self.slot.take()
  }

  /// Number of undelivered statuses (0 or 1).
  pub fn pending(&self) -> usize {
    usize::from(self.slot.lock().is_some())
  }

  /// Stop listening and release the slot.
  pub fn detach(self) {
    drop(self);
  }
}

impl Drop for StatusListener {
  fn drop(&mut self) {
    self.slot.close();
  }
}
