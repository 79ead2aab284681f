//! Shared key-value backend for status and lease records.
//!
//! The coordinator only needs get/put-with-ttl plus a compare-and-put for the
//! leader lease. Replication across nodes is the backend's concern; values are
//! opaque bytes and the last write wins.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use moka::{Expiry, future::Cache};
use tokio::sync::Mutex;

#[async_trait]
pub trait CacheBackend: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

  async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

  /// Write `value` only if the current value equals `expected` (`None` = absent).
  ///
  /// Returns whether the write happened.
  async fn put_if(&self, key: &str, expected: Option<&[u8]>, value: Vec<u8>, ttl: Duration)
  -> Result<bool, CacheError>;

  async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
  #[error("Cache backend unavailable: {0}")]
  Unavailable(String),
  #[error("Ser/de error: {0}")]
  Serde(String),
}

impl From<serde_json::Error> for CacheError {
  fn from(err: serde_json::Error) -> Self {
    CacheError::Serde(err.to_string())
  }
}

// ============================================================================
// In-process backend
// ============================================================================

#[derive(Clone)]
struct CacheEntry {
  value: Arc<Vec<u8>>,
  ttl: Duration,
}

/// Expires every entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, CacheEntry> for PerEntryTtl {
  fn expire_after_create(&self, _key: &String, value: &CacheEntry, _created_at: std::time::Instant) -> Option<Duration> {
    Some(value.ttl)
  }

  fn expire_after_update(
    &self,
    _key: &String,
    value: &CacheEntry,
    _updated_at: std::time::Instant,
    _duration_until_expiry: Option<Duration>,
  ) -> Option<Duration> {
    Some(value.ttl)
  }
}

/// In-process backend built on a moka cache with per-entry TTL.
///
/// Shared by every node running in the same process (tests, single-binary
/// deployments). Multi-process deployments plug a replicated backend in
/// through [`CacheBackend`].
pub struct MokaBackend {
  cache: Cache<String, CacheEntry>,
  /// Serializes compare-and-put against plain writes.
  write_lock: Mutex<()>,
}

impl MokaBackend {
  /// Create a backend with default settings.
  ///
  /// Default capacity: 1024 keys
  pub fn new() -> Self {
    Self::with_capacity(1024)
  }

  pub fn with_capacity(capacity: u64) -> Self {
    Self {
      cache: Cache::builder()
        .max_capacity(capacity)
        .expire_after(PerEntryTtl)
        .build(),
      write_lock: Mutex::new(()),
    }
  }

  fn entry(value: Vec<u8>, ttl: Duration) -> CacheEntry {
    CacheEntry {
      value: Arc::new(value),
      ttl,
    }
  }
}

impl Default for MokaBackend {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl CacheBackend for MokaBackend {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
    Ok(self.cache.get(key).await.map(|entry| entry.value.as_ref().clone()))
  }

  async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
    let _guard = self.write_lock.lock().await;
    self.cache.insert(key.to_string(), Self::entry(value, ttl)).await;
    Ok(())
  }

  async fn put_if(
    &self,
    key: &str,
    expected: Option<&[u8]>,
    value: Vec<u8>,
    ttl: Duration,
  ) -> Result<bool, CacheError> {
    let _guard = self.write_lock.lock().await;
    let current = self.cache.get(key).await;
    let matches = match (&current, expected) {
      (None, None) => true,
      (Some(entry), Some(expected)) => entry.value.as_slice() == expected,
      _ => false,
    };

    if matches {
      self.cache.insert(key.to_string(), Self::entry(value, ttl)).await;
    }
    Ok(matches)
  }

  async fn remove(&self, key: &str) -> Result<(), CacheError> {
    let _guard = self.write_lock.lock().await;
    self.cache.invalidate(key).await;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_put_get_remove() {
    let backend = MokaBackend::new();
    assert_eq!(backend.get("k").await.unwrap(), None);

    backend.put("k", b"one".to_vec(), Duration::from_secs(60)).await.unwrap();
    assert_eq!(backend.get("k").await.unwrap(), Some(b"one".to_vec()));

    backend.put("k", b"two".to_vec(), Duration::from_secs(60)).await.unwrap();
    assert_eq!(backend.get("k").await.unwrap(), Some(b"two".to_vec()));

    backend.remove("k").await.unwrap();
    assert_eq!(backend.get("k").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_put_if_compares_current_value() {
    let backend = MokaBackend::new();
    let ttl = Duration::from_secs(60);

    assert!(backend.put_if("lease", None, b"a".to_vec(), ttl).await.unwrap());
    // Already present: an absent-expectation no longer matches
    assert!(!backend.put_if("lease", None, b"b".to_vec(), ttl).await.unwrap());
    // Stale expectation loses
    assert!(!backend.put_if("lease", Some(b"x"), b"b".to_vec(), ttl).await.unwrap());
    assert!(backend.put_if("lease", Some(b"a"), b"b".to_vec(), ttl).await.unwrap());
    assert_eq!(backend.get("lease").await.unwrap(), Some(b"b".to_vec()));
  }

  #[tokio::test]
  async fn test_entries_expire_after_ttl() {
    let backend = MokaBackend::new();
    backend.put("short", b"v".to_vec(), Duration::from_millis(20)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(backend.get("short").await.unwrap(), None);
  }
}
