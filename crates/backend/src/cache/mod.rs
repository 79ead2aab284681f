//! Shared status storage.
//!
//! - [`CacheBackend`]: replicated key-value backend (in-process [`MokaBackend`] provided)
//! - [`StatusStore`]: the single cluster-wide rebuild status with TTL
//! - [`StatusListener`]: coalescing feed of status changes written by this node

mod backend;
mod listener;
mod status;

pub use backend::{CacheBackend, CacheError, MokaBackend};
pub use listener::StatusListener;
pub use status::{STATUS_KEY, StatusStore};
