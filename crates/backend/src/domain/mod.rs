//! Domain types - core business entities
//!
//! These types describe rebuild requests, the shared rebuild status and the
//! node configuration. They are independent of the cache, bus and HTTP layers.

pub mod config;
pub mod node;
pub mod request;
pub mod status;
