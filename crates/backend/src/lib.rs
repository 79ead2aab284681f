pub mod bus;
pub mod cache;
pub mod clock;
pub mod coordinator;
pub mod engine;
pub mod http;
pub mod leader;

mod domain;
pub use domain::{config, node, request, status};

pub mod dirs;

mod daemon;
pub use daemon::{Daemon, DaemonError, RuntimeConfig};
