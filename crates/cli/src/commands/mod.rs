//! CLI command implementations

mod config;
mod rebuild;
mod serve;

pub use config::{cmd_config_init, cmd_config_show};
pub use rebuild::{cmd_projections, cmd_run, cmd_status};
pub use serve::cmd_serve;
