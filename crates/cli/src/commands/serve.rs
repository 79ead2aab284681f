//! Serve command

use anyhow::{Context, Result};
use rebuildd::{Daemon, RuntimeConfig};
use tracing::info;

/// Run a node in the foreground until ctrl-c
pub async fn cmd_serve(runtime_config: RuntimeConfig) -> Result<()> {
  info!("Starting rebuildd node {}", runtime_config.node);
  Daemon::new(runtime_config).run().await.context("Failed to run node")?;
  Ok(())
}
