//! Logging setup for CLI commands and the node

use rebuildd::{config::DaemonConfig, dirs};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "rebuildd.log";

/// Initialize logging for client commands (console, warnings only)
pub fn init_cli_logging() {
  let env_filter = EnvFilter::builder()
    .with_default_directive(tracing::Level::WARN.into())
    .from_env_lossy();
  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_writer(std::io::stderr)
    .init();
}

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

/// Initialize logging for a serving node.
///
/// Logs to the console with colors, or to a rolling file under the data
/// directory when `log_to_file` is set. `RUST_LOG` overrides the level.
///
/// Returns the guard that must be kept alive for the duration of the program
pub fn init_node_logging(config: &DaemonConfig) -> Option<WorkerGuard> {
  let level = parse_log_level(&config.log_level);
  let env_filter = EnvFilter::builder()
    .with_default_directive(level.into())
    .from_env_lossy();

  if !config.log_to_file {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_ansi(true)
      .init();
    return None;
  }

  let log_dir = dirs::default_data_dir();
  if std::fs::create_dir_all(&log_dir).is_err() {
    // Fall back to console-only logging
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    return None;
  }

  let file_appender = match config.log_rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(&log_dir, LOG_FILE),
    "never" => tracing_appender::rolling::never(&log_dir, LOG_FILE),
    _ => tracing_appender::rolling::daily(&log_dir, LOG_FILE),
  };

  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_log_level() {
    assert_eq!(parse_log_level("DEBUG"), tracing::Level::DEBUG);
    assert_eq!(parse_log_level("off"), tracing::Level::ERROR);
    assert_eq!(parse_log_level("bogus"), tracing::Level::INFO);
  }
}
