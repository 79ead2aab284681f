//! Configuration system for rebuildd.
//!
//! Config priority: explicit path > ./rebuildd.toml > user (~/.config/rebuildd/config.toml) > defaults

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::status::RebuildStatus;
use crate::dirs;

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "rebuildd.toml";

// ============================================================================
// Node Configuration
// ============================================================================

/// How this node takes part in projection processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeMode {
  /// Continuous processing is disabled; rebuilds run inline on the requesting node.
  Disabled,
  /// Single-node deployment; rebuilds run inline on the requesting node.
  Solo,
  /// Hot/cold redundancy; rebuild requests are broadcast and only the leader runs them.
  #[default]
  HotCold,
}

impl NodeMode {
  /// Whether rebuild requests short-circuit to the local node.
  pub fn runs_inline(&self) -> bool {
    matches!(self, NodeMode::Disabled | NodeMode::Solo)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NodeConfig {
  /// Stable node identifier. Generated at startup when unset.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,

  /// Processing mode (default: hot_cold)
  pub mode: NodeMode,
}

// ============================================================================
// Server Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  /// HTTP listen address (default: 127.0.0.1:5080)
  pub bind: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      bind: "127.0.0.1:5080".to_string(),
    }
  }
}

// ============================================================================
// Status Configuration
// ============================================================================

/// Status store lifetimes. Every status write expires back to `Unknown`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
  /// TTL of the pending marker (default: 10 seconds)
  pub pending_ttl_secs: u64,

  /// TTL of a running status (default: 600 seconds)
  pub running_ttl_secs: u64,

  /// TTL of errored/completed statuses (default: 3600 seconds)
  pub terminal_ttl_secs: u64,

  /// How often the status stream re-reads the store (default: 1000 ms)
  pub poll_interval_ms: u64,

  /// Maximum entries held by the in-process cache backend (default: 1024)
  pub cache_capacity: u64,
}

impl Default for StatusConfig {
  fn default() -> Self {
    Self {
      pending_ttl_secs: 10,
      running_ttl_secs: 600,
      terminal_ttl_secs: 3600,
      poll_interval_ms: 1000,
      cache_capacity: 1024,
    }
  }
}

impl StatusConfig {
  pub fn ttl_policy(&self) -> TtlPolicy {
    TtlPolicy {
      pending: Duration::from_secs(self.pending_ttl_secs),
      running: Duration::from_secs(self.running_ttl_secs),
      terminal: Duration::from_secs(self.terminal_ttl_secs),
    }
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms.max(1))
  }
}

/// Per-phase status lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
  pub pending: Duration,
  pub running: Duration,
  pub terminal: Duration,
}

impl TtlPolicy {
  /// Lifetime of a status write in the given phase.
  pub fn ttl_for(&self, status: &RebuildStatus) -> Duration {
    match status {
      s if s.is_pending() => self.pending,
      RebuildStatus::Running { .. } => self.running,
      RebuildStatus::Errored { .. } | RebuildStatus::Completed { .. } | RebuildStatus::Unknown => self.terminal,
    }
  }
}

impl Default for TtlPolicy {
  fn default() -> Self {
    StatusConfig::default().ttl_policy()
  }
}

// ============================================================================
// Rebuild Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RebuildConfig {
  /// Upper bound for rebuilding a single projection (default: 600 seconds).
  /// Raise it if a single projection legitimately takes longer.
  pub shard_timeout_secs: u64,
}

impl Default for RebuildConfig {
  fn default() -> Self {
    Self { shard_timeout_secs: 600 }
  }
}

impl RebuildConfig {
  pub fn shard_timeout(&self) -> Duration {
    Duration::from_secs(self.shard_timeout_secs)
  }
}

// ============================================================================
// Leader Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderConfig {
  /// Lease lifetime; a crashed leader is replaced after at most this long (default: 15)
  pub lease_ttl_secs: u64,

  /// Lease renewal cadence, must be well below the TTL (default: 5)
  pub heartbeat_interval_secs: u64,
}

impl Default for LeaderConfig {
  fn default() -> Self {
    Self {
      lease_ttl_secs: 15,
      heartbeat_interval_secs: 5,
    }
  }
}

impl LeaderConfig {
  pub fn lease_ttl(&self) -> Duration {
    Duration::from_secs(self.lease_ttl_secs.max(1))
  }

  pub fn heartbeat_interval(&self) -> Duration {
    Duration::from_secs(self.heartbeat_interval_secs.max(1))
  }
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// A projection registered with the simulated engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionSpec {
  pub name: String,

  /// Simulated rebuild duration in milliseconds (default: 500)
  #[serde(default = "default_rebuild_millis")]
  pub rebuild_millis: u64,

  /// Number of shards reporting progress (default: 1)
  #[serde(default = "default_shards")]
  pub shards: u32,
}

fn default_rebuild_millis() -> u64 {
  500
}
fn default_shards() -> u32 {
  1
}

impl ProjectionSpec {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      rebuild_millis: default_rebuild_millis(),
      shards: default_shards(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub projections: Vec<ProjectionSpec>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      projections: vec![ProjectionSpec::new("Weather")],
    }
  }
}

// ============================================================================
// Daemon Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
  /// Log level: "error", "warn", "info", "debug", "trace"
  /// Default: "info"
  pub log_level: String,

  /// Log file rotation: "daily", "hourly", "never"
  /// Default: "daily"
  pub log_rotation: String,

  /// Write logs to the data directory instead of the console
  /// Default: false
  pub log_to_file: bool,
}

impl Default for DaemonConfig {
  fn default() -> Self {
    Self {
      log_level: "info".to_string(),
      log_rotation: "daily".to_string(),
      log_to_file: false,
    }
  }
}

// ============================================================================
// Root Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
  pub node: NodeConfig,
  pub server: ServerConfig,
  pub status: StatusConfig,
  pub rebuild: RebuildConfig,
  pub leader: LeaderConfig,
  pub engine: EngineConfig,
  pub daemon: DaemonConfig,
}

impl Config {
  /// Load configuration from an explicit file. Missing or malformed files are errors.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load configuration using the discovery order, falling back to defaults.
  pub fn discover(working_dir: &Path) -> Self {
    if let Some(config) = Self::load_discovered(&working_dir.join(LOCAL_CONFIG_FILE)) {
      return config;
    }

    if let Some(config) = Self::user_config_path().and_then(|path| Self::load_discovered(&path)) {
      return config;
    }

    Self::default()
  }

  /// A discovered config file, if present and valid. Unreadable or malformed
  /// files are logged and skipped.
  fn load_discovered(path: &Path) -> Option<Self> {
    if !path.exists() {
      return None;
    }
    match Self::load_from(path) {
      Ok(config) => Some(config),
      Err(e) => {
        warn!("Ignoring config file: {}", e);
        None
      }
    }
  }

  /// Load from `path` when given, otherwise discover from `working_dir`.
  pub fn load(path: Option<&Path>, working_dir: &Path) -> Result<Self, ConfigError> {
    match path {
      Some(path) => Self::load_from(path),
      None => Ok(Self::discover(working_dir)),
    }
  }

  /// Get the user config path (~/.config/rebuildd/config.toml)
  pub fn user_config_path() -> Option<PathBuf> {
    Some(dirs::default_config_dir().join("config.toml"))
  }

  pub fn ttl_policy(&self) -> TtlPolicy {
    self.status.ttl_policy()
  }

  /// Generate a commented configuration template
  pub fn generate_template() -> String {
    let defaults = Self::default();
    format!(
      r#"# rebuildd configuration
# Lookup order: --config <path>, ./rebuildd.toml, {user}

[node]
# Stable identifier for this node (generated when unset)
# id = "node-a"
# Processing mode: "disabled", "solo" (rebuild inline) or "hot_cold" (broadcast, leader runs it)
mode = "hot_cold"

[server]
bind = "{bind}"

[status]
# Status lifetimes; every status reverts to Unknown when its TTL elapses
pending_ttl_secs = {pending}
running_ttl_secs = {running}
terminal_ttl_secs = {terminal}
# How often status streams re-read the shared store
poll_interval_ms = {poll}
cache_capacity = {capacity}

[rebuild]
# Upper bound for a single projection rebuild
shard_timeout_secs = {shard_timeout}

[leader]
lease_ttl_secs = {lease_ttl}
heartbeat_interval_secs = {heartbeat}

[engine]
[[engine.projections]]
name = "Weather"
rebuild_millis = 500
shards = 1

[daemon]
# Log level: error, warn, info, debug, trace (RUST_LOG overrides)
log_level = "{log_level}"
# Log rotation: daily, hourly, never
log_rotation = "{log_rotation}"
log_to_file = false
"#,
      user = Self::user_config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/rebuildd/config.toml".to_string()),
      bind = defaults.server.bind,
      pending = defaults.status.pending_ttl_secs,
      running = defaults.status.running_ttl_secs,
      terminal = defaults.status.terminal_ttl_secs,
      poll = defaults.status.poll_interval_ms,
      capacity = defaults.status.cache_capacity,
      shard_timeout = defaults.rebuild.shard_timeout_secs,
      lease_ttl = defaults.leader.lease_ttl_secs,
      heartbeat = defaults.leader.heartbeat_interval_secs,
      log_level = defaults.daemon.log_level,
      log_rotation = defaults.daemon.log_rotation,
    )
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config {path:?}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Invalid config {path:?}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;

  #[test]
  fn test_ttl_for_each_phase() {
    let ttl = TtlPolicy::default();
    assert_eq!(ttl.ttl_for(&RebuildStatus::pending()), Duration::from_secs(10));
    assert_eq!(ttl.ttl_for(&RebuildStatus::running("Weather")), Duration::from_secs(600));
    assert_eq!(ttl.ttl_for(&RebuildStatus::Unknown), Duration::from_secs(3600));
  }

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.node.mode, NodeMode::HotCold);
    assert_eq!(config.status.pending_ttl_secs, 10);
    assert_eq!(config.status.running_ttl_secs, 600);
    assert_eq!(config.status.terminal_ttl_secs, 3600);
    assert_eq!(config.rebuild.shard_timeout(), Duration::from_secs(600));
    assert_eq!(config.engine.projections, vec![ProjectionSpec::new("Weather")]);
  }

  #[test]
  fn test_node_mode_inline() {
    assert!(NodeMode::Solo.runs_inline());
    assert!(NodeMode::Disabled.runs_inline());
    assert!(!NodeMode::HotCold.runs_inline());
  }

  #[test]
  fn test_ttl_policy() {
    let policy = Config::default().ttl_policy();
    assert_eq!(policy.pending, Duration::from_secs(10));
    assert_eq!(policy.running, Duration::from_secs(600));
    assert_eq!(policy.terminal, Duration::from_secs(3600));
  }

  #[test]
  fn test_partial_config_parsing() {
    let config: Config = toml::from_str(
      r#"
[node]
id = "node-b"
mode = "solo"

[[engine.projections]]
name = "Orders"
"#,
    )
    .unwrap();

    assert_eq!(config.node.id.as_deref(), Some("node-b"));
    assert_eq!(config.node.mode, NodeMode::Solo);
    assert_eq!(config.engine.projections.len(), 1);
    assert_eq!(config.engine.projections[0].rebuild_millis, 500);
    assert_eq!(config.server.bind, "127.0.0.1:5080");
  }

  #[test]
  fn test_template_parses_to_defaults() {
    let template = Config::generate_template();
    let parsed: Config = toml::from_str(&template).unwrap();
    assert_eq!(parsed.node.mode, NodeMode::HotCold);
    assert_eq!(parsed.status.terminal_ttl_secs, 3600);
    assert_eq!(parsed.leader.heartbeat_interval_secs, 5);
    assert_eq!(parsed.engine.projections[0].name, "Weather");
  }

  #[test]
  fn test_load_local_config() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
      temp.path().join(LOCAL_CONFIG_FILE),
      "[rebuild]\nshard_timeout_secs = 42\n",
    )
    .unwrap();

    let config = Config::load(None, temp.path()).unwrap();
    assert_eq!(config.rebuild.shard_timeout_secs, 42);
  }

  #[test]
  fn test_malformed_discovered_file_is_skipped() {
    let temp = TempDir::new().unwrap();
    let local = temp.path().join(LOCAL_CONFIG_FILE);
    assert!(Config::load_discovered(&local).is_none());

    std::fs::write(&local, "[rebuild\nshard_timeout_secs = ").unwrap();
    assert!(Config::load_discovered(&local).is_none());

    std::fs::write(&local, "[rebuild]\nshard_timeout_secs = 7\n").unwrap();
    assert_eq!(Config::load_discovered(&local).unwrap().rebuild.shard_timeout_secs, 7);
  }

  #[test]
  fn test_explicit_path_errors() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("missing.toml");
    assert!(matches!(Config::load(Some(&missing), temp.path()), Err(ConfigError::Read { .. })));

    let broken = temp.path().join("broken.toml");
    std::fs::write(&broken, "[node\nmode = ").unwrap();
    assert!(matches!(Config::load_from(&broken), Err(ConfigError::Parse { .. })));
  }
}
