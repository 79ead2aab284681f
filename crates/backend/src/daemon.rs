//! Node runtime.
//!
//! Wires one rebuildd node and runs it until shutdown.
//!
//! # Architecture
//!
//! ```text
//! Daemon
//!   ├── StatusStore (moka backend, system clock)
//!   ├── LeaderProbe (solo, or lease elector + heartbeat task)
//!   ├── RebuildCoordinator
//!   ├── RebuildConsumer (hot_cold only, own bus subscription)
//!   └── HTTP server (rebuild routes, admission gate)
//! ```
//!
//! # Lifecycle
//!
//! 1. Create master `CancellationToken`
//! 2. Create status store and projection engine
//! 3. Create leader probe; in hot_cold spawn the lease heartbeat, which owns
//!    continuous processing
//! 4. Create coordinator with a child token for in-flight rebuilds
//! 5. In hot_cold spawn the rebuild consumer
//! 6. Serve HTTP until cancelled
//! 7. Graceful shutdown: cancel children, wait for tasks (the lease is released)

use std::{io, path::Path, sync::Arc};

use tokio::{net::TcpListener, signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  bus::{LocalBus, RebuildBus, RebuildConsumer},
  cache::{CacheBackend, MokaBackend, StatusStore},
  clock::SystemClock,
  coordinator::{CoordinatorSettings, RebuildCoordinator},
  domain::{
    config::{Config, ConfigError},
    node::NodeId,
  },
  engine::{ProjectionEngine, SimulatedEngine},
  http::{self, ApiState},
  leader::{LeaderProbe, LeaseElector, LeaseLeaderProbe, SoloLeaderProbe},
};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("Failed to bind {addr}: {source}")]
  Bind {
    addr: String,
    #[source]
    source: io::Error,
  },
  #[error("Server error: {0}")]
  Serve(#[source] io::Error),
}

// ============================================================================
// Configuration
// ============================================================================

/// Daemon runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  pub node: NodeId,
  pub config: Config,
}

impl RuntimeConfig {
  pub fn new(config: Config) -> Self {
    let node = config
      .node
      .id
      .clone()
      .map(NodeId::from)
      .unwrap_or_else(NodeId::generate);
    Self { node, config }
  }

  /// Load from `path`, or discover from `working_dir` when none is given.
  pub fn load(path: Option<&Path>, working_dir: &Path) -> Result<Self, ConfigError> {
    if path.is_none() {
      Self::ensure_user_config();
    }
    Ok(Self::new(Config::load(path, working_dir)?))
  }

  /// Ensure user config file exists, creating it with defaults if not.
  fn ensure_user_config() {
    let Some(user_config_path) = Config::user_config_path() else {
      return;
    };

    if user_config_path.exists() {
      return;
    }

    if let Some(parent) = user_config_path.parent()
      && let Err(e) = std::fs::create_dir_all(parent)
    {
      warn!("Failed to create config directory: {}", e);
      return;
    }

    match std::fs::write(&user_config_path, Config::generate_template()) {
      Ok(()) => info!("Created user config: {:?}", user_config_path),
      Err(e) => warn!("Failed to create user config: {}", e),
    }
  }
}

pub struct Daemon {
  runtime_config: RuntimeConfig,
}

impl Daemon {
  pub fn new(runtime_config: RuntimeConfig) -> Self {
    Self { runtime_config }
  }

  /// Run until ctrl-c.
  pub async fn run(self) -> Result<(), DaemonError> {
    let cancel = CancellationToken::new();

    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
      if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        return;
      }
      info!("Received ctrl-c, shutting down...");
      cancel_for_signal.cancel();
    });

    self.run_until(cancel).await
  }

  /// Run until `cancel` fires.
  pub async fn run_until(self, cancel: CancellationToken) -> Result<(), DaemonError> {
    let RuntimeConfig { node, config } = self.runtime_config;

    info!(node = %node, mode = ?config.node.mode, "Starting rebuildd node");

    let backend: Arc<dyn CacheBackend> = Arc::new(MokaBackend::with_capacity(config.status.cache_capacity));
    let store = Arc::new(StatusStore::new(Arc::clone(&backend)));

    let engine = SimulatedEngine::from_config(&config.engine);
    let shared_engine: Arc<dyn ProjectionEngine> = Arc::new(engine.clone());
    info!("Registered projections: {:?}", shared_engine.projections());

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let leader: Arc<dyn LeaderProbe> = if config.node.mode.runs_inline() {
      Arc::new(SoloLeaderProbe::new(Arc::clone(&shared_engine)))
    } else {
      let elector = Arc::new(
        LeaseElector::new(
          node.clone(),
          Arc::clone(&backend),
          Arc::new(SystemClock),
          config.leader.lease_ttl(),
        )
        .with_engine(Arc::clone(&shared_engine)),
      );
      tasks.push(tokio::spawn(
        Arc::clone(&elector).run(config.leader.heartbeat_interval(), cancel.child_token()),
      ));
      Arc::new(LeaseLeaderProbe::new(elector, Arc::clone(&shared_engine)))
    };

    let bus = Arc::new(LocalBus::new());
    let coordinator = Arc::new(
      RebuildCoordinator::new(
        store,
        leader,
        Arc::clone(&bus) as Arc<dyn RebuildBus>,
        shared_engine,
        CoordinatorSettings::from_config(&config),
      )
      .with_shutdown(cancel.child_token()),
    );

    if !config.node.mode.runs_inline() {
      let consumer = RebuildConsumer::new(node.clone(), bus.as_ref(), Arc::clone(&coordinator));
      tasks.push(tokio::spawn(consumer.run(cancel.child_token())));
    }

    let state = ApiState {
      coordinator,
      events: engine,
      poll_interval: config.status.poll_interval(),
      shutdown: cancel.child_token(),
    };

    let listener = TcpListener::bind(&config.server.bind)
      .await
      .map_err(|source| DaemonError::Bind {
        addr: config.server.bind.clone(),
        source,
      })?;
    match listener.local_addr() {
      Ok(addr) => info!(node = %node, "Listening on http://{}", addr),
      Err(e) => debug!("Could not read local address: {}", e),
    }

    let server_cancel = cancel.clone();
    let served = axum::serve(listener, http::router(state))
      .with_graceful_shutdown(async move { server_cancel.cancelled().await })
      .await;

    info!("Shutting down...");
    cancel.cancel();

    for task in tasks {
      if let Err(e) = task.await {
        warn!("Background task failed: {}", e);
      }
    }

    served.map_err(DaemonError::Serve)?;
    info!(node = %node, "Node shutdown complete");
    Ok(())
  }
}
