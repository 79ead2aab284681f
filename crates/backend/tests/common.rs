//! Common test utilities for rebuildd integration tests
//!
//! Nodes are assembled in-process and share a cache backend and a bus, the
//! same way replicas would share a replicated cache and a broker.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rebuildd::{
  bus::{LocalBus, RebuildBus, RebuildConsumer},
  cache::{CacheBackend, CacheError, MokaBackend, StatusStore},
  coordinator::{CoordinatorSettings, ExecutionMode, RebuildCoordinator},
  config::TtlPolicy,
  engine::{EngineError, ProjectionEngine, SimulatedEngine},
  http::ApiState,
  leader::LeaderProbe,
  node::NodeId,
  status::RebuildStatus,
};
use tokio_util::sync::CancellationToken;

/// Leader probe with a fixed answer.
pub struct FixedLeader {
  leader: bool,
  engine: Arc<dyn ProjectionEngine>,
}

#[async_trait]
impl LeaderProbe for FixedLeader {
  async fn is_local_leader(&self) -> bool {
    self.leader
  }

  async fn pause_local(&self) -> Result<(), EngineError> {
    self.engine.pause_all_processing().await
  }

  async fn resume_local(&self) -> Result<(), EngineError> {
    self.engine.resume_all_processing().await
  }
}

/// Cache backend whose every call fails.
pub struct FailingBackend;

#[async_trait]
impl CacheBackend for FailingBackend {
  async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
    Err(CacheError::Unavailable("connection refused".into()))
  }

  async fn put(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
    Err(CacheError::Unavailable("connection refused".into()))
  }

  async fn put_if(
    &self,
    _key: &str,
    _expected: Option<&[u8]>,
    _value: Vec<u8>,
    _ttl: Duration,
  ) -> Result<bool, CacheError> {
    Err(CacheError::Unavailable("connection refused".into()))
  }

  async fn remove(&self, _key: &str) -> Result<(), CacheError> {
    Err(CacheError::Unavailable("connection refused".into()))
  }
}

#[allow(dead_code)]
pub struct TestNode {
  pub id: NodeId,
  pub coordinator: Arc<RebuildCoordinator>,
  pub engine: SimulatedEngine,
  pub store: Arc<StatusStore>,
}

#[allow(dead_code)]
impl TestNode {
  pub fn api_state(&self) -> ApiState {
    ApiState {
      coordinator: Arc::clone(&self.coordinator),
      events: self.engine.clone(),
      poll_interval: Duration::from_millis(20),
      shutdown: CancellationToken::new(),
    }
  }

  /// Start consuming broadcast requests on this node.
  pub fn spawn_consumer(&self, bus: &dyn RebuildBus, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    let consumer = RebuildConsumer::new(self.id.clone(), bus, Arc::clone(&self.coordinator));
    tokio::spawn(consumer.run(cancel))
  }
}

/// Build a node over a shared backend and bus.
#[allow(dead_code)]
pub fn node(
  id: &str,
  backend: Arc<dyn CacheBackend>,
  bus: Arc<LocalBus>,
  engine: SimulatedEngine,
  leader: bool,
  mode: ExecutionMode,
) -> TestNode {
  let store = Arc::new(StatusStore::new(backend));
  let shared: Arc<dyn ProjectionEngine> = Arc::new(engine.clone());
  let coordinator = Arc::new(RebuildCoordinator::new(
    Arc::clone(&store),
    Arc::new(FixedLeader {
      leader,
      engine: Arc::clone(&shared),
    }),
    bus,
    shared,
    CoordinatorSettings {
      mode,
      shard_timeout: Duration::from_secs(5),
      ttl: TtlPolicy::default(),
    },
  ));

  TestNode {
    id: NodeId::from(id),
    coordinator,
    engine,
    store,
  }
}

/// Single node running rebuilds inline on a fresh backend.
#[allow(dead_code)]
pub fn solo_node(engine: SimulatedEngine) -> TestNode {
  node(
    "solo",
    Arc::new(MokaBackend::new()),
    Arc::new(LocalBus::new()),
    engine,
    true,
    ExecutionMode::Inline,
  )
}

/// Poll `store` until it holds a terminal status.
#[allow(dead_code)]
pub async fn wait_for_terminal(store: &StatusStore) -> RebuildStatus {
  tokio::time::timeout(Duration::from_secs(5), async {
    loop {
      let status = store.get().await.expect("status store read");
      if status.is_terminal() {
        return status;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .expect("rebuild did not reach a terminal status")
}
