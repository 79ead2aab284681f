//! Rebuild coordination.
//!
//! [`RebuildCoordinator::request_rebuild`] accepts a request and either runs it
//! on this node or broadcasts it to the cluster. Every node that receives the
//! broadcast calls [`RebuildCoordinator::run_rebuild`], which does nothing
//! unless this node leads continuous processing.
//!
//! A run walks the requested projections in order:
//!
//! ```text
//! Pending -> pause -> Running(p1) -> Running(p2) -> ... -> Errored | Completed
//!                                                        -> stop daemon, resume
//! ```
//!
//! The stop/resume step runs whatever happened before it.

mod outcome;

use std::{
  any::Any,
  panic::AssertUnwindSafe,
  sync::Arc,
  time::{Duration, Instant},
};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use outcome::{FailureCollector, ShardOutcome};

use crate::{
  bus::{BusError, RebuildBus, RebuildRequested},
  cache::{CacheError, StatusListener, StatusStore},
  domain::{
    config::{Config, NodeMode, TtlPolicy},
    request::{ProjectionSet, RebuildRequest, RequestError},
    status::RebuildStatus,
  },
  engine::{EngineError, ProjectionEngine, RebuildDaemon, ShardFailure},
  leader::LeaderProbe,
};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
  #[error(transparent)]
  Request(#[from] RequestError),
  #[error("Status store error: {0}")]
  Store(#[from] CacheError),
  #[error("Broadcast error: {0}")]
  Bus(#[from] BusError),
  #[error("Engine error: {0}")]
  Engine(#[from] EngineError),
}

/// Where an accepted request executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
  /// Run on the requesting node before returning.
  Inline,
  /// Publish to every node and return immediately.
  Broadcast,
}

impl From<NodeMode> for ExecutionMode {
  fn from(mode: NodeMode) -> Self {
    if mode.runs_inline() {
      ExecutionMode::Inline
    } else {
      ExecutionMode::Broadcast
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
  pub mode: ExecutionMode,
  /// Upper bound for rebuilding one projection.
  pub shard_timeout: Duration,
  pub ttl: TtlPolicy,
}

impl CoordinatorSettings {
  pub fn from_config(config: &Config) -> Self {
    Self {
      mode: config.node.mode.into(),
      shard_timeout: config.rebuild.shard_timeout(),
      ttl: config.ttl_policy(),
    }
  }
}

impl Default for CoordinatorSettings {
  fn default() -> Self {
    Self::from_config(&Config::default())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
  /// Ran on this node.
  Inline(RunOutcome),
  /// Published to the cluster.
  Broadcast,
  /// A rebuild was already running; nothing happened.
  AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
  /// This node does not lead processing; nothing happened.
  NotLeader,
  /// The run finished with this terminal status.
  Finished(RebuildStatus),
}

pub struct RebuildCoordinator {
  store: Arc<StatusStore>,
  leader: Arc<dyn LeaderProbe>,
  bus: Arc<dyn RebuildBus>,
  engine: Arc<dyn ProjectionEngine>,
  settings: CoordinatorSettings,
  shutdown: CancellationToken,
}

impl RebuildCoordinator {
  pub fn new(
    store: Arc<StatusStore>,
    leader: Arc<dyn LeaderProbe>,
    bus: Arc<dyn RebuildBus>,
    engine: Arc<dyn ProjectionEngine>,
    settings: CoordinatorSettings,
  ) -> Self {
    Self {
      store,
      leader,
      bus,
      engine,
      settings,
      shutdown: CancellationToken::new(),
    }
  }

  /// Cancel in-flight projection rebuilds when `token` is cancelled.
  pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
    self.shutdown = token;
    self
  }

  pub fn settings(&self) -> &CoordinatorSettings {
    &self.settings
  }

  /// Accept a rebuild request.
  ///
  /// Never waits for a broadcast rebuild to finish. Inline mode runs the
  /// whole rebuild before returning.
  pub async fn request_rebuild(&self, projections: ProjectionSet) -> Result<RequestOutcome, CoordinatorError> {
    let request = RebuildRequest::new(projections)?;

    if self.store.is_rebuilding().await? {
      info!(projections = %request.projections(), "Rebuild already running, ignoring request");
      return Ok(RequestOutcome::AlreadyRunning);
    }

    match self.settings.mode {
      ExecutionMode::Inline => {
        info!(projections = %request.projections(), "Running rebuild inline");
        let outcome = self.run_rebuild(request.projections()).await?;
        Ok(RequestOutcome::Inline(outcome))
      }
      ExecutionMode::Broadcast => {
        info!(projections = %request.projections(), "Broadcasting rebuild request");
        self
          .bus
          .publish(RebuildRequested {
            projections: request.into_projections(),
          })
          .await?;
        Ok(RequestOutcome::Broadcast)
      }
    }
  }

  /// Rebuild `projections` if this node leads continuous processing.
  ///
  /// An empty set is rejected before anything is paused or written.
  pub async fn run_rebuild(&self, projections: &ProjectionSet) -> Result<RunOutcome, CoordinatorError> {
    if projections.is_empty() {
      return Err(RequestError::Empty.into());
    }
    if !self.leader.is_local_leader().await {
      debug!(projections = %projections, "Not the processing leader, skipping rebuild");
      return Ok(RunOutcome::NotLeader);
    }

    info!(projections = %projections, "Starting projection rebuild");
    let started = Instant::now();
    let mut daemon = None;

    let result = self.execute(projections, started, &mut daemon).await;

    if let Some(daemon) = daemon
      && let Err(e) = daemon.stop_all().await
    {
      warn!(error = %e, "Failed to stop rebuild daemon");
    }
    if let Err(e) = self.leader.resume_local().await {
      error!(error = %e, "Failed to resume continuous processing after rebuild");
    }

    let status = result?;
    match &status {
      RebuildStatus::Completed { elapsed, .. } => {
        info!(projections = %projections, elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX), "Rebuild completed");
      }
      RebuildStatus::Errored {
        projection, error_kind, ..
      } => {
        warn!(projection = %projection, error_kind = %error_kind, "Rebuild finished with errors");
      }
      _ => {}
    }
    Ok(RunOutcome::Finished(status))
  }

  async fn execute(
    &self,
    projections: &ProjectionSet,
    started: Instant,
    daemon_slot: &mut Option<Box<dyn RebuildDaemon>>,
  ) -> Result<RebuildStatus, CoordinatorError> {
    self.put(RebuildStatus::pending()).await?;

    if let Err(e) = self.leader.pause_local().await {
      warn!(error = %e, "Failed to pause continuous processing");
      return self.finish(self.errored("", e.kind())).await;
    }

    let daemon = match self.engine.build_rebuild_daemon().await {
      Ok(daemon) => &**daemon_slot.insert(daemon),
      Err(e) => {
        warn!(error = %e, "Failed to start rebuild daemon");
        return self.finish(self.errored("", e.kind())).await;
      }
    };

    let collector = Arc::new(FailureCollector::default());
    daemon.subscribe(collector.clone());

    for projection in projections.iter() {
      self.put(RebuildStatus::running(projection)).await?;

      if let ShardOutcome::Failed(failure) = self.rebuild_one(daemon, projection).await {
        collector.record(projection, failure);
      }
    }

    let status = match collector.first() {
      Some((projection, failure)) => self.errored(&projection, &failure.kind),
      None => RebuildStatus::completed(projections.clone(), self.store.clock().now(), started.elapsed()),
    };
    self.finish(status).await
  }

  /// Rebuild one projection, turning errors, timeouts and panics into a
  /// failed outcome.
  async fn rebuild_one(&self, daemon: &dyn RebuildDaemon, projection: &str) -> ShardOutcome {
    let timeout = self.settings.shard_timeout;
    let cancel = self.shutdown.child_token();
    let call = AssertUnwindSafe(daemon.rebuild_projection(projection, timeout, cancel.clone())).catch_unwind();

    let error = match tokio::time::timeout(timeout, call).await {
      Ok(Ok(Ok(()))) => {
        debug!(projection, "Projection rebuilt");
        return ShardOutcome::Succeeded;
      }
      Ok(Ok(Err(e))) => e,
      Ok(Err(panic)) => EngineError::Panic(panic_message(panic)),
      Err(_) => {
        cancel.cancel();
        EngineError::Timeout {
          projection: projection.to_string(),
          timeout,
        }
      }
    };

    ShardOutcome::Failed(ShardFailure {
      kind: error.kind().to_string(),
      message: error.to_string(),
    })
  }

  fn errored(&self, projection: &str, kind: &str) -> RebuildStatus {
    RebuildStatus::Errored {
      projection: projection.to_string(),
      occurred_at: self.store.clock().now(),
      error_kind: kind.to_string(),
    }
  }

  async fn finish(&self, status: RebuildStatus) -> Result<RebuildStatus, CoordinatorError> {
    self.put(status.clone()).await?;
    Ok(status)
  }

  async fn put(&self, status: RebuildStatus) -> Result<(), CacheError> {
    let ttl = self.settings.ttl.ttl_for(&status);
    self.store.put(status, ttl).await
  }

  pub async fn is_rebuilding(&self) -> Result<bool, CoordinatorError> {
    Ok(self.store.is_rebuilding().await?)
  }

  pub async fn status(&self) -> Result<RebuildStatus, CoordinatorError> {
    Ok(self.store.get().await?)
  }

  pub fn projections(&self) -> Vec<String> {
    self.engine.projections()
  }

  /// Attach a listener for statuses written by this node.
  pub fn listen(&self) -> StatusListener {
    self.store.listen()
  }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
  if let Some(msg) = panic.downcast_ref::<&str>() {
    msg.to_string()
  } else if let Some(msg) = panic.downcast_ref::<String>() {
    msg.clone()
  } else {
    "unknown panic".to_string()
  }
}

#[cfg(test)]
mod tests {
  use futures::StreamExt;
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::{
    bus::LocalBus,
    cache::MokaBackend,
    domain::{config::ProjectionSpec, node::NodeId},
    engine::{SimulatedEngine, simulated::Fault},
    leader::SoloLeaderProbe,
  };

  struct Harness {
    coordinator: RebuildCoordinator,
    engine: SimulatedEngine,
    store: Arc<StatusStore>,
    bus: Arc<LocalBus>,
  }

  fn harness(engine: SimulatedEngine, mode: ExecutionMode) -> Harness {
    let store = Arc::new(StatusStore::new(Arc::new(MokaBackend::new())));
    let bus = Arc::new(LocalBus::new());
    let shared: Arc<dyn ProjectionEngine> = Arc::new(engine.clone());
    let coordinator = RebuildCoordinator::new(
      store.clone(),
      Arc::new(SoloLeaderProbe::new(shared.clone())),
      bus.clone(),
      shared,
      CoordinatorSettings {
        mode,
        shard_timeout: Duration::from_secs(5),
        ttl: TtlPolicy::default(),
      },
    );
    Harness {
      coordinator,
      engine,
      store,
      bus,
    }
  }

  fn set(names: &[&str]) -> ProjectionSet {
    ProjectionSet::new(names.iter().copied())
  }

  #[tokio::test]
  async fn test_inline_rebuild_completes() {
    let h = harness(SimulatedEngine::instant(["Weather"]), ExecutionMode::Inline);

    let outcome = h.coordinator.request_rebuild(set(&["Weather"])).await.unwrap();

    let RequestOutcome::Inline(RunOutcome::Finished(RebuildStatus::Completed { projections, .. })) = outcome else {
      panic!("expected inline completion, got {:?}", outcome);
    };
    assert_eq!(projections, set(&["Weather"]));
    assert_eq!(h.store.get().await.unwrap().state(), "Completed");
    assert_eq!(h.engine.rebuilt(), vec!["Weather".to_string()]);
    assert!(h.engine.is_processing());
    assert!(!h.engine.contention_detected());
    assert_eq!(h.engine.daemons_stopped(), 1);
  }

  #[tokio::test]
  async fn test_empty_request_has_no_side_effects() {
    let h = harness(SimulatedEngine::instant(["Weather"]), ExecutionMode::Inline);

    let err = h.coordinator.request_rebuild(set(&[" ", ""])).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Request(RequestError::Empty)));
    assert_eq!(h.store.get().await.unwrap(), RebuildStatus::Unknown);
    assert_eq!(h.engine.pause_count(), 0);
  }

  #[tokio::test]
  async fn test_blank_broadcast_is_rejected_without_side_effects() {
    let h = harness(SimulatedEngine::instant(["Weather"]), ExecutionMode::Broadcast);
    let projections: ProjectionSet = serde_json::from_str(r#"["", " "]"#).unwrap();

    let err = h.coordinator.run_rebuild(&projections).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Request(RequestError::Empty)));
    assert_eq!(h.store.get().await.unwrap(), RebuildStatus::Unknown);
    assert_eq!(h.engine.pause_count(), 0);
    assert_eq!(h.engine.resume_count(), 0);
    assert_eq!(h.engine.daemons_started(), 0);
  }

  #[tokio::test]
  async fn test_returned_status_matches_stored_status() {
    let engine = SimulatedEngine::new(vec![ProjectionSpec {
      rebuild_millis: 3,
      ..ProjectionSpec::new("Weather")
    }]);
    let h = harness(engine, ExecutionMode::Inline);

    let RunOutcome::Finished(status) = h.coordinator.run_rebuild(&set(&["Weather"])).await.unwrap() else {
      panic!("expected a finished run");
    };
    assert_eq!(status.state(), "Completed");
    assert_eq!(h.store.get().await.unwrap(), status);
  }

  #[tokio::test]
  async fn test_request_while_running_is_noop() {
    let h = harness(SimulatedEngine::instant(["Weather"]), ExecutionMode::Broadcast);
    let mut sub = h.bus.subscribe(&NodeId::from("observer"));
    h.store
      .put(RebuildStatus::running("Orders"), Duration::from_secs(60))
      .await
      .unwrap();

    let outcome = h.coordinator.request_rebuild(set(&["Weather"])).await.unwrap();
    assert_eq!(outcome, RequestOutcome::AlreadyRunning);
    assert_eq!(h.store.get().await.unwrap(), RebuildStatus::running("Orders"));

    // Nothing was published
    h.bus.publish(RebuildRequested { projections: set(&["Marker"]) }).await.unwrap();
    assert_eq!(sub.next().await.unwrap().projections, set(&["Marker"]));
  }

  #[tokio::test]
  async fn test_broadcast_returns_without_running() {
    let h = harness(SimulatedEngine::instant(["Weather"]), ExecutionMode::Broadcast);
    let mut sub = h.bus.subscribe(&NodeId::from("node-a"));

    let outcome = h.coordinator.request_rebuild(set(&["Weather"])).await.unwrap();
    assert_eq!(outcome, RequestOutcome::Broadcast);
    assert_eq!(sub.next().await.unwrap().projections, set(&["Weather"]));
    assert_eq!(h.store.get().await.unwrap(), RebuildStatus::Unknown);
    assert_eq!(h.engine.pause_count(), 0);
  }

  #[tokio::test]
  async fn test_failure_is_captured_and_loop_continues() {
    let engine = SimulatedEngine::instant(["Weather", "Orders", "Stock"]);
    engine.inject("Orders", Fault::Error(EngineError::Unavailable("db down".into())));
    let h = harness(engine, ExecutionMode::Inline);

    let outcome = h
      .coordinator
      .run_rebuild(&set(&["Weather", "Orders", "Stock"]))
      .await
      .unwrap();

    let RunOutcome::Finished(RebuildStatus::Errored {
      projection, error_kind, ..
    }) = outcome
    else {
      panic!("expected errored, got {:?}", outcome);
    };
    assert_eq!(projection, "Orders");
    assert_eq!(error_kind, "Unavailable");
    assert_eq!(h.engine.rebuilt(), vec!["Weather".to_string(), "Stock".to_string()]);
    assert!(h.engine.is_processing());
    assert_eq!(h.engine.resume_count(), 1);
  }

  #[tokio::test]
  async fn test_first_observed_shard_failure_wins() {
    let engine = SimulatedEngine::instant(["Weather", "Orders"]);
    engine.inject(
      "Weather",
      Fault::ShardFailure {
        kind: "InvalidEvent".into(),
        message: "bad payload".into(),
      },
    );
    engine.inject("Orders", Fault::Panic);
    let h = harness(engine, ExecutionMode::Inline);

    let outcome = h.coordinator.run_rebuild(&set(&["Weather", "Orders"])).await.unwrap();

    let RunOutcome::Finished(RebuildStatus::Errored {
      projection, error_kind, ..
    }) = outcome
    else {
      panic!("expected errored, got {:?}", outcome);
    };
    assert_eq!(projection, "Weather");
    assert_eq!(error_kind, "InvalidEvent");
    assert!(h.engine.is_processing());
  }

  #[tokio::test]
  async fn test_panic_is_captured() {
    let engine = SimulatedEngine::instant(["Weather"]);
    engine.inject("Weather", Fault::Panic);
    let h = harness(engine, ExecutionMode::Inline);

    let outcome = h.coordinator.run_rebuild(&set(&["Weather"])).await.unwrap();
    let RunOutcome::Finished(status) = outcome else {
      panic!("expected a finished run");
    };
    assert!(matches!(status, RebuildStatus::Errored { ref error_kind, .. } if error_kind == "Panic"));
    assert!(h.engine.is_processing());
    assert_eq!(h.engine.daemons_stopped(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeout_is_a_shard_failure() {
    let engine = SimulatedEngine::new(vec![
      ProjectionSpec {
        name: "Slow".into(),
        rebuild_millis: 60_000,
        shards: 1,
      },
      ProjectionSpec {
        rebuild_millis: 0,
        ..ProjectionSpec::new("Fast")
      },
    ]);
    let h = harness(engine, ExecutionMode::Inline);

    let outcome = h.coordinator.run_rebuild(&set(&["Slow", "Fast"])).await.unwrap();

    let RunOutcome::Finished(RebuildStatus::Errored {
      projection, error_kind, ..
    }) = outcome
    else {
      panic!("expected errored, got {:?}", outcome);
    };
    assert_eq!(projection, "Slow");
    assert_eq!(error_kind, "Timeout");
    assert_eq!(h.engine.rebuilt(), vec!["Fast".to_string()]);
  }

  #[tokio::test]
  async fn test_pause_failure_still_resumes() {
    let engine = SimulatedEngine::instant(["Weather"]);
    engine.fail_pause(true);
    let h = harness(engine, ExecutionMode::Inline);

    let outcome = h.coordinator.run_rebuild(&set(&["Weather"])).await.unwrap();

    let RunOutcome::Finished(RebuildStatus::Errored {
      projection, error_kind, ..
    }) = outcome
    else {
      panic!("expected errored, got {:?}", outcome);
    };
    assert_eq!(projection, "");
    assert_eq!(error_kind, "Unavailable");
    assert_eq!(h.engine.daemons_started(), 0);
    assert_eq!(h.engine.resume_count(), 1);
    assert!(h.engine.rebuilt().is_empty());
  }

  #[tokio::test]
  async fn test_status_progresses_through_phases() {
    let h = harness(SimulatedEngine::instant(["Weather"]), ExecutionMode::Inline);
    let listener = h.coordinator.listen();

    let store = h.store.clone();
    let reader = tokio::spawn(async move {
      let mut seen = Vec::new();
      while let Some(status) = listener.next_update().await {
        let done = status.is_terminal();
        seen.push(status);
        if done {
          break;
        }
      }
      seen
    });

    h.coordinator.run_rebuild(&set(&["Weather"])).await.unwrap();
    let seen = reader.await.unwrap();

    // Intermediate phases may be coalesced, but the last value is terminal
    assert_eq!(seen.last().map(|s| s.state()), Some("Completed"));
    assert!(seen.iter().all(|s| s.is_running() || s.is_terminal()));
    assert!(!store.is_rebuilding().await.unwrap());
  }
}
