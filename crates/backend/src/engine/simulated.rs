//! In-memory projection engine.
//!
//! Stands in for a real event store: it keeps an event sequence, a set of
//! registered projections with a simulated rebuild duration, and a continuous
//! processing switch. Faults can be injected per projection to exercise the
//! coordinator's failure capture.

use std::{
  collections::HashMap,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
  },
  time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{EngineError, ProjectionEngine, RebuildDaemon, ShardFailure, ShardObserver, ShardState};
use crate::domain::config::{EngineConfig, ProjectionSpec};

/// Injected misbehaviour for one projection.
#[derive(Debug, Clone)]
pub enum Fault {
  /// A shard reports a failure through the observer; the call itself succeeds.
  ShardFailure { kind: String, message: String },
  /// The rebuild call returns this error.
  Error(EngineError),
  /// The rebuild call panics.
  Panic,
}

#[derive(Debug, Default)]
struct EngineState {
  projections: Vec<ProjectionSpec>,
  sequence: AtomicU64,
  processing: AtomicBool,
  fail_pause: AtomicBool,
  pauses: AtomicUsize,
  resumes: AtomicUsize,
  daemons_started: AtomicUsize,
  daemons_stopped: AtomicUsize,
  contention: AtomicBool,
  faults: Mutex<HashMap<String, Fault>>,
  rebuilt: Mutex<Vec<String>>,
}

impl EngineState {
  fn spec(&self, projection: &str) -> Option<&ProjectionSpec> {
    self.projections.iter().find(|p| p.name == projection)
  }

  fn fault(&self, projection: &str) -> Option<Fault> {
    self.faults.lock().unwrap_or_else(|e| e.into_inner()).get(projection).cloned()
  }
}

#[derive(Debug, Clone)]
pub struct SimulatedEngine {
  state: Arc<EngineState>,
}

impl SimulatedEngine {
  pub fn new(projections: Vec<ProjectionSpec>) -> Self {
    let state = EngineState {
      projections,
      processing: AtomicBool::new(true),
      ..Default::default()
    };
    Self { state: Arc::new(state) }
  }

  pub fn from_config(config: &EngineConfig) -> Self {
    Self::new(config.projections.clone())
  }

  /// Engine with instant rebuilds for the given projection names.
  pub fn instant<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::new(
      names
        .into_iter()
        .map(|name| ProjectionSpec {
          rebuild_millis: 0,
          ..ProjectionSpec::new(name)
        })
        .collect(),
    )
  }

  /// Append a synthetic event, returning its sequence number.
  pub fn append_event(&self) -> u64 {
    self.state.sequence.fetch_add(1, Ordering::SeqCst) + 1
  }

  /// Append `count` synthetic events, returning the last sequence number.
  pub fn append_events(&self, count: u64) -> u64 {
    self.state.sequence.fetch_add(count, Ordering::SeqCst) + count
  }

  pub fn inject(&self, projection: impl Into<String>, fault: Fault) {
    self
      .state
      .faults
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(projection.into(), fault);
  }

  pub fn fail_pause(&self, fail: bool) {
    self.state.fail_pause.store(fail, Ordering::SeqCst);
  }

  pub fn is_processing(&self) -> bool {
    self.state.processing.load(Ordering::SeqCst)
  }

  pub fn pause_count(&self) -> usize {
    self.state.pauses.load(Ordering::SeqCst)
  }

  pub fn resume_count(&self) -> usize {
    self.state.resumes.load(Ordering::SeqCst)
  }

  pub fn daemons_started(&self) -> usize {
    self.state.daemons_started.load(Ordering::SeqCst)
  }

  pub fn daemons_stopped(&self) -> usize {
    self.state.daemons_stopped.load(Ordering::SeqCst)
  }

  /// Whether a rebuild ever ran while continuous processing was active.
  pub fn contention_detected(&self) -> bool {
    self.state.contention.load(Ordering::SeqCst)
  }

  /// Projections whose rebuild call returned, in order.
  pub fn rebuilt(&self) -> Vec<String> {
    self.state.rebuilt.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }
}

#[async_trait]
impl ProjectionEngine for SimulatedEngine {
  fn projections(&self) -> Vec<String> {
    self.state.projections.iter().map(|p| p.name.clone()).collect()
  }

  async fn pause_all_processing(&self) -> Result<(), EngineError> {
    if self.state.fail_pause.load(Ordering::SeqCst) {
      return Err(EngineError::Unavailable("continuous processing did not stop".into()));
    }
    self.state.processing.store(false, Ordering::SeqCst);
    self.state.pauses.fetch_add(1, Ordering::SeqCst);
    debug!("Continuous processing paused");
    Ok(())
  }

  async fn resume_all_processing(&self) -> Result<(), EngineError> {
    self.state.processing.store(true, Ordering::SeqCst);
    self.state.resumes.fetch_add(1, Ordering::SeqCst);
    debug!("Continuous processing resumed");
    Ok(())
  }

  async fn build_rebuild_daemon(&self) -> Result<Box<dyn RebuildDaemon>, EngineError> {
    self.state.daemons_started.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(SimulatedRebuildDaemon {
      state: Arc::clone(&self.state),
      observers: Mutex::new(Vec::new()),
      stopped: AtomicBool::new(false),
    }))
  }
}

struct SimulatedRebuildDaemon {
  state: Arc<EngineState>,
  observers: Mutex<Vec<Arc<dyn ShardObserver>>>,
  stopped: AtomicBool,
}

impl SimulatedRebuildDaemon {
  fn publish(&self, state: ShardState) {
    let observers = self.observers.lock().unwrap_or_else(|e| e.into_inner()).clone();
    for observer in observers {
      observer.on_shard_state(&state);
    }
  }
}

#[async_trait]
impl RebuildDaemon for SimulatedRebuildDaemon {
  fn subscribe(&self, observer: Arc<dyn ShardObserver>) {
    self.observers.lock().unwrap_or_else(|e| e.into_inner()).push(observer);
  }

  async fn rebuild_projection(
    &self,
    projection: &str,
    _shard_timeout: Duration,
    cancel: CancellationToken,
  ) -> Result<(), EngineError> {
    if self.stopped.load(Ordering::SeqCst) {
      return Err(EngineError::Unavailable("rebuild daemon stopped".into()));
    }
    let spec = self
      .state
      .spec(projection)
      .cloned()
      .ok_or_else(|| EngineError::UnknownProjection(projection.to_string()))?;

    if self.state.processing.load(Ordering::SeqCst) {
      self.state.contention.store(true, Ordering::SeqCst);
    }

    let fault = self.state.fault(projection);
    match &fault {
      Some(Fault::Error(e)) => return Err(e.clone()),
      Some(Fault::Panic) => panic!("simulated rebuild panic in {}", projection),
      _ => {}
    }

    let shards = spec.shards.max(1);
    let per_shard = Duration::from_millis(spec.rebuild_millis / u64::from(shards));
    let sequence = self.state.sequence.load(Ordering::SeqCst);

    for index in 0..shards {
      tokio::select! {
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        _ = tokio::time::sleep(per_shard) => {}
      }

      let shard = if shards == 1 {
        format!("{}:All", projection)
      } else {
        format!("{}:{}", projection, index)
      };
      let failure = match (&fault, index) {
        (Some(Fault::ShardFailure { kind, message }), 0) => Some(ShardFailure {
          kind: kind.clone(),
          message: message.clone(),
        }),
        _ => None,
      };

      self.publish(ShardState {
        projection: projection.to_string(),
        shard,
        sequence,
        failure,
      });
    }

    info!(projection, sequence, "Simulated projection rebuilt");
    self
      .state
      .rebuilt
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push(projection.to_string());
    Ok(())
  }

  async fn stop_all(&self) -> Result<(), EngineError> {
    if !self.stopped.swap(true, Ordering::SeqCst) {
      self.state.daemons_stopped.fetch_add(1, Ordering::SeqCst);
    }
    Ok(())
  }
}
