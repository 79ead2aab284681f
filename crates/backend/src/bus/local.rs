//! In-process broadcast bus.

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::{debug, warn};

use super::{BusError, RebuildBus, RebuildRequested};
use crate::domain::node::NodeId;

const DEFAULT_CAPACITY: usize = 64;

/// Fan-out bus over a tokio broadcast channel.
///
/// Events travel as JSON so the bus carries the same payload a broker would.
#[derive(Debug, Clone)]
pub struct LocalBus {
  tx: broadcast::Sender<String>,
}

impl LocalBus {
  pub fn new() -> Self {
    Self::with_capacity(DEFAULT_CAPACITY)
  }

  pub fn with_capacity(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity);
    Self { tx }
  }

  pub fn subscriber_count(&self) -> usize {
    self.tx.receiver_count()
  }
}

impl Default for LocalBus {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl RebuildBus for LocalBus {
  async fn publish(&self, event: RebuildRequested) -> Result<(), BusError> {
    let payload = serde_json::to_string(&event)?;
    match self.tx.send(payload) {
      Ok(receivers) => debug!(receivers, projections = %event.projections, "Rebuild request published"),
      Err(_) => warn!(projections = %event.projections, "Rebuild request published with no subscribers"),
    }
    Ok(())
  }

  fn subscribe(&self, node: &NodeId) -> BoxStream<'static, RebuildRequested> {
    let node = node.clone();
    debug!(node = %node, "Rebuild subscription opened");

    BroadcastStream::new(self.tx.subscribe())
      .filter_map(move |item| {
        let event = match item {
          Ok(payload) => match serde_json::from_str::<RebuildRequested>(&payload) {
            Ok(event) => Some(event),
            Err(e) => {
              warn!(node = %node, error = %e, "Dropping undecodable rebuild request");
              None
            }
          },
          Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(node = %node, skipped, "Rebuild subscription lagged");
            None
          }
        };
        futures::future::ready(event)
      })
      .boxed()
  }
}
