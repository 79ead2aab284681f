//! Per-node consumer of broadcast rebuild requests.

use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{RebuildBus, RebuildRequested};
use crate::{
  coordinator::{RebuildCoordinator, RunOutcome},
  domain::node::NodeId,
};

/// Feeds every received [`RebuildRequested`] to [`RebuildCoordinator::run_rebuild`].
///
/// Requests are handled one at a time in arrival order. The subscription is
/// opened on construction so nothing published after that point is missed.
pub struct RebuildConsumer {
  node: NodeId,
  coordinator: Arc<RebuildCoordinator>,
  events: BoxStream<'static, RebuildRequested>,
}

impl RebuildConsumer {
  pub fn new(node: NodeId, bus: &dyn RebuildBus, coordinator: Arc<RebuildCoordinator>) -> Self {
    let events = bus.subscribe(&node);
    Self {
      node,
      coordinator,
      events,
    }
  }

  pub async fn run(self, cancel: CancellationToken) {
    let Self {
      node,
      coordinator,
      mut events,
    } = self;
    info!(node = %node, "Rebuild consumer started");

    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          debug!(node = %node, "Rebuild consumer shutting down (cancelled)");
          break;
        }

        event = events.next() => {
          let Some(event) = event else {
            debug!(node = %node, "Rebuild subscription closed");
            break;
          };
          handle(&node, &coordinator, event).await;
        }
      }
    }

    info!(node = %node, "Rebuild consumer stopped");
  }
}

// The subscription stream is not `Sync` and must stay out of this future.
async fn handle(node: &NodeId, coordinator: &RebuildCoordinator, event: RebuildRequested) {
  debug!(node = %node, projections = %event.projections, "Rebuild request received");

  match coordinator.run_rebuild(&event.projections).await {
    Ok(RunOutcome::NotLeader) => {
      debug!(node = %node, "Ignoring rebuild request on follower");
    }
    Ok(RunOutcome::Finished(status)) => {
      info!(node = %node, state = status.state(), "Broadcast rebuild finished");
    }
    Err(e) => {
      error!(node = %node, error = %e, "Broadcast rebuild failed");
    }
  }
}
