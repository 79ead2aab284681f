//! Server-sent status feed.
//!
//! Combines the node-local [`StatusListener`](crate::cache::StatusListener)
//! with a periodic store read. The push side delivers this node's writes
//! immediately; the poll side picks up writes from other nodes and TTL expiry.
//! Consecutive duplicates are suppressed.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::Event;
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{coordinator::RebuildCoordinator, domain::status::RebuildStatus};

pub fn status_stream(
  coordinator: Arc<RebuildCoordinator>,
  poll_interval: Duration,
  shutdown: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
  let (tx, rx) = mpsc::channel(8);
  let listener = coordinator.listen();

  tokio::spawn(async move {
    let mut last: Option<RebuildStatus> = None;
    // First tick fires immediately and emits the current status
    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
      let status = tokio::select! {
        _ = tx.closed() => break,
        _ = shutdown.cancelled() => break,

        update = listener.next_update() => match update {
          Some(status) => status,
          None => break,
        },

        _ = poll.tick() => match coordinator.status().await {
          Ok(status) => status,
          Err(e) => {
            warn!(error = %e, "Status poll failed");
            continue;
          }
        },
      };

      if last.as_ref() == Some(&status) {
        continue;
      }

      let event = match Event::default().event("status").json_data(&status) {
        Ok(event) => event,
        Err(e) => {
          warn!(error = %e, "Failed to encode status event");
          continue;
        }
      };
      if tx.send(Ok(event)).await.is_err() {
        break;
      }
      last = Some(status);
    }

    debug!("Status stream closed");
  });

  ReceiverStream::new(rx)
}
