//! SSE forwarding for per-transaction event streams.

use crate::error::TxError;
use crate::lifecycle::TransactionManager;
use crate::notify::TransactionEvent;
use crate::types::{NotificationEvent, Timestamp, TransactionId};
use futures_util::{Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use warp::sse::Event;

use super::GatewayConfig;

/// Outbound buffer per connection.
const OUT_BUFFER: usize = 64;

/// Build the SSE event stream for one transaction.
///
/// A forwarding task bridges the manager subscription into the response
/// stream; when the client disconnects, the bridge channel closes and the
/// task unsubscribes.
pub(crate) fn sse_events(
    manager: Arc<TransactionManager>,
    config: GatewayConfig,
    id: TransactionId,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let (out, rx) = mpsc::channel(OUT_BUFFER);
    tokio::spawn(forward(manager, config, id, out));
    ReceiverStream::new(rx).map(Ok)
}

async fn forward(
    manager: Arc<TransactionManager>,
    config: GatewayConfig,
    id: TransactionId,
    out: mpsc::Sender<Event>,
) {
    // Snapshot-first subscription; a lookup failure becomes one explicit
    // error event and closure, never a silent hang.
    let mut stream = match manager.subscribe(&id) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = out.send(error_event(&e)).await;
            return;
        }
    };
    let subscription = stream.id();

    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );

    loop {
        tokio::select! {
            // Transport-level disconnect: release the subscription right
            // away. The transaction itself is never cancelled from here.
            _ = out.closed() => break,
            _ = heartbeat.tick() => {
                if out.send(heartbeat_event()).await.is_err() {
                    break;
                }
            }
            event = stream.recv() => match event {
                Some(TransactionEvent::Status(ev)) => {
                    let terminal = ev.status.is_terminal();
                    match status_event(&ev) {
                        Ok(sse) => {
                            if out.send(sse).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = out.send(error_event(&e.into())).await;
                            break;
                        }
                    }
                    if terminal {
                        // Give the final event a moment to flush, then close.
                        tokio::time::sleep(config.terminal_grace).await;
                        break;
                    }
                }
                Some(TransactionEvent::Dropped { reason }) => {
                    debug!(transaction_id = %id, ?reason, "subscription dropped mid-stream");
                    let _ = out.send(error_event(&TxError::SubscriptionDropped)).await;
                    break;
                }
                None => break,
            }
        }
    }

    manager.unsubscribe(subscription);
}

fn status_event(ev: &NotificationEvent) -> Result<Event, serde_json::Error> {
    Event::default().event("status").json_data(ev)
}

fn heartbeat_event() -> Event {
    Event::default()
        .event("heartbeat")
        .data(json!({ "timestamp": Timestamp::now() }).to_string())
}

fn error_event(e: &TxError) -> Event {
    let body = json!({ "kind": e.kind(), "message": e.to_string() });
    Event::default().event("error").data(body.to_string())
}
