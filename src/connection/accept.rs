//! Accept Operation
//!
//! Background task that waits for exactly one inbound peer on a given port.
//! The listening socket lives only as long as the task: it is dropped as soon
//! as the first accept completes, fails, or the task is aborted.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::connection::types::TaskEvent;

/// Bind a listener on `port` and accept a single peer, posting the outcome
/// (tagged with `generation`) back to the owning context.
///
/// Cancellation is best-effort via task abort; a completion that was already
/// queued when the manager reset is recognized as stale by its generation and
/// discarded at delivery.
pub(crate) async fn run(port: u16, generation: u64, events: UnboundedSender<TaskEvent>) {
    debug!(port, generation, "accept task started");

    let result = bind_and_accept(port).await;
    match &result {
        Ok((_, peer)) => info!(port, %peer, "accepted peer connection"),
        Err(e) => warn!(port, error = %e, "accept failed"),
    }

    // The manager may already be gone; nothing left to deliver to.
    let _ = events.send(TaskEvent::Accepted { generation, result });
}

async fn bind_and_accept(port: u16) -> io::Result<(TcpStream, SocketAddr)> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    listener.accept().await
}
