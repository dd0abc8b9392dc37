//! Receive Loop
//!
//! Background task that reads newline-delimited UTF-8 text from the read half
//! of one connected link and forwards each line to the owning context, in
//! order, until end-of-stream, an I/O error, or task abort.
//!
//! The loop never closes the connection; teardown is the manager's job.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace, warn};

use crate::connection::types::TaskEvent;
use crate::error::ConnectionError;

/// Read lines from `read_half` until the stream ends or fails.
///
/// End-of-stream and read errors are posted as [`TaskEvent::Disconnected`];
/// abort (the manager resetting) terminates the loop silently since the
/// task's future is dropped at its current await point.
pub(crate) async fn run(
    read_half: OwnedReadHalf,
    generation: u64,
    events: UnboundedSender<TaskEvent>,
) {
    debug!(generation, "receive loop started");

    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                trace!(generation, len = line.len(), "received line");
                if events.send(TaskEvent::Line { generation, line }).is_err() {
                    // Manager dropped; nobody is listening anymore.
                    break;
                }
            }
            Ok(None) => {
                debug!(generation, "peer closed the stream");
                let _ = events.send(TaskEvent::Disconnected {
                    generation,
                    cause: ConnectionError::StreamEnd,
                });
                break;
            }
            Err(e) => {
                warn!(generation, error = %e, "read from peer failed");
                let _ = events.send(TaskEvent::Disconnected {
                    generation,
                    cause: ConnectionError::Stream(e),
                });
                break;
            }
        }
    }

    debug!(generation, "receive loop terminated");
}
