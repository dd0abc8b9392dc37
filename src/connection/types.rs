//! Connection Types

use std::fmt;
use std::io;
use std::net::SocketAddr;

use tokio::net::TcpStream;

use crate::error::ConnectionError;

/// Lifecycle state of the peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in progress
    Idle,
    /// Waiting for a peer to connect
    Connecting,
    /// A peer is connected and messages can flow
    Connected,
    /// The connection attempt or the established link failed
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Notification sink for inbound data and lifecycle changes
///
/// Both callbacks are invoked only from the owning context (the task that
/// drives the [`ConnectionManager`]), serialized with respect to each other
/// and to every caller-driven operation.
///
/// [`ConnectionManager`]: crate::ConnectionManager
pub trait ConnectionListener: Send {
    /// Called once per inbound line, in arrival order
    fn on_data(&mut self, line: &str);

    /// Called once per actual state transition (never for a no-op change)
    fn on_connection_state_changed(&mut self, state: ConnectionState);
}

/// Result produced by a background task, tagged with the generation it was
/// issued under so stale completions can be discarded after a `reset()`.
#[derive(Debug)]
pub(crate) enum TaskEvent {
    /// The accept task finished, successfully or not
    Accepted {
        generation: u64,
        result: io::Result<(TcpStream, SocketAddr)>,
    },
    /// The receive loop read one line
    Line { generation: u64, line: String },
    /// The receive loop terminated because the peer is gone
    Disconnected {
        generation: u64,
        cause: ConnectionError,
    },
}

impl TaskEvent {
    /// Generation the originating task was launched under
    pub(crate) fn generation(&self) -> u64 {
        match self {
            TaskEvent::Accepted { generation, .. } => *generation,
            TaskEvent::Line { generation, .. } => *generation,
            TaskEvent::Disconnected { generation, .. } => *generation,
        }
    }
}
