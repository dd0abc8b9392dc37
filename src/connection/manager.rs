//! Connection Manager Implementation

use std::net::SocketAddr;

use socket2::SockRef;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::connection::types::TaskEvent;
use crate::connection::{accept, receive, ConnectionListener, ConnectionState, LineSender};
use crate::error::ConnectionError;

/// Manages one duplex TCP link and its lifecycle
///
/// The manager accepts a single inbound peer on a fixed port (server role),
/// tracks the [`ConnectionState`], and moves newline-delimited text in both
/// directions. Background tasks (the accept operation and the receive loop)
/// never touch state directly; they post [`TaskEvent`]s through an ordered
/// channel, and the manager applies them when the owning context calls
/// [`drive`] or [`poll_events`]. Because every mutation goes through
/// `&mut self`, the single-mutator rule is enforced by the borrow checker and
/// no locks are needed.
///
/// Every event carries the generation it was issued under; [`reset`] bumps
/// the generation so that completions already in flight are recognized as
/// stale and discarded instead of applied.
///
/// [`drive`]: ConnectionManager::drive
/// [`poll_events`]: ConnectionManager::poll_events
/// [`reset`]: ConnectionManager::reset
pub struct ConnectionManager {
    port: u16,
    state: ConnectionState,
    generation: u64,
    peer_addr: Option<SocketAddr>,
    sender: Option<LineSender>,
    accept_task: Option<JoinHandle<()>>,
    receive_task: Option<JoinHandle<()>>,
    listener: Option<Box<dyn ConnectionListener>>,
    events_tx: UnboundedSender<TaskEvent>,
    events_rx: UnboundedReceiver<TaskEvent>,
}

impl ConnectionManager {
    /// Create a new manager in the [`ConnectionState::Idle`] state
    pub fn new(port: u16) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            port,
            state: ConnectionState::Idle,
            generation: 0,
            peer_addr: None,
            sender: None,
            accept_task: None,
            receive_task: None,
            listener: None,
            events_tx,
            events_rx,
        }
    }

    /// Replace the listener notified of inbound data and state changes
    pub fn set_listener(&mut self, listener: impl ConnectionListener + 'static) {
        self.listener = Some(Box::new(listener));
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Address of the connected peer, or `None` when not connected
    pub fn connected_address(&self) -> Option<SocketAddr> {
        match self.state {
            ConnectionState::Connected => self.peer_addr,
            _ => None,
        }
    }

    /// Port this manager listens on
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Begin waiting for a peer on the configured port.
    ///
    /// No-op while an accept operation is already outstanding. Otherwise the
    /// generation is bumped, state moves to Connecting, and a fresh accept
    /// task is spawned for the new generation.
    pub fn start_connection(&mut self) {
        if self.is_connecting() {
            debug!(port = self.port, "connection attempt already in progress");
            return;
        }

        // Restarting over an established link retires it first so the old
        // channel never outlives the Connected state.
        if self.state == ConnectionState::Connected {
            self.teardown_link();
        }

        self.generation += 1;
        info!(
            port = self.port,
            generation = self.generation,
            "connection in progress"
        );
        self.set_state(ConnectionState::Connecting);
        self.accept_task = Some(tokio::spawn(accept::run(
            self.port,
            self.generation,
            self.events_tx.clone(),
        )));
    }

    /// Tear everything down and return to Idle.
    ///
    /// Idempotent and callable from any state, including Error and while an
    /// accept or receive task is mid-flight; never raises. The generation
    /// bump makes every in-flight completion stale.
    pub fn reset(&mut self) {
        info!(port = self.port, "connection reset");
        self.teardown_link();
        self.set_state(ConnectionState::Idle);
    }

    /// Send one line to the connected peer.
    ///
    /// The text is written untouched, terminated, and flushed before this
    /// returns. Calling while not connected performs no write and drives the
    /// manager to Error. Must be invoked from the owning context only, like
    /// every other mutating operation.
    pub async fn send_data(&mut self, text: &str) {
        if self.state != ConnectionState::Connected {
            error!(
                state = %self.state,
                "{}", ConnectionError::SendOnDisconnected
            );
            self.on_error();
            return;
        }

        match self.sender.as_mut() {
            Some(sender) => {
                if let Err(e) = sender.send_line(text).await {
                    // Not authoritative: the receive loop surfaces the
                    // actual disconnect when the peer is really gone.
                    warn!(error = %e, "write to peer failed");
                }
            }
            None => {
                debug_assert!(false, "sender missing while state is connected");
                error!("sender missing while state is connected");
                self.on_error();
            }
        }
    }

    /// Await the next background task result and apply it.
    ///
    /// The owning context calls this in its event loop (typically inside a
    /// `select!` alongside its own command sources). All state transitions
    /// and listener callbacks triggered by background work happen inside
    /// this call.
    pub async fn drive(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.apply(event);
        }
    }

    /// Apply every task event already queued, without waiting
    pub fn poll_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event);
        }
    }

    /// True while an accept task is outstanding and unfinished
    fn is_connecting(&self) -> bool {
        self.accept_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    // Sole entry point for background task results. Anything issued under an
    // older generation was cancelled by a reset or restart and is dropped
    // here, before it can touch state.
    fn apply(&mut self, event: TaskEvent) {
        if event.generation() != self.generation {
            trace!(
                generation = event.generation(),
                current = self.generation,
                "discarding stale task event"
            );
            return;
        }

        match event {
            TaskEvent::Accepted { result, .. } => self.on_accept_result(result),
            TaskEvent::Line { line, .. } => self.on_data_received(&line),
            TaskEvent::Disconnected { cause, .. } => self.on_receive_terminated(cause),
        }
    }

    fn on_accept_result(&mut self, result: std::io::Result<(TcpStream, SocketAddr)>) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }

        match result {
            Ok((stream, peer)) => self.on_connected(stream, peer),
            Err(e) => {
                let cause = ConnectionError::Accept {
                    port: self.port,
                    source: e,
                };
                error!(error = %cause, "connection attempt failed");
                self.on_error();
            }
        }
    }

    fn on_connected(&mut self, stream: TcpStream, peer: SocketAddr) {
        info!(%peer, "connected to peer");

        if let Err(e) = SockRef::from(&stream).set_keepalive(true) {
            error!(error = %e, "failed to enable keepalive on accepted stream");
            self.on_error();
            return;
        }

        // A replaced link (restart from Connected) may still have its old
        // receive loop winding down.
        if let Some(task) = self.receive_task.take() {
            task.abort();
        }

        let (read_half, write_half) = stream.into_split();
        self.sender = Some(LineSender::new(write_half));
        self.receive_task = Some(tokio::spawn(receive::run(
            read_half,
            self.generation,
            self.events_tx.clone(),
        )));
        self.peer_addr = Some(peer);
        self.set_state(ConnectionState::Connected);
    }

    fn on_data_received(&mut self, line: &str) {
        if let Some(listener) = self.listener.as_deref_mut() {
            listener.on_data(line);
        }
    }

    fn on_receive_terminated(&mut self, cause: ConnectionError) {
        self.receive_task = None;

        // Only an unexpected loss escalates. If the manager no longer
        // regards itself as connected, the link was torn down on purpose and
        // this signal is the tail end of that teardown.
        if self.state == ConnectionState::Connected {
            warn!(error = %cause, "link to peer lost");
            self.on_error();
        }
    }

    fn on_error(&mut self) {
        self.teardown_link();
        self.set_state(ConnectionState::Error);
    }

    // Cancel both background tasks and release the channel. Dropping the
    // sender closes the write half; the aborted receive loop drops the read
    // half. Neither can fail in a way that reaches the caller.
    fn teardown_link(&mut self) {
        self.generation += 1;

        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        if let Some(task) = self.receive_task.take() {
            task.abort();
        }
        self.sender = None;
        self.peer_addr = None;
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        if self.state == new_state {
            return;
        }

        self.state = new_state;
        debug!(state = %new_state, "moving to state");
        if let Some(listener) = self.listener.as_deref_mut() {
            listener.on_connection_state_changed(new_state);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        if let Some(task) = self.receive_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct Recorder {
        states: Arc<Mutex<Vec<ConnectionState>>>,
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn states(&self) -> Vec<ConnectionState> {
            self.states.lock().unwrap().clone()
        }

        fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl ConnectionListener for Recorder {
        fn on_data(&mut self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }

        fn on_connection_state_changed(&mut self, state: ConnectionState) {
            self.states.lock().unwrap().push(state);
        }
    }

    /// Accepted socket pair for fabricating accept results
    async fn socket_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (server, client, peer)
    }

    #[tokio::test]
    async fn new_manager_starts_idle_with_no_peer() {
        let manager = ConnectionManager::new(9000);

        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(manager.connected_address(), None);
        assert_eq!(manager.port(), 9000);
    }

    #[tokio::test]
    async fn start_connection_moves_to_connecting_once() {
        let mut manager = ConnectionManager::new(0);
        let recorder = Recorder::default();
        manager.set_listener(recorder.clone());

        manager.start_connection();
        let first_generation = manager.generation;
        assert_eq!(manager.state(), ConnectionState::Connecting);

        // Second call while the accept is outstanding is a no-op.
        manager.start_connection();
        assert_eq!(manager.generation, first_generation);
        assert_eq!(recorder.states(), vec![ConnectionState::Connecting]);
    }

    #[tokio::test]
    async fn reset_is_idempotent_and_silent_from_idle() {
        let mut manager = ConnectionManager::new(0);
        let recorder = Recorder::default();
        manager.set_listener(recorder.clone());

        manager.reset();
        manager.reset();

        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(recorder.states().is_empty());
    }

    #[tokio::test]
    async fn late_accept_after_reset_leaves_state_idle() {
        let mut manager = ConnectionManager::new(0);
        let recorder = Recorder::default();
        manager.set_listener(recorder.clone());

        manager.start_connection();
        let pending_generation = manager.generation;
        manager.reset();
        assert_eq!(manager.state(), ConnectionState::Idle);

        // The original accept completes anyway; its generation is stale.
        let (server, _client, peer) = socket_pair().await;
        manager.apply(TaskEvent::Accepted {
            generation: pending_generation,
            result: Ok((server, peer)),
        });

        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(
            recorder.states(),
            vec![ConnectionState::Connecting, ConnectionState::Idle]
        );
    }

    #[tokio::test]
    async fn accept_failure_moves_to_error() {
        let mut manager = ConnectionManager::new(0);
        let recorder = Recorder::default();
        manager.set_listener(recorder.clone());

        manager.start_connection();
        manager.apply(TaskEvent::Accepted {
            generation: manager.generation,
            result: Err(std::io::Error::from(std::io::ErrorKind::AddrInUse)),
        });

        assert_eq!(manager.state(), ConnectionState::Error);
        assert_eq!(
            recorder.states(),
            vec![ConnectionState::Connecting, ConnectionState::Error]
        );
    }

    #[tokio::test]
    async fn successful_accept_moves_to_connected_and_exposes_peer() {
        let mut manager = ConnectionManager::new(0);
        let recorder = Recorder::default();
        manager.set_listener(recorder.clone());

        manager.start_connection();
        let (server, _client, peer) = socket_pair().await;
        manager.apply(TaskEvent::Accepted {
            generation: manager.generation,
            result: Ok((server, peer)),
        });

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.connected_address(), Some(peer));
        assert!(manager.sender.is_some());
    }

    #[tokio::test]
    async fn stale_line_and_disconnect_events_are_discarded() {
        let mut manager = ConnectionManager::new(0);
        let recorder = Recorder::default();
        manager.set_listener(recorder.clone());

        let old_generation = manager.generation;
        manager.reset();

        manager.apply(TaskEvent::Line {
            generation: old_generation,
            line: "PRESS:A".into(),
        });
        manager.apply(TaskEvent::Disconnected {
            generation: old_generation,
            cause: ConnectionError::StreamEnd,
        });

        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(recorder.lines().is_empty());
        assert!(recorder.states().is_empty());
    }

    #[tokio::test]
    async fn disconnect_signal_while_not_connected_does_not_escalate() {
        let mut manager = ConnectionManager::new(0);
        let recorder = Recorder::default();
        manager.set_listener(recorder.clone());

        manager.apply(TaskEvent::Disconnected {
            generation: manager.generation,
            cause: ConnectionError::StreamEnd,
        });

        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(recorder.states().is_empty());
    }

    #[tokio::test]
    async fn disconnect_signal_while_connected_moves_to_error() {
        let mut manager = ConnectionManager::new(0);
        let recorder = Recorder::default();
        manager.set_listener(recorder.clone());

        manager.start_connection();
        let (server, _client, peer) = socket_pair().await;
        manager.apply(TaskEvent::Accepted {
            generation: manager.generation,
            result: Ok((server, peer)),
        });
        manager.apply(TaskEvent::Disconnected {
            generation: manager.generation,
            cause: ConnectionError::Stream(std::io::Error::from(
                std::io::ErrorKind::ConnectionReset,
            )),
        });

        assert_eq!(manager.state(), ConnectionState::Error);
        assert_eq!(manager.connected_address(), None);
        assert!(manager.sender.is_none());
        assert_eq!(
            recorder.states(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Error
            ]
        );
    }

    #[tokio::test]
    async fn restart_from_connected_retires_the_old_link_first() {
        let mut manager = ConnectionManager::new(0);
        let recorder = Recorder::default();
        manager.set_listener(recorder.clone());

        manager.start_connection();
        let (server, _client, peer) = socket_pair().await;
        manager.apply(TaskEvent::Accepted {
            generation: manager.generation,
            result: Ok((server, peer)),
        });
        assert_eq!(manager.state(), ConnectionState::Connected);
        let connected_generation = manager.generation;

        // No accept is outstanding anymore, so this is a restart: the
        // established link is torn down before the new attempt begins.
        manager.start_connection();

        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(manager.generation > connected_generation);
        assert!(manager.sender.is_none());
        assert!(manager.peer_addr.is_none());
        assert_eq!(
            recorder.states(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Connecting
            ]
        );
    }

    #[tokio::test]
    async fn reset_from_error_returns_to_idle() {
        let mut manager = ConnectionManager::new(0);
        let recorder = Recorder::default();
        manager.set_listener(recorder.clone());

        manager.start_connection();
        manager.apply(TaskEvent::Accepted {
            generation: manager.generation,
            result: Err(std::io::Error::from(std::io::ErrorKind::AddrInUse)),
        });
        assert_eq!(manager.state(), ConnectionState::Error);

        manager.reset();
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn inbound_lines_reach_the_listener_in_order() {
        let mut manager = ConnectionManager::new(0);
        let recorder = Recorder::default();
        manager.set_listener(recorder.clone());

        manager.start_connection();
        let (server, _client, peer) = socket_pair().await;
        manager.apply(TaskEvent::Accepted {
            generation: manager.generation,
            result: Ok((server, peer)),
        });
        manager.apply(TaskEvent::Line {
            generation: manager.generation,
            line: "PRESS:A".into(),
        });
        manager.apply(TaskEvent::Line {
            generation: manager.generation,
            line: "RELEASE:A".into(),
        });

        assert_eq!(recorder.lines(), vec!["PRESS:A", "RELEASE:A"]);
    }
}
