//! Connection Error Taxonomy
//!
//! Every failure here collapses into the single [`ConnectionState::Error`]
//! state as far as the listener is concerned; the variants exist so logs and
//! internal events can name the actual cause.
//!
//! [`ConnectionState::Error`]: crate::ConnectionState

use std::io;

use thiserror::Error;

/// Reasons a connection attempt or an established link can fail
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Bind or accept failed while waiting for a peer
    #[error("failed to bind or accept on port {port}: {source}")]
    Accept {
        port: u16,
        #[source]
        source: io::Error,
    },

    /// The peer closed the connection cleanly (end-of-stream during read)
    #[error("peer closed the connection")]
    StreamEnd,

    /// I/O failure while reading from the link
    #[error("read from peer failed: {0}")]
    Stream(#[source] io::Error),

    /// `send_data` was called while the link was not connected
    #[error("send_data called while not connected")]
    SendOnDisconnected,
}
