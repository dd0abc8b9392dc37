//! Boardlink Library
//!
//! Manages a single duplex TCP link between two peer devices, carrying
//! newline-delimited UTF-8 text messages in both directions. The link has an
//! explicit lifecycle (Idle → Connecting → Connected → Error) surfaced to the
//! application through a listener trait. A minimal fire-and-forget UDP sender
//! is provided alongside for unacknowledged one-shot datagrams.
//!
//! The crate does not interpret message payloads, does not reconnect on its
//! own, and provides no encryption or authentication; those belong to the
//! application layer.

pub mod connection;
pub mod error;
pub mod udp;

pub use connection::{ConnectionListener, ConnectionManager, ConnectionState};
pub use error::ConnectionError;
pub use udp::UdpSender;

/// Common error type for the crate
pub type Result<T> = anyhow::Result<T>;
