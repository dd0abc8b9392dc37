//! Connection Management Module
//!
//! Handles accepting a single TCP peer, tracking the link lifecycle, and
//! moving line-delimited messages in both directions.

pub(crate) mod accept;
pub mod manager;
pub(crate) mod receive;
pub(crate) mod sender;
pub mod types;

pub use manager::ConnectionManager;
pub(crate) use sender::LineSender;
pub use types::{ConnectionListener, ConnectionState};
