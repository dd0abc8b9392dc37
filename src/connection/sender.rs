//! Line Sender
//!
//! Thin writer over the write half of a connected link. Exists only while the
//! link is in the Connected state; the manager constructs it on a successful
//! accept and drops it on teardown.

use std::io;

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;

/// Writes one terminated, flushed line per call
#[derive(Debug)]
pub struct LineSender {
    writer: BufWriter<OwnedWriteHalf>,
}

impl LineSender {
    /// Wrap the write half of an accepted stream
    pub(crate) fn new(write_half: OwnedWriteHalf) -> Self {
        Self {
            writer: BufWriter::new(write_half),
        }
    }

    /// Write `line`, append the `\n` terminator, and flush before returning.
    ///
    /// The content is passed through untouched; callers must not include the
    /// terminator themselves.
    pub(crate) async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }
}
