//! UDP Sender
//!
//! Fire-and-forget datagram dispatch. Submissions are queued to a single
//! worker task, so the transport sees them in enqueue order, but nothing is
//! acknowledged, retried, or reported back; per-datagram failures are logged
//! and swallowed.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};

struct Datagram {
    addr: IpAddr,
    port: u16,
    payload: String,
}

/// One-shot UDP sender with a serialized dispatch queue
///
/// Independent of the TCP link: no state, no listener, no lifecycle beyond
/// the worker task, which ends once the sender is dropped and the backlog
/// has drained.
pub struct UdpSender {
    queue: UnboundedSender<Datagram>,
}

impl UdpSender {
    /// Create a sender and spawn its worker task
    pub fn new() -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_loop(rx));

        Self { queue }
    }

    /// Enqueue one datagram carrying `payload` as UTF-8 bytes.
    ///
    /// Returns immediately; delivery is not guaranteed and failures are only
    /// logged by the worker.
    pub fn send_data(&self, addr: IpAddr, port: u16, payload: impl Into<String>) {
        let datagram = Datagram {
            addr,
            port,
            payload: payload.into(),
        };
        if self.queue.send(datagram).is_err() {
            warn!("udp dispatch worker is gone, dropping datagram");
        }
    }
}

impl Default for UdpSender {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch_loop(mut rx: UnboundedReceiver<Datagram>) {
    debug!("udp dispatch worker started");

    while let Some(datagram) = rx.recv().await {
        if let Err(e) = dispatch(&datagram).await {
            warn!(
                addr = %datagram.addr,
                port = datagram.port,
                error = %e,
                "failed to send datagram"
            );
        }
    }

    debug!("udp dispatch worker terminated");
}

// One ephemeral socket per datagram, matching the one-shot contract.
async fn dispatch(datagram: &Datagram) -> io::Result<()> {
    let bind_addr: SocketAddr = match datagram.addr {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    let sent = socket
        .send_to(datagram.payload.as_bytes(), (datagram.addr, datagram.port))
        .await?;
    trace!(
        addr = %datagram.addr,
        port = datagram.port,
        bytes = sent,
        "datagram sent"
    );
    Ok(())
}
