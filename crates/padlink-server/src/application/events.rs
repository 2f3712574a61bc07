//! Status events reported to the display layer.
//!
//! Transports run on plain threads, so events are pushed with `try_send`: a
//! full or closed channel never stalls the receive loop.

use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::debug;

use super::session::SessionId;

/// Capacity of the status channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A lifecycle change worth showing to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Started { local_addr: SocketAddr },
    SessionOpened { id: SessionId, peer: SocketAddr },
    SessionClosed { id: SessionId, peer: SocketAddr },
    SessionEvicted { id: SessionId, peer: SocketAddr },
    Stopped,
    /// The transport cannot continue; the server must be restarted.
    Fatal(String),
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::Started { local_addr } => write!(f, "Server started on {local_addr}"),
            ServerEvent::SessionOpened { peer, .. } => write!(f, "Listener connected: {peer}"),
            ServerEvent::SessionClosed { peer, .. } => write!(f, "Listener disconnected: {peer}"),
            ServerEvent::SessionEvicted { peer, .. } => {
                write!(f, "Listener dropped after repeated bad packets: {peer}")
            }
            ServerEvent::Stopped => f.write_str("Server stopped"),
            ServerEvent::Fatal(reason) => write!(f, "Server error: {reason}"),
        }
    }
}

/// Sends an event without blocking.
pub fn emit(events: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    if let Err(e) = events.try_send(event) {
        debug!("status event not delivered: {e}");
    }
}
