//! Network infrastructure: the two transport bindings.
//!
//! # Sub-modules
//!
//! - **`datagram`** – The push transport.  One UDP socket, a blocking
//!   receive loop and one send-loop thread per active session.
//!
//! - **`named_query`** – The pull transport.  Listeners send named
//!   Interests; the server answers each one synchronously from current state,
//!   or not at all when there is nothing new.  The requester's own retry
//!   timer is the only flow control.
//!
//! Both feed the same [`SessionManager`](crate::application::manage_sessions::SessionManager),
//! so the protocol logic exists exactly once.

pub mod datagram;
pub mod named_query;

use std::net::SocketAddr;

use thiserror::Error;

use crate::application::session::Session;

/// Read timeout for blocking receive loops.  Bounds how long `stop()` waits.
pub const RECV_TIMEOUT_MS: u64 = 500;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket could not be bound.
    #[error("failed to bind socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A named route could not be registered.
    #[error("failed to register route {prefix}: {reason}")]
    RouteRegistration { prefix: String, reason: String },

    /// A background thread could not be started.
    #[error("failed to spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// `start()` was called on a running transport.
    #[error("transport is already running")]
    AlreadyRunning,

    /// The transport has no socket (not started, or already stopped).
    #[error("transport is not running")]
    NotRunning,

    /// Writing a message failed.
    #[error("send to {peer} failed: {source}")]
    Send {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// The interface both bindings implement.
pub trait Transport: Send + Sync {
    /// Binds, registers routes and starts the receive loop.
    ///
    /// Returns the bound local address.
    fn start(&self) -> Result<SocketAddr, TransportError>;

    /// Stops the receive loop and every session.  Safe to call twice.
    fn stop(&self);

    /// Processes one inbound datagram or query from `peer`.
    fn dispatch(&self, peer: SocketAddr, raw: &[u8]);

    /// Writes one encoded message to a session's peer.
    fn send_to_session(&self, session: &Session, packet: &[u8]) -> Result<(), TransportError>;

    /// The bound address while running.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
pub(crate) fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
