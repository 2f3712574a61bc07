//! Per-session send loop for the push transport.
//!
//! Each active session gets a dedicated thread that wakes every tick, asks
//! the [`SessionManager`] for at most one update and writes it to the shared
//! outbound socket.  Stopping is cooperative: the loop checks the session's
//! stop flag once per tick, so shutdown takes at most one tick period.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::manage_sessions::{SessionManager, UpdateFilter};
use super::session::Session;

/// Default interval between two send-loop wake-ups.
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

/// Outbound side of a transport, shared by every send loop.
///
/// One call writes one whole message; implementations must be safe to call
/// from several threads at once.
pub trait PacketSink: Send + Sync {
    fn send_packet(&self, packet: &[u8], peer: SocketAddr) -> io::Result<()>;
}

impl PacketSink for std::net::UdpSocket {
    fn send_packet(&self, packet: &[u8], peer: SocketAddr) -> io::Result<()> {
        self.send_to(packet, peer).map(|_| ())
    }
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Sent,
    /// Neither a command nor movement was pending.
    Idle,
    /// Building or sending failed; the update is dropped.
    Failed,
}

/// Runs a single tick for `session`.
pub fn run_tick(manager: &SessionManager, session: &Session, sink: &dyn PacketSink) -> TickOutcome {
    let packet = match manager.next_update(session, UpdateFilter::Any) {
        Ok(Some(packet)) => packet,
        Ok(None) => return TickOutcome::Idle,
        Err(e) => {
            warn!("failed to build update for {}: {e}", session.peer());
            return TickOutcome::Failed;
        }
    };
    match sink.send_packet(&packet, session.peer()) {
        Ok(()) => TickOutcome::Sent,
        Err(e) => {
            warn!("send to {} failed, update dropped: {e}", session.peer());
            TickOutcome::Failed
        }
    }
}

/// Starts the send loop thread for `session` and marks it active.
///
/// # Errors
///
/// Returns the OS error if the thread cannot be spawned.
pub fn spawn_send_loop(
    manager: Arc<SessionManager>,
    session: Arc<Session>,
    sink: Arc<dyn PacketSink>,
    tick: Duration,
) -> io::Result<JoinHandle<()>> {
    session.activate();
    thread::Builder::new()
        .name(format!("padlink-send-{}", session.peer()))
        .spawn(move || {
            while !session.is_stopped() {
                thread::sleep(tick);
                if session.is_stopped() {
                    break;
                }
                run_tick(&manager, &session, sink.as_ref());
            }
            debug!("send loop for session {} exited", session.id());
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
