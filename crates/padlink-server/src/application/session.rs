//! Per-peer session state.
//!
//! # Session lifecycle (for beginners)
//!
//! ```text
//! (no entry)  ──OPEN──►  Open  ──send loop starts──►  Active  ──CLOSE / eviction──►  Closed
//! ```
//!
//! - *No entry*: the peer is unregistered; only a valid OPEN creates a session.
//! - `Open`: OPEN accepted, OPEN-ACK sent, send loop not yet running.
//! - `Active`: the send loop is ticking (or, for the pull transport, the
//!   session is answering queries).
//! - `Closed`: terminal.  The stop flag is set and the send loop exits on its
//!   next tick.
//!
//! Every counter lives on the session itself, so two listeners never share a
//! sequence space.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use padlink_core::protocol::{ScreenSize, SequenceCounter, SequenceWatermark};
use padlink_core::SessionKey;
use parking_lot::Mutex;
use uuid::Uuid;

use super::command_queue::CommandQueue;

/// Unique identifier for a session, for logs and status events.
pub type SessionId = Uuid;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Active,
    Closed,
}

/// Server-side state for one connected listener.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    key: Option<SessionKey>,
    screen: Option<ScreenSize>,
    /// Highest accepted inbound sequence number.
    pub inbound: SequenceWatermark,
    /// Outbound sequence numbers for everything sent to this peer.
    pub outbound: SequenceCounter,
    /// Per-session command queue (secured mode).
    pub commands: CommandQueue,
    drops: AtomicU32,
    state: Mutex<SessionState>,
    stop: AtomicBool,
}

impl Session {
    /// Creates a session in the `Open` state.  `key` is `None` when unsecured.
    pub fn new(peer: SocketAddr, key: Option<SessionKey>, screen: Option<ScreenSize>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            key,
            screen,
            inbound: SequenceWatermark::new(),
            outbound: SequenceCounter::new(),
            commands: CommandQueue::new(),
            drops: AtomicU32::new(0),
            state: Mutex::new(SessionState::Open),
            stop: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn key(&self) -> Option<&SessionKey> {
        self.key.as_ref()
    }

    /// Screen size the listener announced in its OPEN, if any.
    pub fn screen(&self) -> Option<ScreenSize> {
        self.screen
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Moves `Open` to `Active`.  Has no effect on a closed session.
    pub fn activate(&self) {
        let mut state = self.state.lock();
        if *state == SessionState::Open {
            *state = SessionState::Active;
        }
    }

    /// Marks the session closed and asks its send loop to exit.
    pub fn stop(&self) {
        *self.state.lock() = SessionState::Closed;
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Counts one undecryptable or malformed packet and returns the new total.
    ///
    /// The counter never resets while the session lives.
    pub fn record_drop(&self) -> u32 {
        self.drops.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn drops(&self) -> u32 {
        self.drops.load(Ordering::Acquire)
    }
}
