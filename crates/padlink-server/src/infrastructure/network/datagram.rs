//! Datagram ("push") transport.
//!
//! One shared UDP socket serves every listener.  A blocking receive loop on
//! a dedicated thread feeds each datagram to the session manager and carries
//! out the resulting [`InboundAction`]: replies go straight back to the
//! sender, and every newly opened session gets its own send-loop thread
//! writing to the same socket.
//!
//! # Read timeout
//!
//! The socket has a 500 ms read timeout.  `recv_from` therefore returns at
//! least twice a second, giving the loop a chance to notice that `stop()`
//! cleared the `running` flag.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{is_timeout_error, Transport, TransportError, RECV_TIMEOUT_MS};
use crate::application::events::{emit, ServerEvent};
use crate::application::manage_sessions::{InboundAction, SessionManager};
use crate::application::send_loop::{spawn_send_loop, PacketSink};
use crate::application::session::{Session, SessionId};

/// Largest datagram the receive loop reads.
const MAX_DATAGRAM_BYTES: usize = 2048;

/// The push transport binding.
pub struct DatagramTransport {
    shared: Arc<Shared>,
}

struct Shared {
    manager: Arc<SessionManager>,
    bind_addr: SocketAddr,
    tick: Duration,
    events: mpsc::Sender<ServerEvent>,
    running: AtomicBool,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    send_loops: Mutex<HashMap<SessionId, JoinHandle<()>>>,
}

impl DatagramTransport {
    pub fn new(
        manager: Arc<SessionManager>,
        bind_addr: SocketAddr,
        tick: Duration,
        events: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                manager,
                bind_addr,
                tick,
                events,
                running: AtomicBool::new(false),
                socket: Mutex::new(None),
                receiver: Mutex::new(None),
                send_loops: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Number of send loops currently tracked.
    pub fn send_loop_count(&self) -> usize {
        self.shared.send_loops.lock().len()
    }
}

impl Transport for DatagramTransport {
    fn start(&self) -> Result<SocketAddr, TransportError> {
        let shared = &self.shared;
        if shared.running.load(Ordering::Acquire) {
            return Err(TransportError::AlreadyRunning);
        }

        let addr = shared.bind_addr;
        let socket =
            UdpSocket::bind(addr).map_err(|source| TransportError::BindFailed { addr, source })?;
        if let Err(e) = socket.set_read_timeout(Some(Duration::from_millis(RECV_TIMEOUT_MS))) {
            warn!("could not set read timeout on {addr}: {e}");
        }
        let local_addr = socket
            .local_addr()
            .map_err(|source| TransportError::BindFailed { addr, source })?;
        let socket = Arc::new(socket);

        *shared.socket.lock() = Some(Arc::clone(&socket));
        shared.running.store(true, Ordering::Release);

        let loop_shared = Arc::clone(shared);
        let handle = std::thread::Builder::new()
            .name("padlink-datagram".to_string())
            .spawn(move || receive_loop(loop_shared, socket))
            .map_err(|source| {
                shared.running.store(false, Ordering::Release);
                *shared.socket.lock() = None;
                TransportError::Spawn {
                    what: "datagram receive",
                    source,
                }
            })?;
        *shared.receiver.lock() = Some(handle);

        info!("datagram transport listening on UDP {local_addr}");
        emit(&shared.events, ServerEvent::Started { local_addr });
        Ok(local_addr)
    }

    fn stop(&self) {
        let shared = &self.shared;
        if !shared.running.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(handle) = shared.receiver.lock().take() {
            if handle.join().is_err() {
                error!("datagram receive loop panicked");
            }
        }

        shared.manager.shutdown();
        let loops: Vec<_> = shared.send_loops.lock().drain().map(|(_, h)| h).collect();
        for handle in loops {
            if handle.join().is_err() {
                error!("send loop panicked");
            }
        }

        *shared.socket.lock() = None;
        info!("datagram transport stopped");
        emit(&shared.events, ServerEvent::Stopped);
    }

    fn dispatch(&self, peer: SocketAddr, raw: &[u8]) {
        self.shared.dispatch(peer, raw);
    }

    fn send_to_session(&self, session: &Session, packet: &[u8]) -> Result<(), TransportError> {
        self.shared.send(session.peer(), packet)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .socket
            .lock()
            .as_ref()
            .and_then(|s| s.local_addr().ok())
    }
}

impl Drop for DatagramTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn dispatch(&self, peer: SocketAddr, raw: &[u8]) {
        match self.manager.handle_datagram(peer, raw) {
            InboundAction::Opened {
                session,
                replaced,
                reply,
            } => {
                if let Some(old) = replaced {
                    self.forget_send_loop(old.id());
                    emit(
                        &self.events,
                        ServerEvent::SessionClosed {
                            id: old.id(),
                            peer: old.peer(),
                        },
                    );
                }
                if let Some(reply) = reply {
                    if let Err(e) = self.send(peer, &reply) {
                        warn!("failed to acknowledge OPEN: {e}");
                    }
                }
                self.start_send_loop(session);
            }
            InboundAction::Reply(reply) => {
                if let Err(e) = self.send(peer, &reply) {
                    warn!("failed to send reply: {e}");
                }
            }
            InboundAction::Closed(session) => {
                self.forget_send_loop(session.id());
                emit(
                    &self.events,
                    ServerEvent::SessionClosed {
                        id: session.id(),
                        peer,
                    },
                );
            }
            InboundAction::Evicted(session) => {
                self.forget_send_loop(session.id());
                emit(
                    &self.events,
                    ServerEvent::SessionEvicted {
                        id: session.id(),
                        peer,
                    },
                );
            }
            InboundAction::Dropped { .. } | InboundAction::Ignored => {}
        }
    }

    fn start_send_loop(&self, session: Arc<Session>) {
        let Some(socket) = self.socket.lock().clone() else {
            debug!("transport stopped before send loop for {} could start", session.peer());
            session.stop();
            return;
        };
        let sink: Arc<dyn PacketSink> = socket;
        let id = session.id();
        let peer = session.peer();

        match spawn_send_loop(
            Arc::clone(&self.manager),
            Arc::clone(&session),
            sink,
            self.tick,
        ) {
            Ok(handle) => {
                self.send_loops.lock().insert(id, handle);
                emit(&self.events, ServerEvent::SessionOpened { id, peer });
            }
            Err(e) => {
                error!("failed to start send loop for {peer}: {e}");
                session.stop();
            }
        }
    }

    /// Detaches a finished send loop; its stop flag is already set.
    fn forget_send_loop(&self, id: SessionId) {
        self.send_loops.lock().remove(&id);
    }

    fn send(&self, peer: SocketAddr, packet: &[u8]) -> Result<(), TransportError> {
        let socket = self.socket.lock().clone().ok_or(TransportError::NotRunning)?;
        socket
            .send_packet(packet, peer)
            .map_err(|source| TransportError::Send { peer, source })
    }
}

/// The main receive loop executed on the datagram thread.
fn receive_loop(shared: Arc<Shared>, socket: Arc<UdpSocket>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];

    while shared.running.load(Ordering::Acquire) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                error!("datagram recv error: {e}");
                continue;
            }
        };
        shared.dispatch(src, &buf[..len]);
    }

    info!("datagram receive loop stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::manage_sessions::SessionConfig;
    use padlink_core::{GestureRecognizer, SharedSettings};

    fn transport() -> (DatagramTransport, mpsc::Receiver<ServerEvent>) {
        let manager = Arc::new(
            SessionManager::new(
                SessionConfig::default(),
                Arc::new(GestureRecognizer::new(SharedSettings::default())),
            )
            .unwrap(),
        );
        let (tx, rx) = mpsc::channel(16);
        let transport = DatagramTransport::new(
            manager,
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_millis(10),
            tx,
        );
        (transport, rx)
    }

    fn client() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        socket
    }

    #[test]
    fn test_dispatch_open_replies_and_starts_send_loop() {
        // Arrange
        let (transport, _rx) = transport();
        transport.start().unwrap();
        let peer = client();
        let peer_addr = peer.local_addr().unwrap();
        let mut buf = [0u8; 64];

        // Act
        transport.dispatch(peer_addr, b"OPEN");
        let (len, _) = peer.recv_from(&mut buf).unwrap();

        // Assert
        assert_eq!(&buf[..len], b"OPEN-ACK");
        assert_eq!(transport.send_loop_count(), 1);

        transport.stop();
        assert_eq!(transport.send_loop_count(), 0);
    }

    #[test]
    fn test_send_to_session_reaches_peer() {
        let (transport, _rx) = transport();
        transport.start().unwrap();
        let peer = client();
        let session = Session::new(peer.local_addr().unwrap(), None, None);
        let mut buf = [0u8; 64];

        transport.send_to_session(&session, b"REL 1,2").unwrap();
        let (len, from) = peer.recv_from(&mut buf).unwrap();

        assert_eq!(&buf[..len], b"REL 1,2");
        assert_eq!(Some(from), transport.local_addr());
    }

    #[test]
    fn test_send_before_start_is_not_running() {
        let (transport, _rx) = transport();
        let session = Session::new("127.0.0.1:9".parse().unwrap(), None, None);
        assert!(matches!(
            transport.send_to_session(&session, b"x"),
            Err(TransportError::NotRunning)
        ));
        assert!(transport.local_addr().is_none());
    }

    #[test]
    fn test_close_forgets_send_loop_and_reports() {
        // Arrange
        let (transport, mut rx) = transport();
        transport.start().unwrap();
        let peer = client();
        let peer_addr = peer.local_addr().unwrap();
        transport.dispatch(peer_addr, b"OPEN");

        // Act
        transport.dispatch(peer_addr, b"CLOSE");

        // Assert
        assert_eq!(transport.send_loop_count(), 0);
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(matches!(events.as_slice(), [
            ServerEvent::Started { .. },
            ServerEvent::SessionOpened { .. },
            ServerEvent::SessionClosed { .. },
        ]));
    }
}
