//! Named-query ("pull") transport.
//!
//! Listeners never open a session here.  They send Interests for names under
//! the server prefix (default `/ndnmouse`) and the server answers each one
//! synchronously from current state:
//!
//! | Name                      | Answer                                       |
//! |---------------------------|----------------------------------------------|
//! | `<prefix>/update`         | next command, else movement                  |
//! | `<prefix>/move`           | movement only                                |
//! | `<prefix>/click`          | commands only                                |
//! | `<prefix>/seq/<packet>`   | SEQ-ACK after resync (secured only)          |
//! | `<prefix>/salt`           | the server-wide salt, cleartext (secured only) |
//!
//! When there is nothing new the Interest is left unanswered; the
//! requester's retry timer is the only flow control.  Every Data has a
//! freshness period of zero so no cache in between ever replays stale input.
//!
//! All requesters share one server-wide session: one key, one outbound
//! sequence and one command queue.  The first query creates it and only
//! eviction or shutdown ends it, so the registry never grows with the number
//! of requester addresses.

pub mod face;
pub mod routes;
pub mod tlv;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use self::face::UdpFace;
use self::routes::{QueryRoute, RouteTable};
use self::tlv::{Data, Interest, Name, Packet};
use super::{is_timeout_error, Transport, TransportError, RECV_TIMEOUT_MS};
use crate::application::events::{emit, ServerEvent};
use crate::application::manage_sessions::{InboundAction, SessionManager, UpdateFilter};
use crate::application::session::Session;

/// Default name prefix.
pub const DEFAULT_PREFIX: &str = "/ndnmouse";

const MAX_INTEREST_BYTES: usize = 8800;

/// The pull transport binding.
pub struct NamedQueryTransport {
    shared: Arc<Shared>,
}

struct Shared {
    manager: Arc<SessionManager>,
    bind_addr: SocketAddr,
    prefix: Name,
    routes: RwLock<RouteTable>,
    events: mpsc::Sender<ServerEvent>,
    running: AtomicBool,
    face: Mutex<Option<Arc<UdpFace>>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl NamedQueryTransport {
    /// Creates the transport and registers its routes under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::RouteRegistration`] if the prefix is not a
    /// valid name or a route cannot be registered.
    pub fn new(
        manager: Arc<SessionManager>,
        bind_addr: SocketAddr,
        prefix: &str,
        events: mpsc::Sender<ServerEvent>,
    ) -> Result<Self, TransportError> {
        let prefix_name =
            Name::from_uri(prefix).map_err(|e| TransportError::RouteRegistration {
                prefix: prefix.to_string(),
                reason: e.to_string(),
            })?;

        let mut routes = RouteTable::new();
        let mut wanted = vec![QueryRoute::Update, QueryRoute::Move, QueryRoute::Click];
        if manager.config().is_secure() {
            wanted.extend([QueryRoute::Seq, QueryRoute::Salt]);
        }
        for route in wanted {
            let name = prefix_name.child(route.component());
            routes.register(name.clone(), route)?;
            debug!("registered route {name}");
        }

        Ok(Self {
            shared: Arc::new(Shared {
                manager,
                bind_addr,
                prefix: prefix_name,
                routes: RwLock::new(routes),
                events,
                running: AtomicBool::new(false),
                face: Mutex::new(None),
                receiver: Mutex::new(None),
            }),
        })
    }

    pub fn prefix(&self) -> &Name {
        &self.shared.prefix
    }

    pub fn route_count(&self) -> usize {
        self.shared.routes.read().len()
    }

    /// Computes the answer to `interest` from `peer` without sending it.
    pub fn answer(&self, peer: SocketAddr, interest: &Interest) -> Option<Data> {
        self.shared.answer(peer, interest)
    }
}

impl Transport for NamedQueryTransport {
    fn start(&self) -> Result<SocketAddr, TransportError> {
        let shared = &self.shared;
        if shared.running.load(Ordering::Acquire) {
            return Err(TransportError::AlreadyRunning);
        }

        let addr = shared.bind_addr;
        let face = UdpFace::bind(addr, Duration::from_millis(RECV_TIMEOUT_MS))?;
        let local_addr = face
            .local_addr()
            .map_err(|source| TransportError::BindFailed { addr, source })?;
        let face = Arc::new(face);

        *shared.face.lock() = Some(Arc::clone(&face));
        shared.running.store(true, Ordering::Release);

        let loop_shared = Arc::clone(shared);
        let handle = std::thread::Builder::new()
            .name("padlink-named-query".to_string())
            .spawn(move || receive_loop(loop_shared, face))
            .map_err(|source| {
                shared.running.store(false, Ordering::Release);
                *shared.face.lock() = None;
                TransportError::Spawn {
                    what: "named-query receive",
                    source,
                }
            })?;
        *shared.receiver.lock() = Some(handle);

        info!(
            "named-query transport serving {} on UDP {local_addr}",
            shared.prefix
        );
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
                error!("named-query receive loop panicked");
            }
        }
        shared.manager.shutdown();
        *shared.face.lock() = None;
        info!("named-query transport stopped");
        emit(&shared.events, ServerEvent::Stopped);
    }

    fn dispatch(&self, peer: SocketAddr, raw: &[u8]) {
        self.shared.dispatch(peer, raw);
    }

    /// Pushes an unsolicited Data named `<prefix>/update`.
    fn send_to_session(&self, session: &Session, packet: &[u8]) -> Result<(), TransportError> {
        let face = self.shared.face.lock().clone().ok_or(TransportError::NotRunning)?;
        let name = self.shared.prefix.child(QueryRoute::Update.component());
        face.put_data(&Data::new(name, packet.to_vec()), session.peer())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .face
            .lock()
            .as_ref()
            .and_then(|f| f.local_addr().ok())
    }
}

impl Drop for NamedQueryTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn dispatch(&self, peer: SocketAddr, raw: &[u8]) {
        let interest = match Packet::decode(raw) {
            Ok(Packet::Interest(interest)) => interest,
            Ok(Packet::Data(data)) => {
                debug!("ignoring unsolicited Data {} from {peer}", data.name);
                return;
            }
            Err(e) => {
                debug!("discarding malformed query from {peer}: {e}");
                return;
            }
        };
        let Some(data) = self.answer(peer, &interest) else {
            return;
        };
        let Some(face) = self.face.lock().clone() else {
            return;
        };
        if let Err(e) = face.put_data(&data, peer) {
            warn!("failed to answer {}: {e}", interest.name);
        }
    }

    fn answer(&self, peer: SocketAddr, interest: &Interest) -> Option<Data> {
        let Some((prefix_len, route)) = self
            .routes
            .read()
            .lookup(&interest.name)
            .map(|(prefix, route)| (prefix.len(), route))
        else {
            debug!("no route for {} from {peer}", interest.name);
            return None;
        };

        let content = match route {
            QueryRoute::Salt => Some(self.manager.salt().to_vec()),
            QueryRoute::Seq => self.answer_seq(peer, interest.name.get(prefix_len)),
            QueryRoute::Update => self.answer_update(peer, UpdateFilter::Any),
            QueryRoute::Move => self.answer_update(peer, UpdateFilter::MovementOnly),
            QueryRoute::Click => self.answer_update(peer, UpdateFilter::CommandsOnly),
        };
        content.map(|content| Data::new(interest.name.clone(), content))
    }

    fn answer_update(&self, peer: SocketAddr, filter: UpdateFilter) -> Option<Vec<u8>> {
        let session = self.requester(peer);
        match self.manager.next_update(&session, filter) {
            Ok(update) => update,
            Err(e) => {
                warn!("failed to build update for {peer}: {e}");
                None
            }
        }
    }

    fn answer_seq(&self, peer: SocketAddr, packet: Option<&[u8]>) -> Option<Vec<u8>> {
        let Some(packet) = packet else {
            debug!("sequence query from {peer} carries no request");
            return None;
        };
        let session = self.requester(peer);
        match self.manager.handle_seq_sync(&session, packet) {
            InboundAction::Reply(reply) => Some(reply),
            InboundAction::Evicted(evicted) => {
                emit(
                    &self.events,
                    ServerEvent::SessionEvicted {
                        id: evicted.id(),
                        peer,
                    },
                );
                None
            }
            _ => None,
        }
    }

    fn requester(&self, peer: SocketAddr) -> Arc<Session> {
        let (session, created) = self.manager.pull_session(peer);
        if created {
            emit(
                &self.events,
                ServerEvent::SessionOpened {
                    id: session.id(),
                    peer,
                },
            );
        }
        session
    }
}

fn receive_loop(shared: Arc<Shared>, face: Arc<UdpFace>) {
    let mut buf = vec![0u8; MAX_INTEREST_BYTES];

    while shared.running.load(Ordering::Acquire) {
        let (len, src) = match face.recv(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                error!("named-query recv error: {e}");
                continue;
            }
        };
        shared.dispatch(src, &buf[..len]);
    }

    info!("named-query receive loop stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
