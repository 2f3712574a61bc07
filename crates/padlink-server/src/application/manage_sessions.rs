//! SessionManager: the protocol state machine shared by both transports.
//!
//! The manager owns every [`Session`], keyed by peer address, plus the
//! server-wide command queue.  It never touches a socket: transports hand it
//! raw bytes and get back an [`InboundAction`] describing what to send and
//! which send loops to start or stop.  This keeps the push and pull bindings
//! thin and lets the whole state machine be tested without a network.
//!
//! # Inbound handling (secured)
//!
//! 1. If the peer has a session, try to open the packet with that session's
//!    key.  A control body is then checked against the inbound watermark.
//! 2. Otherwise (or if that failed) try the packet as a fresh OPEN: derive a
//!    key salted with the packet's own IV and require sequence 0.
//! 3. If both fail, the packet counts as a drop.  Three drops evict the
//!    session; packets from unknown peers are discarded silently.
//!
//! Replayed or out-of-order HEARTBEAT/CLOSE packets are *not* drops: they
//! decrypt fine and are simply ignored.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use padlink_core::crypto::{generate_salt, CryptoError, Salt};
use padlink_core::domain::gesture::scale_absolute;
use padlink_core::protocol::{
    decode_body, encode_body, open_packet, packet_iv, seal_packet, Framing, PacketFormat,
    ScreenSize,
};
use padlink_core::{Body, Command, ControlMessage, GestureRecognizer, MoveMessage, ProtocolError, SessionKey};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::command_queue::{CommandQueue, QueueMode};
use super::session::Session;

/// Consecutive bad packets after which a session is evicted.
pub const MAX_DROPS: u32 = 3;

/// Errors produced by the session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Key material could not be created (no secure randomness for the salt).
    #[error("key derivation failed: {0}")]
    KeyDerivation(#[from] CryptoError),

    /// An outbound packet could not be built.
    #[error("failed to encode packet: {0}")]
    Encode(#[from] ProtocolError),
}

/// Which secure wire generation the server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolGeneration {
    /// 48-byte packets, keys salted per session.
    Canonical,
    /// Deprecated: 32-byte packets, unsalted keys.
    Legacy,
}

impl ProtocolGeneration {
    /// Maps a configured packet size onto a generation.
    pub fn from_packet_bytes(packet_bytes: usize) -> Option<Self> {
        match packet_bytes {
            48 => Some(Self::Canonical),
            32 => Some(Self::Legacy),
            _ => None,
        }
    }

    pub fn format(self) -> PacketFormat {
        match self {
            Self::Canonical => PacketFormat::CANONICAL,
            Self::Legacy => PacketFormat::LEGACY,
        }
    }

    pub fn salted(self) -> bool {
        self == Self::Canonical
    }
}

/// Protocol parameters fixed for the lifetime of a server run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Empty means unsecured.
    pub password: String,
    pub generation: ProtocolGeneration,
}

impl SessionConfig {
    pub fn is_secure(&self) -> bool {
        !self.password.is_empty()
    }

    pub fn framing(&self) -> Framing {
        if self.is_secure() {
            Framing::Secure
        } else {
            Framing::Plain
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            generation: ProtocolGeneration::Canonical,
        }
    }
}

/// What a single update may contain (the pull transport's legacy routes
/// split movement from clicks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFilter {
    Any,
    MovementOnly,
    CommandsOnly,
}

/// Outcome of one inbound packet, for the transport to act on.
#[derive(Debug)]
pub enum InboundAction {
    /// A session was created.  Send `reply` and start a send loop.
    /// `replaced` (already stopped) is the peer's previous session.
    Opened {
        session: Arc<Session>,
        replaced: Option<Arc<Session>>,
        reply: Option<Vec<u8>>,
    },
    /// Send this acknowledgement back to the peer.
    Reply(Vec<u8>),
    /// The session was closed by its peer and is already stopped.
    Closed(Arc<Session>),
    /// The session hit [`MAX_DROPS`] and is already stopped.
    Evicted(Arc<Session>),
    /// A bad packet was counted against a session.
    Dropped { peer: SocketAddr, drops: u32 },
    /// Nothing to do.
    Ignored,
}

/// The session registry and protocol state machine.
pub struct SessionManager {
    config: SessionConfig,
    sessions: Mutex<HashMap<SocketAddr, Arc<Session>>>,
    /// The one session every pull requester shares.
    pull: Mutex<Option<Arc<Session>>>,
    global_queue: CommandQueue,
    recognizer: Arc<GestureRecognizer>,
    server_salt: Salt,
    server_key: Option<SessionKey>,
}

impl SessionManager {
    /// Creates the manager and, when secured, the server-wide salt and key
    /// used by the pull transport.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::KeyDerivation`] if no salt can be drawn.  This
    /// is fatal: no transport may start without key material.
    pub fn new(config: SessionConfig, recognizer: Arc<GestureRecognizer>) -> Result<Self, SessionError> {
        let (server_salt, server_key) = if config.is_secure() {
            let salt = generate_salt()?;
            let key = SessionKey::derive(
                &config.password,
                config.generation.salted().then_some(&salt),
            );
            (salt, Some(key))
        } else {
            ([0u8; 16], None)
        };

        Ok(Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            pull: Mutex::new(None),
            global_queue: CommandQueue::new(),
            recognizer,
            server_salt,
            server_key,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn recognizer(&self) -> &Arc<GestureRecognizer> {
        &self.recognizer
    }

    pub fn queue_mode(&self) -> QueueMode {
        if self.config.is_secure() {
            QueueMode::PerSession
        } else {
            QueueMode::Global
        }
    }

    /// The cleartext salt answered on the pull transport's salt route.
    pub fn salt(&self) -> Salt {
        self.server_salt
    }

    pub fn session(&self, peer: SocketAddr) -> Option<Arc<Session>> {
        self.sessions.lock().get(&peer).cloned()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Runs one inbound datagram through the state machine.
    pub fn handle_datagram(&self, peer: SocketAddr, data: &[u8]) -> InboundAction {
        if self.config.is_secure() {
            self.handle_secure(peer, data)
        } else {
            self.handle_plain(peer, data)
        }
    }

    fn handle_secure(&self, peer: SocketAddr, data: &[u8]) -> InboundAction {
        let known = self.session(peer);

        if let Some(key) = known.as_ref().and_then(|s| s.key()) {
            match open_packet(data, key, self.config.generation.format())
                .and_then(|(seq, body)| Ok((seq, decode_body(&body, Framing::Secure)?)))
            {
                Ok((seq, Body::Control(msg))) => {
                    if let Some(session) = &known {
                        return self.handle_control(session, seq, msg);
                    }
                }
                Ok((_, other)) => {
                    debug!("ignoring non-control body from {peer}: {other:?}");
                    return InboundAction::Ignored;
                }
                Err(e) => debug!("packet from {peer} did not open with its session key: {e}"),
            }
        }

        if let Some((key, screen)) = self.try_fresh_open(data) {
            return self.open_session(peer, Some(key), screen);
        }

        match known {
            Some(session) => self.record_drop(&session),
            None => {
                debug!("discarding undecryptable packet from unknown peer {peer}");
                InboundAction::Ignored
            }
        }
    }

    /// Tries `data` as an OPEN with sequence 0 under a freshly derived key.
    fn try_fresh_open(&self, data: &[u8]) -> Option<(SessionKey, Option<ScreenSize>)> {
        let key = if self.config.generation.salted() {
            let salt = packet_iv(data)?;
            SessionKey::derive(&self.config.password, Some(&salt))
        } else {
            SessionKey::derive(&self.config.password, None)
        };
        let (seq, body) = open_packet(data, &key, self.config.generation.format()).ok()?;
        match decode_body(&body, Framing::Secure).ok()? {
            Body::Control(ControlMessage::Open { screen }) if seq == 0 => Some((key, screen)),
            _ => None,
        }
    }

    fn handle_control(&self, session: &Arc<Session>, seq: u32, msg: ControlMessage) -> InboundAction {
        let peer = session.peer();
        match msg {
            ControlMessage::Open { screen } if seq == 0 => {
                self.open_session(peer, session.key().cloned(), screen)
            }
            ControlMessage::Heartbeat => {
                if !session.inbound.accept(seq) {
                    debug!(
                        "rejected heartbeat from {peer}: seq {seq} <= {}",
                        session.inbound.current()
                    );
                    return InboundAction::Ignored;
                }
                self.reply(session, ControlMessage::HeartbeatAck)
            }
            ControlMessage::Close => {
                if !session.inbound.accept(seq) {
                    debug!(
                        "rejected close from {peer}: seq {seq} <= {}",
                        session.inbound.current()
                    );
                    return InboundAction::Ignored;
                }
                self.close_session(session)
            }
            other => {
                debug!("ignoring control {other:?} (seq {seq}) from {peer}");
                InboundAction::Ignored
            }
        }
    }

    fn handle_plain(&self, peer: SocketAddr, data: &[u8]) -> InboundAction {
        let known = self.session(peer);
        match (decode_body(data, Framing::Plain), known) {
            (Ok(Body::Control(ControlMessage::Open { screen })), _) => {
                self.open_session(peer, None, screen)
            }
            (Ok(Body::Control(ControlMessage::Heartbeat)), Some(session)) => {
                self.reply(&session, ControlMessage::HeartbeatAck)
            }
            (Ok(Body::Control(ControlMessage::Close)), Some(session)) => self.close_session(&session),
            (Ok(body), _) => {
                debug!("ignoring {body:?} from {peer}");
                InboundAction::Ignored
            }
            (Err(e), Some(session)) => {
                debug!("malformed line from {peer}: {e}");
                self.record_drop(&session)
            }
            (Err(e), None) => {
                debug!("discarding malformed line from unknown peer {peer}: {e}");
                InboundAction::Ignored
            }
        }
    }

    fn open_session(
        &self,
        peer: SocketAddr,
        key: Option<SessionKey>,
        screen: Option<ScreenSize>,
    ) -> InboundAction {
        let session = Arc::new(Session::new(peer, key, screen));
        let replaced = self.sessions.lock().insert(peer, Arc::clone(&session));
        if let Some(old) = &replaced {
            old.stop();
            info!("listener {peer} reopened; session {} replaced", old.id());
        }
        info!("session {} opened for {peer}", session.id());

        let reply = match self.encode_for(&session, &Body::Control(ControlMessage::OpenAck)) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("failed to build OPEN-ACK for {peer}: {e}");
                None
            }
        };
        InboundAction::Opened {
            session,
            replaced,
            reply,
        }
    }

    fn close_session(&self, session: &Arc<Session>) -> InboundAction {
        self.remove_if_current(session);
        session.stop();
        info!("session {} closed by {}", session.id(), session.peer());
        InboundAction::Closed(Arc::clone(session))
    }

    fn record_drop(&self, session: &Arc<Session>) -> InboundAction {
        let drops = session.record_drop();
        if drops >= MAX_DROPS {
            self.remove_if_current(session);
            session.stop();
            warn!(
                "evicting session {} for {} after {drops} bad packets",
                session.id(),
                session.peer()
            );
            return InboundAction::Evicted(Arc::clone(session));
        }
        debug!("bad packet {drops}/{MAX_DROPS} from {}", session.peer());
        InboundAction::Dropped {
            peer: session.peer(),
            drops,
        }
    }

    fn remove_if_current(&self, session: &Arc<Session>) {
        let mut sessions = self.sessions.lock();
        if sessions
            .get(&session.peer())
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            sessions.remove(&session.peer());
        }
    }

    fn reply(&self, session: &Session, msg: ControlMessage) -> InboundAction {
        match self.encode_for(session, &Body::Control(msg)) {
            Ok(bytes) => InboundAction::Reply(bytes),
            Err(e) => {
                warn!("failed to build {} for {}: {e}", msg.to_token(), session.peer());
                InboundAction::Ignored
            }
        }
    }

    // ── Pull transport support ────────────────────────────────────────────────

    /// Returns the server-wide pull session, creating an active one on the
    /// first query (or the first after it was evicted).  The flag is `true`
    /// when the session is new.
    ///
    /// Every requester shares this session: one key, one sequence counter and
    /// one command queue, whatever address the query came from.  It is
    /// registered under the address of the requester that created it.
    pub fn pull_session(&self, peer: SocketAddr) -> (Arc<Session>, bool) {
        let mut pull = self.pull.lock();
        if let Some(existing) = pull.as_ref().filter(|s| !s.is_stopped()) {
            return (Arc::clone(existing), false);
        }
        let session = Arc::new(Session::new(peer, self.server_key.clone(), None));
        session.activate();
        self.sessions.lock().insert(peer, Arc::clone(&session));
        *pull = Some(Arc::clone(&session));
        info!("pull session {} opened by requester {peer}", session.id());
        (session, true)
    }

    /// Handles a sequence resynchronisation request.
    ///
    /// The outbound counter is raised to `max(requested, current)` and the
    /// SEQ-ACK reply carries the next number after that.
    pub fn handle_seq_sync(&self, session: &Arc<Session>, packet: &[u8]) -> InboundAction {
        let Some(key) = session.key() else {
            return InboundAction::Ignored;
        };
        match open_packet(packet, key, self.config.generation.format())
            .and_then(|(seq, body)| Ok((seq, decode_body(&body, Framing::Secure)?)))
        {
            Ok((requested, Body::Control(ControlMessage::SeqSync))) => {
                let now = session.outbound.advance_to(requested);
                info!("resynchronised {} to sequence {now}", session.peer());
                self.reply(session, ControlMessage::SeqAck)
            }
            Ok((_, other)) => {
                debug!("ignoring {other:?} on sequence route from {}", session.peer());
                InboundAction::Ignored
            }
            Err(e) => {
                debug!("bad sequence request from {}: {e}", session.peer());
                self.record_drop(session)
            }
        }
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Builds the next update for `session`, if there is one.
    ///
    /// A queued command always wins over movement; otherwise the recognizer
    /// is asked for a delta.  `Ok(None)` means skip this tick.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Encode`] if the packet cannot be sealed.
    pub fn next_update(
        &self,
        session: &Session,
        filter: UpdateFilter,
    ) -> Result<Option<Vec<u8>>, SessionError> {
        let command = match filter {
            UpdateFilter::MovementOnly => None,
            _ => self.next_command(session),
        };
        let body = match (command, filter) {
            (Some(cmd), _) => Body::Command(cmd),
            (None, UpdateFilter::CommandsOnly) => return Ok(None),
            (None, _) => match self.next_movement(session) {
                Some(msg) => Body::Move(msg),
                None => return Ok(None),
            },
        };
        self.encode_for(session, &body).map(Some)
    }

    fn next_command(&self, session: &Session) -> Option<Command> {
        match self.queue_mode() {
            QueueMode::PerSession => session.commands.pop(),
            QueueMode::Global => self.global_queue.pop(),
        }
    }

    fn next_movement(&self, session: &Session) -> Option<MoveMessage> {
        let settings = self.recognizer.settings().snapshot();
        if settings.absolute_movement {
            let screen = session.screen().unwrap_or(ScreenSize {
                width: settings.surface_width,
                height: settings.surface_height,
            });
            return self
                .recognizer
                .read_absolute_change()
                .map(|pos| scale_absolute(pos, &settings, screen));
        }
        self.recognizer.read_relative_delta().to_move_message(&settings)
    }

    /// Frames `body` for `session`, minting the next outbound sequence
    /// number when secured.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Encode`] if sealing fails.
    pub fn encode_for(&self, session: &Session, body: &Body) -> Result<Vec<u8>, SessionError> {
        match session.key() {
            Some(key) => Ok(seal_packet(
                &encode_body(body, Framing::Secure),
                session.outbound.next(),
                key,
                self.config.generation.format(),
            )?),
            None => Ok(encode_body(body, Framing::Plain)),
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Queues a command for delivery.
    ///
    /// Typed text is split into chunks that fit one packet.  In secured mode
    /// every session gets its own copy; with no sessions the command is
    /// discarded.
    pub fn enqueue_command(&self, cmd: Command) {
        let cmds = match cmd {
            Command::Type(text) => Command::typed(&text),
            other => vec![other],
        };
        match self.queue_mode() {
            QueueMode::Global => self.global_queue.push_all(cmds),
            QueueMode::PerSession => {
                let sessions = self.sessions();
                if sessions.is_empty() {
                    debug!("no listeners; discarding {} command(s)", cmds.len());
                }
                for session in sessions {
                    session.commands.push_all(cmds.iter().cloned());
                }
            }
        }
    }

    /// Stops and forgets every session.
    pub fn shutdown(&self) -> Vec<Arc<Session>> {
        self.pull.lock().take();
        let drained: Vec<_> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.stop();
        }
        self.global_queue.clear();
        drained
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::SessionState;
    use padlink_core::crypto::new_iv;
    use padlink_core::protocol::{seal_packet_with_iv, Key, PressAction};
    use padlink_core::{InputSettings, SharedSettings, TouchEvent, TouchPosition};

    const PASSWORD: &str = "hunter2";

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 2], port))
    }

    fn manager(password: &str) -> SessionManager {
        let settings = SharedSettings::new(InputSettings {
            precision_px: 1,
            ..InputSettings::default()
        });
        SessionManager::new(
            SessionConfig {
                password: password.to_string(),
                generation: ProtocolGeneration::Canonical,
            },
            Arc::new(GestureRecognizer::new(settings)),
        )
        .unwrap()
    }

    /// Builds a salted OPEN the way a listener does, returning the key too.
    fn client_open() -> (Vec<u8>, SessionKey) {
        let iv = new_iv().unwrap();
        let key = SessionKey::derive(PASSWORD, Some(&iv));
        let body = encode_body(&Body::Control(ControlMessage::Open { screen: None }), Framing::Secure);
        let packet = seal_packet_with_iv(&body, 0, &key, &iv, PacketFormat::CANONICAL).unwrap();
        (packet, key)
    }

    fn client_control(msg: ControlMessage, seq: u32, key: &SessionKey) -> Vec<u8> {
        let body = encode_body(&Body::Control(msg), Framing::Secure);
        seal_packet(&body, seq, key, PacketFormat::CANONICAL).unwrap()
    }

    fn open_reply_body(reply: &[u8], key: &SessionKey) -> (u32, Body) {
        let (seq, body) = open_packet(reply, key, PacketFormat::CANONICAL).unwrap();
        (seq, decode_body(&body, Framing::Secure).unwrap())
    }

    #[test]
    fn test_secure_open_creates_session_and_acknowledges() {
        // Arrange
        let mgr = manager(PASSWORD);
        let (open, key) = client_open();

        // Act
        let action = mgr.handle_datagram(peer(1), &open);

        // Assert
        let InboundAction::Opened { session, replaced, reply } = action else {
            panic!("expected Opened");
        };
        assert!(replaced.is_none());
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(
            open_reply_body(&reply.unwrap(), &key),
            (1, Body::Control(ControlMessage::OpenAck))
        );
        assert_eq!(mgr.session_count(), 1);
    }

    #[test]
    fn test_secure_open_with_nonzero_sequence_is_rejected() {
        let mgr = manager(PASSWORD);
        let iv = new_iv().unwrap();
        let key = SessionKey::derive(PASSWORD, Some(&iv));
        let body = encode_body(&Body::Control(ControlMessage::Open { screen: None }), Framing::Secure);
        let packet = seal_packet_with_iv(&body, 5, &key, &iv, PacketFormat::CANONICAL).unwrap();

        assert!(matches!(mgr.handle_datagram(peer(1), &packet), InboundAction::Ignored));
        assert_eq!(mgr.session_count(), 0);
    }

    #[test]
    fn test_wrong_password_open_is_ignored_for_unknown_peer() {
        let mgr = manager("other password");
        let (open, _) = client_open();
        assert!(matches!(mgr.handle_datagram(peer(1), &open), InboundAction::Ignored));
    }

    #[test]
    fn test_second_open_restarts_session() {
        // Arrange
        let mgr = manager(PASSWORD);
        let (first, _) = client_open();
        let InboundAction::Opened { session: old, .. } = mgr.handle_datagram(peer(1), &first) else {
            panic!("first open must succeed");
        };

        // Act
        let (second, _) = client_open();
        let action = mgr.handle_datagram(peer(1), &second);

        // Assert
        let InboundAction::Opened { session, replaced, .. } = action else {
            panic!("expected Opened");
        };
        assert!(old.is_stopped());
        assert!(Arc::ptr_eq(&replaced.unwrap(), &old));
        assert_ne!(session.id(), old.id());
        assert_eq!(mgr.session_count(), 1);
    }

    #[test]
    fn test_heartbeat_replay_is_ignored_without_counting_a_drop() {
        let mgr = manager(PASSWORD);
        let (open, key) = client_open();
        mgr.handle_datagram(peer(1), &open);
        let beat = client_control(ControlMessage::Heartbeat, 1, &key);

        assert!(matches!(mgr.handle_datagram(peer(1), &beat), InboundAction::Reply(_)));
        assert!(matches!(mgr.handle_datagram(peer(1), &beat), InboundAction::Ignored));
        assert_eq!(mgr.session(peer(1)).unwrap().drops(), 0);
    }

    #[test]
    fn test_heartbeat_of_another_generation_counts_as_drop() {
        // Arrange
        let mgr = manager(PASSWORD);
        let (open, key) = client_open();
        mgr.handle_datagram(peer(1), &open);
        let body = encode_body(&Body::Control(ControlMessage::Heartbeat), Framing::Secure);
        let legacy_beat = seal_packet(&body, 1, &key, PacketFormat::LEGACY).unwrap();

        // Act
        let action = mgr.handle_datagram(peer(1), &legacy_beat);

        // Assert
        assert!(matches!(action, InboundAction::Dropped { drops: 1, .. }));
        assert_eq!(mgr.session(peer(1)).unwrap().inbound.current(), 0);
    }

    #[test]
    fn test_plain_mode_open_heartbeat_close() {
        // Arrange
        let mgr = manager("");

        // Act
        let opened = mgr.handle_datagram(peer(2), b"OPEN 1920x1080\n");
        let beat = mgr.handle_datagram(peer(2), b"HEARTBEAT");
        let closed = mgr.handle_datagram(peer(2), b"CLOSE");

        // Assert
        let InboundAction::Opened { session, reply, .. } = opened else {
            panic!("expected Opened");
        };
        assert_eq!(reply.as_deref(), Some(&b"OPEN-ACK"[..]));
        assert_eq!(session.screen(), Some(ScreenSize { width: 1920, height: 1080 }));
        assert!(matches!(beat, InboundAction::Reply(ref b) if b == b"BEAT"));
        assert!(matches!(closed, InboundAction::Closed(_)));
        assert_eq!(mgr.session_count(), 0);
    }

    #[test]
    fn test_plain_heartbeat_from_unknown_peer_is_ignored() {
        let mgr = manager("");
        assert!(matches!(mgr.handle_datagram(peer(3), b"HEARTBEAT"), InboundAction::Ignored));
    }

    #[test]
    fn test_plain_garbage_counts_toward_eviction() {
        let mgr = manager("");
        mgr.handle_datagram(peer(4), b"OPEN");

        assert!(matches!(
            mgr.handle_datagram(peer(4), b"\xFF\xFE"),
            InboundAction::Dropped { drops: 1, .. }
        ));
        mgr.handle_datagram(peer(4), b"junk");
        assert!(matches!(mgr.handle_datagram(peer(4), b"junk"), InboundAction::Evicted(_)));
        assert!(mgr.session(peer(4)).is_none());
    }

    #[test]
    fn test_global_queue_is_drained_once_across_sessions() {
        // Arrange
        let mgr = manager("");
        mgr.handle_datagram(peer(5), b"OPEN");
        mgr.handle_datagram(peer(6), b"OPEN");
        mgr.enqueue_command(Command::key(Key::Enter, PressAction::Full));
        let a = mgr.session(peer(5)).unwrap();
        let b = mgr.session(peer(6)).unwrap();

        // Act
        let first = mgr.next_update(&a, UpdateFilter::Any).unwrap();
        let second = mgr.next_update(&b, UpdateFilter::Any).unwrap();

        // Assert
        assert_eq!(first.as_deref(), Some(&b"K_enter_F"[..]));
        assert_eq!(second, None);
    }

    #[test]
    fn test_per_session_queue_fans_out() {
        let mgr = manager(PASSWORD);
        let (open_a, key_a) = client_open();
        let (open_b, key_b) = client_open();
        mgr.handle_datagram(peer(7), &open_a);
        mgr.handle_datagram(peer(8), &open_b);

        mgr.enqueue_command(Command::key(Key::Tab, PressAction::Full));

        for (port, key) in [(7, key_a), (8, key_b)] {
            let session = mgr.session(peer(port)).unwrap();
            let packet = mgr.next_update(&session, UpdateFilter::Any).unwrap().unwrap();
            let (_, body) = open_reply_body(&packet, &key);
            assert_eq!(body, Body::Command(Command::key(Key::Tab, PressAction::Full)));
        }
    }

    #[test]
    fn test_long_text_is_fragmented_in_order() {
        let mgr = manager("");
        mgr.handle_datagram(peer(9), b"OPEN");
        let session = mgr.session(peer(9)).unwrap();

        mgr.enqueue_command(Command::Type("hello world!".into()));

        assert_eq!(
            mgr.next_update(&session, UpdateFilter::Any).unwrap().as_deref(),
            Some(&b"TYPEhello worl"[..])
        );
        assert_eq!(
            mgr.next_update(&session, UpdateFilter::Any).unwrap().as_deref(),
            Some(&b"TYPEd!"[..])
        );
    }

    #[test]
    fn test_command_takes_priority_over_movement() {
        // Arrange
        let mgr = manager("");
        mgr.handle_datagram(peer(10), b"OPEN");
        let session = mgr.session(peer(10)).unwrap();
        let r = mgr.recognizer();
        r.handle(TouchEvent::Down { pos: TouchPosition::new(10, 10), at_ms: 0 });
        r.read_relative_delta();
        r.handle(TouchEvent::Move { pos: TouchPosition::new(20, 10), secondary: None, at_ms: 600 });
        mgr.enqueue_command(Command::key(Key::Escape, PressAction::Full));

        // Act
        let first = mgr.next_update(&session, UpdateFilter::Any).unwrap();
        let second = mgr.next_update(&session, UpdateFilter::Any).unwrap();
        let third = mgr.next_update(&session, UpdateFilter::Any).unwrap();

        // Assert
        assert_eq!(first.as_deref(), Some(&b"K_esc_F"[..]));
        assert_eq!(second.as_deref(), Some(&b"REL 10,0"[..]));
        assert_eq!(third, None, "nothing left to send");
    }

    #[test]
    fn test_filters_split_movement_and_commands() {
        let mgr = manager("");
        let (session, created) = mgr.pull_session(peer(11));
        assert!(created);
        mgr.enqueue_command(Command::key(Key::Up, PressAction::Down));

        assert_eq!(mgr.next_update(&session, UpdateFilter::MovementOnly).unwrap(), None);
        assert_eq!(
            mgr.next_update(&session, UpdateFilter::CommandsOnly).unwrap().as_deref(),
            Some(&b"K_up_D"[..])
        );
    }

    #[test]
    fn test_pull_session_reuses_existing_entry() {
        let mgr = manager(PASSWORD);
        let (first, created_first) = mgr.pull_session(peer(12));
        let (second, created_second) = mgr.pull_session(peer(12));
        assert!(created_first);
        assert!(!created_second);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.state(), SessionState::Active);
    }

    #[test]
    fn test_pull_requesters_share_one_session() {
        // Arrange
        let mgr = manager(PASSWORD);
        let (first, _) = mgr.pull_session(peer(20));

        // Act
        let created: Vec<_> = (21..200).map(|i| mgr.pull_session(peer(i))).collect();

        // Assert
        assert!(created.iter().all(|(s, new)| !new && Arc::ptr_eq(s, &first)));
        assert_eq!(mgr.session_count(), 1);
    }

    #[test]
    fn test_evicted_pull_session_is_replaced_on_next_query() {
        // Arrange
        let mgr = manager(PASSWORD);
        let (first, _) = mgr.pull_session(peer(30));
        for _ in 0..MAX_DROPS {
            mgr.handle_seq_sync(&first, b"garbage");
        }

        // Act
        let (second, created) = mgr.pull_session(peer(31));

        // Assert
        assert!(first.is_stopped());
        assert!(created);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(mgr.session_count(), 1);
    }

    #[test]
    fn test_seq_sync_raises_outbound_counter() {
        // Arrange
        let mgr = manager(PASSWORD);
        let key = SessionKey::derive(PASSWORD, Some(&mgr.salt()));
        let (session, _) = mgr.pull_session(peer(13));
        let request = client_control(ControlMessage::SeqSync, 500, &key);

        // Act
        let action = mgr.handle_seq_sync(&session, &request);

        // Assert
        let InboundAction::Reply(reply) = action else {
            panic!("expected Reply");
        };
        assert_eq!(open_reply_body(&reply, &key), (501, Body::Control(ControlMessage::SeqAck)));
    }

    #[test]
    fn test_seq_sync_never_lowers_counter() {
        let mgr = manager(PASSWORD);
        let key = SessionKey::derive(PASSWORD, Some(&mgr.salt()));
        let (session, _) = mgr.pull_session(peer(14));
        session.outbound.advance_to(900);

        let action = mgr.handle_seq_sync(&session, &client_control(ControlMessage::SeqSync, 10, &key));

        let InboundAction::Reply(reply) = action else {
            panic!("expected Reply");
        };
        assert_eq!(open_reply_body(&reply, &key).0, 901);
    }

    #[test]
    fn test_shutdown_stops_every_session() {
        let mgr = manager("");
        mgr.handle_datagram(peer(15), b"OPEN");
        mgr.handle_datagram(peer(16), b"OPEN");

        let stopped = mgr.shutdown();

        assert_eq!(stopped.len(), 2);
        assert!(stopped.iter().all(|s| s.is_stopped()));
        assert_eq!(mgr.session_count(), 0);
    }

    #[test]
    fn test_protocol_generation_from_packet_bytes() {
        assert_eq!(ProtocolGeneration::from_packet_bytes(48), Some(ProtocolGeneration::Canonical));
        assert_eq!(ProtocolGeneration::from_packet_bytes(32), Some(ProtocolGeneration::Legacy));
        assert_eq!(ProtocolGeneration::from_packet_bytes(64), None);
    }
}
