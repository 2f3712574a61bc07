//! All padlink protocol message types.
//!
//! A message *body* is one of three things:
//!
//! - a control marker (`OPEN`, `HEARTBEAT`, `CLOSE` and their replies),
//! - a movement report ([`MoveMessage`]),
//! - a discrete command ([`Command`]): a click, a key press or a short run
//!   of typed text.
//!
//! How a body turns into bytes depends on whether the session is secured; see
//! [`crate::protocol::codec`].

use serde::{Deserialize, Serialize};

use crate::protocol::codec::{Framing, ProtocolError};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Size of a binary movement body: tag (1) + dx (4) + dy (4).
pub const MOVE_MESSAGE_BYTES: usize = 9;

/// Maximum number of UTF-8 bytes carried by one typed-text command.
pub const MAX_TYPED_BYTES: usize = 10;

// ── Movement ──────────────────────────────────────────────────────────────────

/// What a [`MoveMessage`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoveKind {
    /// Pointer displacement since the previous report.
    Relative,
    /// Two-finger scroll displacement.
    Scroll,
    /// Absolute pointer position (deprecated legacy mode).
    Absolute,
}

impl MoveKind {
    /// The tag byte written at offset 0 of a binary movement body.
    pub fn tag(self) -> u8 {
        match self {
            MoveKind::Relative => b'M',
            MoveKind::Scroll => b'S',
            MoveKind::Absolute => b'A',
        }
    }

    /// Maps a tag byte back to its kind.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'M' => Some(MoveKind::Relative),
            b'S' => Some(MoveKind::Scroll),
            b'A' => Some(MoveKind::Absolute),
            _ => None,
        }
    }

    /// Keyword used by the plaintext framing (`REL 3,-4`).
    pub fn keyword(self) -> &'static str {
        match self {
            MoveKind::Relative => "REL",
            MoveKind::Scroll => "SCROLL",
            MoveKind::Absolute => "ABS",
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        [MoveKind::Relative, MoveKind::Scroll, MoveKind::Absolute]
            .into_iter()
            .find(|k| k.keyword() == word)
    }
}

/// A movement report: a displacement (relative, scroll) or a position (absolute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveMessage {
    pub kind: MoveKind,
    pub dx: i32,
    pub dy: i32,
}

impl MoveMessage {
    pub fn new(kind: MoveKind, dx: i32, dy: i32) -> Self {
        Self { kind, dx, dy }
    }

    /// Encodes as `tag ‖ dx (BE i32) ‖ dy (BE i32)`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use padlink_core::protocol::{MoveKind, MoveMessage};
    ///
    /// let bytes = MoveMessage::new(MoveKind::Relative, 6, -8).to_bytes();
    /// assert_eq!(bytes[0], b'M');
    /// assert_eq!(&bytes[5..9], &(-8i32).to_be_bytes());
    /// ```
    pub fn to_bytes(&self) -> [u8; MOVE_MESSAGE_BYTES] {
        let mut out = [0u8; MOVE_MESSAGE_BYTES];
        out[0] = self.kind.tag();
        out[1..5].copy_from_slice(&self.dx.to_be_bytes());
        out[5..9].copy_from_slice(&self.dy.to_be_bytes());
        out
    }

    /// Decodes a binary movement body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InsufficientData`] for a short body and
    /// [`ProtocolError::UnknownMoveTag`] for an unrecognised tag byte.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < MOVE_MESSAGE_BYTES {
            return Err(ProtocolError::InsufficientData {
                needed: MOVE_MESSAGE_BYTES,
                available: bytes.len(),
            });
        }
        let kind = MoveKind::from_tag(bytes[0]).ok_or(ProtocolError::UnknownMoveTag(bytes[0]))?;
        let dx = i32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let dy = i32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        Ok(Self { kind, dx, dy })
    }

    /// Renders the plaintext form, e.g. `SCROLL 0,-12`.
    pub fn to_text(&self) -> String {
        format!("{} {},{}", self.kind.keyword(), self.dx, self.dy)
    }

    /// Parses the plaintext form.  Returns `None` if `text` is not a movement line.
    pub fn from_text(text: &str) -> Option<Self> {
        let (word, rest) = text.split_once(' ')?;
        let kind = MoveKind::from_keyword(word)?;
        let (dx, dy) = rest.split_once(',')?;
        Some(Self {
            kind,
            dx: dx.trim().parse().ok()?,
            dy: dy.trim().parse().ok()?,
        })
    }
}

// ── Discrete commands ─────────────────────────────────────────────────────────

/// Press phase of a click or key command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PressAction {
    /// Press and hold.
    Down,
    /// Release.
    Up,
    /// Press immediately followed by release.
    Full,
}

impl PressAction {
    pub fn code(self) -> &'static str {
        match self {
            PressAction::Down => "D",
            PressAction::Up => "U",
            PressAction::Full => "F",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "D" => Some(PressAction::Down),
            "U" => Some(PressAction::Up),
            "F" => Some(PressAction::Full),
            _ => None,
        }
    }
}

/// Mouse buttons that can be clicked remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn name(self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "left" => Some(MouseButton::Left),
            "right" => Some(MouseButton::Right),
            "middle" => Some(MouseButton::Middle),
            _ => None,
        }
    }
}

/// Keys that can be pressed remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    Backspace,
    Enter,
    Space,
    Tab,
    Escape,
}

impl Key {
    const ALL: [Key; 9] = [
        Key::Up,
        Key::Down,
        Key::Left,
        Key::Right,
        Key::Backspace,
        Key::Enter,
        Key::Space,
        Key::Tab,
        Key::Escape,
    ];

    /// Wire name of the key, e.g. `bspace`.
    pub fn name(self) -> &'static str {
        match self {
            Key::Up => "up",
            Key::Down => "down",
            Key::Left => "left",
            Key::Right => "right",
            Key::Backspace => "bspace",
            Key::Enter => "enter",
            Key::Space => "space",
            Key::Tab => "tab",
            Key::Escape => "esc",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

/// A discrete input command queued for delivery to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Click { button: MouseButton, action: PressAction },
    Key { key: Key, action: PressAction },
    /// At most [`MAX_TYPED_BYTES`] bytes of UTF-8 text.
    Type(String),
}

impl Command {
    pub fn click(button: MouseButton, action: PressAction) -> Self {
        Command::Click { button, action }
    }

    pub fn key(key: Key, action: PressAction) -> Self {
        Command::Key { key, action }
    }

    /// Splits `text` into typed-text commands of at most [`MAX_TYPED_BYTES`]
    /// bytes each, never cutting a UTF-8 character in half.
    ///
    /// Empty text yields no commands.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use padlink_core::protocol::Command;
    ///
    /// let parts = Command::typed("hello, world!");
    /// assert_eq!(parts, vec![Command::Type("hello, wor".into()), Command::Type("ld!".into())]);
    /// ```
    pub fn typed(text: &str) -> Vec<Command> {
        let mut out = Vec::new();
        let mut chunk = String::new();
        for ch in text.chars() {
            if chunk.len() + ch.len_utf8() > MAX_TYPED_BYTES {
                out.push(Command::Type(std::mem::take(&mut chunk)));
            }
            chunk.push(ch);
        }
        if !chunk.is_empty() {
            out.push(Command::Type(chunk));
        }
        out
    }

    /// Renders the command token, e.g. `C_left_F`, `K_bspace_D`.
    ///
    /// Typed text is prefixed `T` inside secure packets and `TYPE` in the
    /// plaintext framing.
    pub fn to_token(&self, framing: Framing) -> String {
        match self {
            Command::Click { button, action } => format!("C_{}_{}", button.name(), action.code()),
            Command::Key { key, action } => format!("K_{}_{}", key.name(), action.code()),
            Command::Type(text) => match framing {
                Framing::Secure => format!("T{text}"),
                Framing::Plain => format!("TYPE{text}"),
            },
        }
    }

    /// Parses a command token.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] for anything outside the
    /// command vocabulary, including typed text longer than
    /// [`MAX_TYPED_BYTES`].
    pub fn parse(token: &str, framing: Framing) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedPayload(format!("unknown command token {token:?}"));

        let type_prefix = match framing {
            Framing::Secure => "T",
            Framing::Plain => "TYPE",
        };
        if let Some(text) = token.strip_prefix(type_prefix) {
            if text.is_empty() || text.len() > MAX_TYPED_BYTES {
                return Err(malformed());
            }
            return Ok(Command::Type(text.to_string()));
        }

        let mut parts = token.splitn(3, '_');
        let (Some(kind), Some(name), Some(code)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed());
        };
        let action = PressAction::from_code(code).ok_or_else(malformed)?;
        match kind {
            "C" => MouseButton::from_name(name)
                .map(|button| Command::Click { button, action })
                .ok_or_else(malformed),
            "K" => Key::from_name(name)
                .map(|key| Command::Key { key, action })
                .ok_or_else(malformed),
            _ => Err(malformed()),
        }
    }
}

// ── Control markers ───────────────────────────────────────────────────────────

/// Screen dimensions announced by a listener in its OPEN request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// Session lifecycle markers and their acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Opens a session, optionally announcing the listener's screen size.
    Open { screen: Option<ScreenSize> },
    OpenAck,
    Heartbeat,
    /// Reply to a heartbeat (`BEAT` on the wire).
    HeartbeatAck,
    Close,
    /// Sequence resynchronisation request.
    SeqSync,
    SeqAck,
}

impl ControlMessage {
    /// Wire token, e.g. `OPEN 1920x1080` or `BEAT`.
    pub fn to_token(&self) -> String {
        match self {
            ControlMessage::Open { screen: Some(s) } => format!("OPEN {}x{}", s.width, s.height),
            ControlMessage::Open { screen: None } => "OPEN".to_string(),
            ControlMessage::OpenAck => "OPEN-ACK".to_string(),
            ControlMessage::Heartbeat => "HEARTBEAT".to_string(),
            ControlMessage::HeartbeatAck => "BEAT".to_string(),
            ControlMessage::Close => "CLOSE".to_string(),
            ControlMessage::SeqSync => "SEQ".to_string(),
            ControlMessage::SeqAck => "SEQ-ACK".to_string(),
        }
    }

    /// Parses a control token.  Returns `None` if `token` is not one.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "OPEN" => return Some(ControlMessage::Open { screen: None }),
            "OPEN-ACK" => return Some(ControlMessage::OpenAck),
            "HEARTBEAT" => return Some(ControlMessage::Heartbeat),
            "BEAT" => return Some(ControlMessage::HeartbeatAck),
            "CLOSE" => return Some(ControlMessage::Close),
            "SEQ" => return Some(ControlMessage::SeqSync),
            "SEQ-ACK" => return Some(ControlMessage::SeqAck),
            _ => {}
        }
        let dims = token.strip_prefix("OPEN ")?;
        let (w, h) = dims.trim().split_once('x')?;
        Some(ControlMessage::Open {
            screen: Some(ScreenSize {
                width: w.parse().ok()?,
                height: h.parse().ok()?,
            }),
        })
    }
}

// ── Body ──────────────────────────────────────────────────────────────────────

/// Any message body carried by the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    Control(ControlMessage),
    Move(MoveMessage),
    Command(Command),
}

impl From<ControlMessage> for Body {
    fn from(msg: ControlMessage) -> Self {
        Body::Control(msg)
    }
}

impl From<MoveMessage> for Body {
    fn from(msg: MoveMessage) -> Self {
        Body::Move(msg)
    }
}

impl From<Command> for Body {
    fn from(cmd: Command) -> Self {
        Body::Command(cmd)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
