//! Packet codec: body framing and the secure packet envelope.
//!
//! Secure wire format (one datagram or one named-query payload):
//! ```text
//! [iv:16][ciphertext:N]      N = packet_bytes − 16
//! plaintext = [seq:4 BE][body] padded with extended PKCS#5 to exactly N bytes
//! ```
//! The canonical generation uses 48-byte packets with salted keys; 32-byte
//! packets survive only as the deprecated legacy generation.
//!
//! In unsecured mode bodies travel as bare ASCII lines with no IV and no
//! sequence number.

use thiserror::Error;

use crate::crypto::{self, CryptoError, Iv, SessionKey, AES_BLOCK_BYTES, IV_BYTES};
use crate::protocol::messages::{
    Body, Command, ControlMessage, MoveKind, MoveMessage, MOVE_MESSAGE_BYTES,
};
use crate::protocol::sequence::MAX_SEQUENCE;

/// Size of the big-endian sequence number at the start of the plaintext.
pub const SEQUENCE_BYTES: usize = 4;

/// Errors that can occur while encoding or decoding packets and bodies.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// A packet size that no protocol generation uses.
    #[error("unsupported packet size: {0} bytes")]
    InvalidPacketSize(usize),

    /// A secure packet whose length differs from the configured generation.
    #[error("packet is {actual} bytes, expected exactly {expected}")]
    WrongPacketLength { expected: usize, actual: usize },

    /// The body does not fit in one packet.
    #[error("body of {len} bytes exceeds the {max}-byte packet capacity")]
    BodyTooLarge { len: usize, max: usize },

    /// The first byte of a movement body is not a known tag.
    #[error("unknown move tag: 0x{0:02X}")]
    UnknownMoveTag(u8),

    /// The decoded sequence number is negative on the peer's signed wire type.
    #[error("sequence number {0} is out of range")]
    SequenceOutOfRange(u32),

    /// The body could not be parsed (unknown token, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Encryption or decryption failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// How bodies are rendered to bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// ASCII lines, no envelope (empty password).
    Plain,
    /// Compact bodies inside the encrypted envelope.
    Secure,
}

/// Renders a body for the given framing.
///
/// Movement bodies are binary inside secure packets and `REL dx,dy` style
/// text otherwise.  Control and command bodies are their tokens.
pub fn encode_body(body: &Body, framing: Framing) -> Vec<u8> {
    match (body, framing) {
        (Body::Control(msg), _) => msg.to_token().into_bytes(),
        (Body::Command(cmd), _) => cmd.to_token(framing).into_bytes(),
        (Body::Move(msg), Framing::Secure) => msg.to_bytes().to_vec(),
        (Body::Move(msg), Framing::Plain) => msg.to_text().into_bytes(),
    }
}

/// Parses a body produced by [`encode_body`].
///
/// Plaintext bodies may carry trailing NULs or a line terminator; both are
/// ignored.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the bytes are not a valid
/// body for `framing`.
pub fn decode_body(bytes: &[u8], framing: Framing) -> Result<Body, ProtocolError> {
    // Commands start with C, K or T, so a 9-byte body with a move tag is a move.
    if framing == Framing::Secure
        && bytes.len() == MOVE_MESSAGE_BYTES
        && MoveKind::from_tag(bytes[0]).is_some()
    {
        return MoveMessage::from_bytes(bytes).map(Body::Move);
    }

    let text = std::str::from_utf8(bytes)
        .map_err(|e| ProtocolError::MalformedPayload(format!("body is not UTF-8: {e}")))?;
    let text = match framing {
        Framing::Plain => text.trim_end_matches(['\0', '\r', '\n', ' ']),
        Framing::Secure => text,
    };

    if let Some(msg) = ControlMessage::parse(text) {
        return Ok(Body::Control(msg));
    }
    if framing == Framing::Plain {
        if let Some(msg) = MoveMessage::from_text(text) {
            return Ok(Body::Move(msg));
        }
    }
    Command::parse(text, framing).map(Body::Command)
}

// ── Secure envelope ───────────────────────────────────────────────────────────

/// Fixed packet size of one secure protocol generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFormat {
    packet_bytes: usize,
}

impl PacketFormat {
    /// The canonical 48-byte generation.
    pub const CANONICAL: PacketFormat = PacketFormat { packet_bytes: 48 };

    /// The deprecated 32-byte generation.
    pub const LEGACY: PacketFormat = PacketFormat { packet_bytes: 32 };

    /// Builds a format for `packet_bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPacketSize`] unless the ciphertext part
    /// is a whole number of AES blocks that a single pad byte can describe.
    pub fn new(packet_bytes: usize) -> Result<Self, ProtocolError> {
        let window = packet_bytes.checked_sub(IV_BYTES).unwrap_or(0);
        if window == 0 || window % AES_BLOCK_BYTES != 0 || window > u8::MAX as usize {
            return Err(ProtocolError::InvalidPacketSize(packet_bytes));
        }
        Ok(Self { packet_bytes })
    }

    /// Total packet length on the wire.
    pub fn packet_bytes(&self) -> usize {
        self.packet_bytes
    }

    /// Ciphertext length, which is also the extended-PKCS#5 pad window.
    pub fn pad_window(&self) -> usize {
        self.packet_bytes - IV_BYTES
    }

    /// Largest body that still leaves at least one pad byte.
    pub fn max_body_bytes(&self) -> usize {
        self.pad_window() - SEQUENCE_BYTES - 1
    }
}

impl Default for PacketFormat {
    fn default() -> Self {
        Self::CANONICAL
    }
}

/// Seals `body` into a secure packet using a freshly drawn IV.
///
/// # Errors
///
/// Returns [`ProtocolError::BodyTooLarge`] if the body does not fit and
/// [`ProtocolError::Crypto`] if no IV could be drawn.
pub fn seal_packet(
    body: &[u8],
    seq: u32,
    key: &SessionKey,
    format: PacketFormat,
) -> Result<Vec<u8>, ProtocolError> {
    let iv = crypto::new_iv()?;
    seal_packet_with_iv(body, seq, key, &iv, format)
}

/// Seals `body` with a caller-chosen IV.
///
/// A client uses this for its OPEN packet, whose IV doubles as the session
/// salt.
///
/// # Errors
///
/// See [`seal_packet`].
pub fn seal_packet_with_iv(
    body: &[u8],
    seq: u32,
    key: &SessionKey,
    iv: &Iv,
    format: PacketFormat,
) -> Result<Vec<u8>, ProtocolError> {
    if body.len() > format.max_body_bytes() {
        return Err(ProtocolError::BodyTooLarge {
            len: body.len(),
            max: format.max_body_bytes(),
        });
    }

    let mut plain = Vec::with_capacity(SEQUENCE_BYTES + body.len());
    plain.extend_from_slice(&seq.to_be_bytes());
    plain.extend_from_slice(body);

    let cipher = crypto::encrypt(&plain, key, iv, format.pad_window())?;

    let mut packet = Vec::with_capacity(format.packet_bytes());
    packet.extend_from_slice(iv);
    packet.extend_from_slice(&cipher);
    Ok(packet)
}

/// Returns the IV (first 16 bytes) of a secure packet.
pub fn packet_iv(packet: &[u8]) -> Option<Iv> {
    packet.get(..IV_BYTES)?.try_into().ok()
}

/// Opens a secure packet of the given generation, returning
/// `(sequence, body)`.
///
/// # Errors
///
/// Returns [`ProtocolError::WrongPacketLength`] unless the packet is exactly
/// `format.packet_bytes()` long, [`ProtocolError::Crypto`] when decryption or
/// unpadding fails (the usual symptom of a wrong key) and
/// [`ProtocolError::SequenceOutOfRange`] for a sequence number above
/// [`MAX_SEQUENCE`].
pub fn open_packet(
    packet: &[u8],
    key: &SessionKey,
    format: PacketFormat,
) -> Result<(u32, Vec<u8>), ProtocolError> {
    let iv = match packet_iv(packet) {
        Some(iv) if packet.len() == format.packet_bytes() => iv,
        _ => {
            return Err(ProtocolError::WrongPacketLength {
                expected: format.packet_bytes(),
                actual: packet.len(),
            })
        }
    };

    let plain = crypto::decrypt(&packet[IV_BYTES..], key, &iv)?;
    if plain.len() < SEQUENCE_BYTES {
        return Err(ProtocolError::InsufficientData {
            needed: SEQUENCE_BYTES,
            available: plain.len(),
        });
    }

    let seq = u32::from_be_bytes([plain[0], plain[1], plain[2], plain[3]]);
    if seq > MAX_SEQUENCE {
        return Err(ProtocolError::SequenceOutOfRange(seq));
    }
    Ok((seq, plain[SEQUENCE_BYTES..].to_vec()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{Key, PressAction, ScreenSize};

    fn key() -> SessionKey {
        SessionKey::derive("correct horse", Some(&[9u8; 16]))
    }

    #[test]
    fn test_seal_packet_has_fixed_canonical_length() {
        // Arrange
        let body = encode_body(&Body::Control(ControlMessage::HeartbeatAck), Framing::Secure);

        // Act
        let packet = seal_packet(&body, 7, &key(), PacketFormat::CANONICAL).unwrap();

        // Assert
        assert_eq!(packet.len(), 48);
    }

    #[test]
    fn test_open_packet_returns_sequence_and_body() {
        let body = MoveMessage::new(MoveKind::Relative, 6, -8).to_bytes();
        let packet = seal_packet(&body, 42, &key(), PacketFormat::CANONICAL).unwrap();

        let (seq, opened) = open_packet(&packet, &key(), PacketFormat::CANONICAL).unwrap();

        assert_eq!(seq, 42);
        assert_eq!(opened, body);
        assert_eq!(
            decode_body(&opened, Framing::Secure).unwrap(),
            Body::Move(MoveMessage::new(MoveKind::Relative, 6, -8))
        );
    }

    #[test]
    fn test_legacy_format_produces_thirty_two_byte_packets() {
        let packet = seal_packet(b"BEAT", 1, &key(), PacketFormat::LEGACY).unwrap();
        assert_eq!(packet.len(), 32);
        assert_eq!(open_packet(&packet, &key(), PacketFormat::LEGACY).unwrap(), (1, b"BEAT".to_vec()));
    }

    #[test]
    fn test_seal_packet_rejects_oversize_body() {
        let body = [b'x'; 28];
        let result = seal_packet(&body, 1, &key(), PacketFormat::CANONICAL);
        assert_eq!(result, Err(ProtocolError::BodyTooLarge { len: 28, max: 27 }));
    }

    #[test]
    fn test_open_packet_rejects_truncated_input() {
        assert_eq!(
            open_packet(&[0u8; 20], &key(), PacketFormat::CANONICAL),
            Err(ProtocolError::WrongPacketLength { expected: 48, actual: 20 })
        );
    }

    #[test]
    fn test_open_packet_rejects_other_generation_length() {
        // Arrange: a well-formed 64-byte packet (IV plus a 48-byte pad window)
        let iv = [3u8; 16];
        let mut plain = 5u32.to_be_bytes().to_vec();
        plain.extend_from_slice(b"HEARTBEAT");
        let cipher = crypto::encrypt(&plain, &key(), &iv, 48).unwrap();
        let mut oversized = iv.to_vec();
        oversized.extend_from_slice(&cipher);
        let legacy = seal_packet(b"BEAT", 1, &key(), PacketFormat::LEGACY).unwrap();

        // Act
        let oversized_result = open_packet(&oversized, &key(), PacketFormat::CANONICAL);
        let legacy_result = open_packet(&legacy, &key(), PacketFormat::CANONICAL);

        // Assert
        assert_eq!(oversized.len(), 64);
        assert_eq!(
            oversized_result,
            Err(ProtocolError::WrongPacketLength { expected: 48, actual: 64 })
        );
        assert_eq!(
            legacy_result,
            Err(ProtocolError::WrongPacketLength { expected: 48, actual: 32 })
        );
    }

    #[test]
    fn test_packet_iv_is_prefix() {
        let iv = [5u8; 16];
        let packet = seal_packet_with_iv(b"OPEN", 0, &key(), &iv, PacketFormat::CANONICAL).unwrap();
        assert_eq!(packet_iv(&packet), Some(iv));
    }

    #[test]
    fn test_packet_format_validation() {
        assert!(PacketFormat::new(48).is_ok());
        assert!(PacketFormat::new(64).is_ok());
        assert_eq!(PacketFormat::new(40), Err(ProtocolError::InvalidPacketSize(40)));
        assert_eq!(PacketFormat::new(16), Err(ProtocolError::InvalidPacketSize(16)));
        assert_eq!(PacketFormat::new(8), Err(ProtocolError::InvalidPacketSize(8)));
    }

    #[test]
    fn test_plain_framing_uses_text_lines() {
        let body = Body::Move(MoveMessage::new(MoveKind::Scroll, 0, -3));
        assert_eq!(encode_body(&body, Framing::Plain), b"SCROLL 0,-3");

        let typed = Body::Command(Command::Type("hey".into()));
        assert_eq!(encode_body(&typed, Framing::Plain), b"TYPEhey");
    }

    #[test]
    fn test_plain_decode_ignores_line_terminator_and_nuls() {
        let decoded = decode_body(b"OPEN 800x600\n\0\0", Framing::Plain).unwrap();
        assert_eq!(
            decoded,
            Body::Control(ControlMessage::Open {
                screen: Some(ScreenSize { width: 800, height: 600 })
            })
        );
    }

    #[test]
    fn test_secure_decode_distinguishes_commands_from_moves() {
        let key_cmd = Body::Command(Command::key(Key::Space, PressAction::Down));
        let bytes = encode_body(&key_cmd, Framing::Secure);
        assert_eq!(bytes.len(), 9);
        assert_eq!(decode_body(&bytes, Framing::Secure).unwrap(), key_cmd);

        let heartbeat = encode_body(&Body::Control(ControlMessage::Heartbeat), Framing::Secure);
        assert_eq!(
            decode_body(&heartbeat, Framing::Secure).unwrap(),
            Body::Control(ControlMessage::Heartbeat)
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_body(b"WHATEVER", Framing::Plain).is_err());
        assert!(decode_body(&[0xFF, 0xFE], Framing::Secure).is_err());
    }
}
