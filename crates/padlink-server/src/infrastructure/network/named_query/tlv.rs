//! Minimal TLV wire format for named queries.
//!
//! Every element is `type ‖ length ‖ value`.  Type and length use the
//! variable-width number encoding: values below 253 take one byte, larger
//! ones a marker byte (`0xFD`, `0xFE`, `0xFF`) followed by a big-endian
//! `u16`, `u32` or `u64`.
//!
//! Only the subset needed to answer queries is implemented:
//!
//! ```text
//! Interest  0x05 { Name 0x07 { Component 0x08 }*, Nonce 0x0A, Lifetime 0x0C }
//! Data      0x06 { Name, MetaInfo 0x14 { Freshness 0x19 }, Content 0x15,
//!                  SignatureInfo 0x16 { SignatureType 0x1B },
//!                  SignatureValue 0x17 }
//! ```
//!
//! Data packets carry a SHA-256 digest signature over everything from the
//! Name up to and including the SignatureInfo.  Unknown elements inside an
//! Interest are skipped.

use std::fmt;

use sha2::{Digest, Sha256};
use thiserror::Error;

pub const TLV_INTEREST: u64 = 0x05;
pub const TLV_DATA: u64 = 0x06;
pub const TLV_NAME: u64 = 0x07;
pub const TLV_NAME_COMPONENT: u64 = 0x08;
pub const TLV_NONCE: u64 = 0x0A;
pub const TLV_INTEREST_LIFETIME: u64 = 0x0C;
pub const TLV_META_INFO: u64 = 0x14;
pub const TLV_CONTENT: u64 = 0x15;
pub const TLV_SIGNATURE_INFO: u64 = 0x16;
pub const TLV_SIGNATURE_VALUE: u64 = 0x17;
pub const TLV_FRESHNESS_PERIOD: u64 = 0x19;
pub const TLV_SIGNATURE_TYPE: u64 = 0x1B;

/// SignatureType value for a plain SHA-256 digest.
pub const SIGNATURE_DIGEST_SHA256: u64 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TlvError {
    #[error("truncated element: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("expected element type {expected:#04x}, found {found:#04x}")]
    UnexpectedType { expected: u64, found: u64 },

    #[error("missing required element {0:#04x}")]
    Missing(u64),

    #[error("non-negative integer cannot be {0} bytes wide")]
    InvalidInteger(usize),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),

    #[error("signature digest mismatch")]
    BadSignature,
}

// ── Primitive encoding ───────────────────────────────────────────────────────

pub fn write_var_number(out: &mut Vec<u8>, n: u64) {
    if n < 253 {
        out.push(n as u8);
    } else if n <= u64::from(u16::MAX) {
        out.push(0xFD);
        out.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= u64::from(u32::MAX) {
        out.push(0xFE);
        out.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        out.push(0xFF);
        out.extend_from_slice(&n.to_be_bytes());
    }
}

pub fn read_var_number(buf: &[u8], pos: &mut usize) -> Result<u64, TlvError> {
    let first = take(buf, pos, 1)?[0];
    let width = match first {
        0xFD => 2,
        0xFE => 4,
        0xFF => 8,
        small => return Ok(u64::from(small)),
    };
    Ok(be_uint(take(buf, pos, width)?))
}

/// Appends one complete element.
pub fn write_tlv(out: &mut Vec<u8>, typ: u64, value: &[u8]) {
    write_var_number(out, typ);
    write_var_number(out, value.len() as u64);
    out.extend_from_slice(value);
}

/// Reads one element, returning its type and value.
pub fn read_tlv<'a>(buf: &'a [u8], pos: &mut usize) -> Result<(u64, &'a [u8]), TlvError> {
    let typ = read_var_number(buf, pos)?;
    let len = usize::try_from(read_var_number(buf, pos)?).map_err(|_| TlvError::Truncated {
        needed: usize::MAX,
        available: buf.len().saturating_sub(*pos),
    })?;
    Ok((typ, take(buf, pos, len)?))
}

/// Shortest big-endian form of a non-negative integer (1, 2, 4 or 8 bytes).
pub fn encode_nonneg(n: u64) -> Vec<u8> {
    if n <= u64::from(u8::MAX) {
        vec![n as u8]
    } else if n <= u64::from(u16::MAX) {
        (n as u16).to_be_bytes().to_vec()
    } else if n <= u64::from(u32::MAX) {
        (n as u32).to_be_bytes().to_vec()
    } else {
        n.to_be_bytes().to_vec()
    }
}

pub fn decode_nonneg(value: &[u8]) -> Result<u64, TlvError> {
    match value.len() {
        1 | 2 | 4 | 8 => Ok(be_uint(value)),
        n => Err(TlvError::InvalidInteger(n)),
    }
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], TlvError> {
    let available = buf.len().saturating_sub(*pos);
    if len > available {
        return Err(TlvError::Truncated {
            needed: len,
            available,
        });
    }
    let slice = &buf[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}

fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Reads the single top-level element of `buf` and checks its type.
fn read_outer(buf: &[u8], expected: u64) -> Result<&[u8], TlvError> {
    let mut pos = 0;
    let (typ, value) = read_tlv(buf, &mut pos)?;
    if typ != expected {
        return Err(TlvError::UnexpectedType {
            expected,
            found: typ,
        });
    }
    if pos != buf.len() {
        return Err(TlvError::TrailingBytes(buf.len() - pos));
    }
    Ok(value)
}

// ── Name ─────────────────────────────────────────────────────────────────────

/// A hierarchical name: an ordered list of opaque byte components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Name {
    components: Vec<Vec<u8>>,
}

impl Name {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a `/`-separated URI such as `/ndnmouse/update`.
    ///
    /// Components may contain `%XX` escapes.  Empty components are skipped,
    /// so `/` and the empty string both yield the empty name.
    pub fn from_uri(uri: &str) -> Result<Self, TlvError> {
        let mut name = Self::new();
        for part in uri.split('/').filter(|p| !p.is_empty()) {
            name.components.push(percent_decode(part)?);
        }
        Ok(name)
    }

    pub fn push(&mut self, component: impl Into<Vec<u8>>) -> &mut Self {
        self.components.push(component.into());
        self
    }

    /// Returns a copy of `self` with one more component.
    pub fn child(&self, component: impl Into<Vec<u8>>) -> Self {
        let mut name = self.clone();
        name.push(component);
        name
    }

    pub fn components(&self) -> &[Vec<u8>] {
        &self.components
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.components.get(index).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// `true` if every component of `prefix` matches the start of `self`.
    pub fn has_prefix(&self, prefix: &Name) -> bool {
        prefix.len() <= self.len()
            && prefix
                .components
                .iter()
                .zip(&self.components)
                .all(|(a, b)| a == b)
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut value = Vec::new();
        for component in &self.components {
            write_tlv(&mut value, TLV_NAME_COMPONENT, component);
        }
        write_tlv(out, TLV_NAME, &value);
    }

    /// Decodes the *value* of a Name element.
    pub fn decode_value(value: &[u8]) -> Result<Self, TlvError> {
        let mut name = Self::new();
        let mut pos = 0;
        while pos < value.len() {
            let (typ, component) = read_tlv(value, &mut pos)?;
            if typ != TLV_NAME_COMPONENT {
                return Err(TlvError::UnexpectedType {
                    expected: TLV_NAME_COMPONENT,
                    found: typ,
                });
            }
            name.components.push(component.to_vec());
        }
        Ok(name)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return f.write_str("/");
        }
        for component in &self.components {
            f.write_str("/")?;
            for &b in component {
                if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
                    write!(f, "{}", b as char)?;
                } else {
                    write!(f, "%{b:02X}")?;
                }
            }
        }
        Ok(())
    }
}

fn percent_decode(part: &str) -> Result<Vec<u8>, TlvError> {
    let bytes = part.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = part
                .get(i + 1..i + 3)
                .ok_or_else(|| TlvError::InvalidName(format!("truncated escape in {part:?}")))?;
            let value = u8::from_str_radix(hex, 16)
                .map_err(|_| TlvError::InvalidName(format!("bad escape %{hex} in {part:?}")))?;
            out.push(value);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

// ── Interest ─────────────────────────────────────────────────────────────────

/// A named request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interest {
    pub name: Name,
    pub nonce: u32,
    pub lifetime_ms: Option<u64>,
}

impl Interest {
    pub fn new(name: Name, nonce: u32) -> Self {
        Self {
            name,
            nonce,
            lifetime_ms: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut value = Vec::new();
        self.name.encode_into(&mut value);
        write_tlv(&mut value, TLV_NONCE, &self.nonce.to_be_bytes());
        if let Some(lifetime) = self.lifetime_ms {
            write_tlv(&mut value, TLV_INTEREST_LIFETIME, &encode_nonneg(lifetime));
        }
        let mut out = Vec::with_capacity(value.len() + 4);
        write_tlv(&mut out, TLV_INTEREST, &value);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TlvError> {
        let value = read_outer(buf, TLV_INTEREST)?;
        let mut name = None;
        let mut nonce = 0u32;
        let mut lifetime_ms = None;

        let mut pos = 0;
        while pos < value.len() {
            let (typ, inner) = read_tlv(value, &mut pos)?;
            match typ {
                TLV_NAME => name = Some(Name::decode_value(inner)?),
                TLV_NONCE => nonce = decode_nonneg(inner)? as u32,
                TLV_INTEREST_LIFETIME => lifetime_ms = Some(decode_nonneg(inner)?),
                _ => {}
            }
        }

        Ok(Self {
            name: name.ok_or(TlvError::Missing(TLV_NAME))?,
            nonce,
            lifetime_ms,
        })
    }
}

// ── Data ─────────────────────────────────────────────────────────────────────

/// A named answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub name: Name,
    /// Zero: answers describe momentary state and must never be cached.
    pub freshness_ms: u64,
    pub content: Vec<u8>,
}

impl Data {
    pub fn new(name: Name, content: Vec<u8>) -> Self {
        Self {
            name,
            freshness_ms: 0,
            content,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut signed = Vec::new();
        self.name.encode_into(&mut signed);

        let mut meta = Vec::new();
        write_tlv(&mut meta, TLV_FRESHNESS_PERIOD, &encode_nonneg(self.freshness_ms));
        write_tlv(&mut signed, TLV_META_INFO, &meta);

        write_tlv(&mut signed, TLV_CONTENT, &self.content);

        let mut sig_info = Vec::new();
        write_tlv(
            &mut sig_info,
            TLV_SIGNATURE_TYPE,
            &encode_nonneg(SIGNATURE_DIGEST_SHA256),
        );
        write_tlv(&mut signed, TLV_SIGNATURE_INFO, &sig_info);

        let digest = Sha256::digest(&signed);
        let mut value = signed;
        write_tlv(&mut value, TLV_SIGNATURE_VALUE, &digest);

        let mut out = Vec::with_capacity(value.len() + 4);
        write_tlv(&mut out, TLV_DATA, &value);
        out
    }

    /// Decodes a Data packet and verifies its digest signature.
    pub fn decode(buf: &[u8]) -> Result<Self, TlvError> {
        let value = read_outer(buf, TLV_DATA)?;
        let mut name = None;
        let mut freshness_ms = 0;
        let mut content = Vec::new();
        let mut signed_end = None;
        let mut signature = None;

        let mut pos = 0;
        while pos < value.len() {
            let (typ, inner) = read_tlv(value, &mut pos)?;
            match typ {
                TLV_NAME => name = Some(Name::decode_value(inner)?),
                TLV_META_INFO => {
                    let mut meta_pos = 0;
                    while meta_pos < inner.len() {
                        let (meta_typ, meta_value) = read_tlv(inner, &mut meta_pos)?;
                        if meta_typ == TLV_FRESHNESS_PERIOD {
                            freshness_ms = decode_nonneg(meta_value)?;
                        }
                    }
                }
                TLV_CONTENT => content = inner.to_vec(),
                TLV_SIGNATURE_INFO => signed_end = Some(pos),
                TLV_SIGNATURE_VALUE => signature = Some(inner),
                _ => {}
            }
        }

        let signed_end = signed_end.ok_or(TlvError::Missing(TLV_SIGNATURE_INFO))?;
        let signature = signature.ok_or(TlvError::Missing(TLV_SIGNATURE_VALUE))?;
        if Sha256::digest(&value[..signed_end]).as_slice() != signature {
            return Err(TlvError::BadSignature);
        }

        Ok(Self {
            name: name.ok_or(TlvError::Missing(TLV_NAME))?,
            freshness_ms,
            content,
        })
    }
}

/// Any top-level packet a face can receive.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Interest(Interest),
    Data(Data),
}

impl Packet {
    /// Decodes by the outer type; Data must pass its signature check.
    pub fn decode(buf: &[u8]) -> Result<Self, TlvError> {
        let mut pos = 0;
        match read_var_number(buf, &mut pos)? {
            TLV_INTEREST => Interest::decode(buf).map(Packet::Interest),
            TLV_DATA => Data::decode(buf).map(Packet::Data),
            found => Err(TlvError::UnexpectedType {
                expected: TLV_INTEREST,
                found,
            }),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_number_widths() {
        for (n, len) in [(0u64, 1), (252, 1), (253, 3), (65_535, 3), (65_536, 5), (1 << 40, 9)] {
            let mut out = Vec::new();
            write_var_number(&mut out, n);
            assert_eq!(out.len(), len, "width for {n}");
            let mut pos = 0;
            assert_eq!(read_var_number(&out, &mut pos).unwrap(), n);
            assert_eq!(pos, len);
        }
    }

    #[test]
    fn test_nonneg_uses_shortest_form() {
        assert_eq!(encode_nonneg(0), vec![0]);
        assert_eq!(encode_nonneg(4000), vec![0x0F, 0xA0]);
        assert_eq!(encode_nonneg(70_000).len(), 4);
        assert_eq!(decode_nonneg(&[0x0F, 0xA0]).unwrap(), 4000);
        assert!(decode_nonneg(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_name_uri_and_display() {
        let name = Name::from_uri("/ndnmouse/seq/a%2Fb").unwrap();
        assert_eq!(name.len(), 3);
        assert_eq!(name.get(2), Some(&b"a/b"[..]));
        assert_eq!(name.to_string(), "/ndnmouse/seq/a%2Fb");
        assert_eq!(Name::from_uri("/").unwrap().to_string(), "/");
    }

    #[test]
    fn test_name_rejects_bad_escape() {
        assert!(matches!(Name::from_uri("/a%zz"), Err(TlvError::InvalidName(_))));
        assert!(matches!(Name::from_uri("/a%4"), Err(TlvError::InvalidName(_))));
    }

    #[test]
    fn test_has_prefix() {
        let prefix = Name::from_uri("/ndnmouse").unwrap();
        assert!(Name::from_uri("/ndnmouse/update").unwrap().has_prefix(&prefix));
        assert!(prefix.has_prefix(&prefix));
        assert!(!Name::from_uri("/other/update").unwrap().has_prefix(&prefix));
        assert!(!Name::new().has_prefix(&prefix));
    }

    #[test]
    fn test_interest_encoding_layout() {
        // Arrange
        let interest = Interest::new(Name::from_uri("/a").unwrap(), 0x0102_0304);

        // Act
        let wire = interest.encode();

        // Assert
        assert_eq!(
            wire,
            vec![0x05, 0x0B, 0x07, 0x03, 0x08, 0x01, b'a', 0x0A, 0x04, 1, 2, 3, 4]
        );
        assert_eq!(Interest::decode(&wire).unwrap(), interest);
    }

    #[test]
    fn test_interest_skips_unknown_elements() {
        let mut value = Vec::new();
        Name::from_uri("/x/y").unwrap().encode_into(&mut value);
        write_tlv(&mut value, 0x21, &[]);
        write_tlv(&mut value, TLV_INTEREST_LIFETIME, &encode_nonneg(4000));
        let mut wire = Vec::new();
        write_tlv(&mut wire, TLV_INTEREST, &value);

        let interest = Interest::decode(&wire).unwrap();

        assert_eq!(interest.name.to_string(), "/x/y");
        assert_eq!(interest.lifetime_ms, Some(4000));
    }

    #[test]
    fn test_interest_without_name_is_rejected() {
        let mut wire = Vec::new();
        write_tlv(&mut wire, TLV_INTEREST, &[0x0A, 0x04, 0, 0, 0, 1]);
        assert_eq!(Interest::decode(&wire), Err(TlvError::Missing(TLV_NAME)));
    }

    #[test]
    fn test_data_is_never_cacheable_and_verifies() {
        // Arrange
        let data = Data::new(Name::from_uri("/ndnmouse/salt").unwrap(), vec![7; 16]);

        // Act
        let decoded = Data::decode(&data.encode()).unwrap();

        // Assert
        assert_eq!(decoded.freshness_ms, 0);
        assert_eq!(decoded.content, vec![7; 16]);
        assert_eq!(decoded.name, data.name);
    }

    #[test]
    fn test_tampered_data_fails_signature_check() {
        let mut wire = Data::new(Name::from_uri("/n").unwrap(), b"REL 1,1".to_vec()).encode();
        let content_byte = wire.iter().position(|&b| b == b'R').unwrap();
        wire[content_byte] = b'X';

        assert_eq!(Data::decode(&wire), Err(TlvError::BadSignature));
    }

    #[test]
    fn test_packet_decode_classifies_by_outer_type() {
        let name = Name::from_uri("/ndnmouse/update").unwrap();
        let interest = Interest::new(name.clone(), 9).encode();
        let data = Data::new(name, b"BEAT".to_vec()).encode();
        let mut unknown = Vec::new();
        write_tlv(&mut unknown, 0x64, b"lp");

        assert!(matches!(Packet::decode(&interest), Ok(Packet::Interest(i)) if i.nonce == 9));
        assert!(matches!(Packet::decode(&data), Ok(Packet::Data(d)) if d.content == b"BEAT"));
        assert_eq!(
            Packet::decode(&unknown),
            Err(TlvError::UnexpectedType { expected: TLV_INTEREST, found: 0x64 })
        );
    }

    #[test]
    fn test_wrong_outer_type_and_truncation() {
        let interest = Interest::new(Name::from_uri("/a").unwrap(), 1).encode();
        assert!(matches!(
            Data::decode(&interest),
            Err(TlvError::UnexpectedType { expected: TLV_DATA, found: TLV_INTEREST })
        ));
        assert!(matches!(
            Interest::decode(&interest[..interest.len() - 1]),
            Err(TlvError::Truncated { .. })
        ));
    }
}
