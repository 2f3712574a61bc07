//! Crypto engine: key derivation and AES-CBC with extended PKCS#5 padding.
//!
//! # Key derivation
//!
//! `key = SHA-256(UTF-8(password) ‖ salt)[0..16]`, an AES-128 key.  The salt
//! is a random 16-byte value chosen once per session and exchanged in the
//! clear (as the IV of the client's OPEN packet, or through the named-query
//! salt route).  The unsalted form survives only for the legacy protocol
//! generation.
//!
//! # Padding
//!
//! The cipher runs without built-in padding.  Payloads are padded with the
//! *extended* PKCS#5 rule: for a pad window `W` (which may span several AES
//! blocks) `pad = W − (len mod W)` bytes, each holding the value `pad`.
//! Existing peers depend on this exact byte layout.

pub mod cipher;
pub mod key;

use thiserror::Error;

pub use cipher::{decrypt, encrypt, new_iv, pad_extended, unpad_extended, Iv, AES_BLOCK_BYTES, IV_BYTES};
pub use key::{generate_salt, Salt, SessionKey, KEY_BYTES, SALT_BYTES};

/// Errors produced by the crypto engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The operating system's secure random generator could not be read.
    #[error("secure random generator unavailable: {0}")]
    RandomUnavailable(String),

    /// The ciphertext is empty or not a whole number of AES blocks.
    #[error("ciphertext length {0} is not a positive multiple of the AES block size")]
    UnalignedCiphertext(usize),

    /// The padded plaintext would not be a whole number of AES blocks.
    #[error("pad window {0} is not a positive multiple of the AES block size")]
    InvalidPadWindow(usize),

    /// Unpadding implied a non-positive plaintext length.
    #[error("decode error: pad length {pad} leaves no data in a {len}-byte buffer")]
    Decode { pad: usize, len: usize },
}
