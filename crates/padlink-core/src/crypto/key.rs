//! Password-derived AES-128 session keys.

use std::fmt;

use sha2::{Digest, Sha256};

use super::CryptoError;

/// AES-128 key length in bytes.
pub const KEY_BYTES: usize = 16;

/// Length of a key-derivation salt in bytes.
pub const SALT_BYTES: usize = 16;

/// A per-session key-derivation salt.  Travels in cleartext.
pub type Salt = [u8; SALT_BYTES];

/// Draws a random salt from the OS CSPRNG.
///
/// # Errors
///
/// Returns [`CryptoError::RandomUnavailable`] if the OS generator fails.
pub fn generate_salt() -> Result<Salt, CryptoError> {
    let mut salt = [0u8; SALT_BYTES];
    getrandom::getrandom(&mut salt).map_err(|e| CryptoError::RandomUnavailable(e.to_string()))?;
    Ok(salt)
}

/// A symmetric AES-128 key derived from the user's password.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; KEY_BYTES]);

impl SessionKey {
    /// Derives `SHA-256(UTF-8(password) ‖ salt)[0..16]`.
    ///
    /// Pass `None` for the legacy unsalted derivation.
    pub fn derive(password: &str, salt: Option<&Salt>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        if let Some(salt) = salt {
            hasher.update(salt);
        }
        let digest = hasher.finalize();

        let mut key = [0u8; KEY_BYTES];
        key.copy_from_slice(&digest[..KEY_BYTES]);
        Self(key)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}
