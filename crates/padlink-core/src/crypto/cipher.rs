//! AES-128-CBC with explicit extended PKCS#5 padding.
//!
//! CBC chaining is done by hand on top of the `aes` block cipher so that no
//! padding scheme is applied behind our back.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

use super::{CryptoError, SessionKey};

/// AES block size in bytes.
pub const AES_BLOCK_BYTES: usize = 16;

/// Size of a CBC initialisation vector in bytes.
pub const IV_BYTES: usize = AES_BLOCK_BYTES;

/// A CBC initialisation vector.
pub type Iv = [u8; IV_BYTES];

/// Draws a fresh IV from the operating system's CSPRNG.
///
/// Every outgoing packet gets its own IV; IVs are never reused.
///
/// # Errors
///
/// Returns [`CryptoError::RandomUnavailable`] if the OS generator fails.
pub fn new_iv() -> Result<Iv, CryptoError> {
    let mut iv = [0u8; IV_BYTES];
    getrandom::getrandom(&mut iv).map_err(|e| CryptoError::RandomUnavailable(e.to_string()))?;
    Ok(iv)
}

/// Pads `data` with the extended PKCS#5 rule for a `window`-byte pad window.
///
/// `pad = window − (len mod window)`; `pad` bytes of value `pad` are appended,
/// so a buffer that already fills the window gains a whole extra window.
///
/// # Examples
///
/// ```rust
/// use padlink_core::crypto::pad_extended;
///
/// let padded = pad_extended(b"abc", 32);
/// assert_eq!(padded.len(), 32);
/// assert!(padded[3..].iter().all(|&b| b == 29));
/// ```
pub fn pad_extended(data: &[u8], window: usize) -> Vec<u8> {
    let pad = window - (data.len() % window);
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    out
}

/// Strips extended PKCS#5 padding.
///
/// Reads the trailing byte as the pad length.  Only the implied length is
/// checked; the pad bytes themselves are not compared.
///
/// # Errors
///
/// Returns [`CryptoError::Decode`] if the unpadded length would be zero or
/// negative.
pub fn unpad_extended(data: &[u8]) -> Result<&[u8], CryptoError> {
    let Some(&last) = data.last() else {
        return Err(CryptoError::Decode { pad: 0, len: 0 });
    };
    let pad = last as usize;
    if data.len() <= pad {
        return Err(CryptoError::Decode {
            pad,
            len: data.len(),
        });
    }
    Ok(&data[..data.len() - pad])
}

/// Pads `plain` to `pad_window` bytes and encrypts it with AES-128-CBC.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidPadWindow`] if `pad_window` is not a
/// positive multiple of 16 that fits in a pad byte.
pub fn encrypt(
    plain: &[u8],
    key: &SessionKey,
    iv: &Iv,
    pad_window: usize,
) -> Result<Vec<u8>, CryptoError> {
    if pad_window == 0 || pad_window % AES_BLOCK_BYTES != 0 || pad_window > u8::MAX as usize {
        return Err(CryptoError::InvalidPadWindow(pad_window));
    }

    let mut buf = pad_extended(plain, pad_window);
    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    let mut chain = *iv;

    for chunk in buf.chunks_exact_mut(AES_BLOCK_BYTES) {
        for (b, c) in chunk.iter_mut().zip(chain.iter()) {
            *b ^= c;
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
        chain.copy_from_slice(chunk);
    }
    Ok(buf)
}

/// Decrypts AES-128-CBC `ciphertext` and strips the extended padding.
///
/// # Errors
///
/// Returns [`CryptoError::UnalignedCiphertext`] for empty or ragged input and
/// [`CryptoError::Decode`] when the padding is inconsistent (which is also
/// what a wrong key usually looks like).
pub fn decrypt(ciphertext: &[u8], key: &SessionKey, iv: &Iv) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_BYTES != 0 {
        return Err(CryptoError::UnalignedCiphertext(ciphertext.len()));
    }

    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    let mut out = ciphertext.to_vec();
    let mut chain = *iv;

    for chunk in out.chunks_exact_mut(AES_BLOCK_BYTES) {
        let mut next_chain = [0u8; AES_BLOCK_BYTES];
        next_chain.copy_from_slice(chunk);
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
        for (b, c) in chunk.iter_mut().zip(chain.iter()) {
            *b ^= c;
        }
        chain = next_chain;
    }

    let len = unpad_extended(&out)?.len();
    out.truncate(len);
    Ok(out)
}
