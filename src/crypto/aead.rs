//! AEAD protection for frame payloads.
//!
//! Every encrypted part on the wire is `ciphertext || tag` produced by
//! AES-128-OCB3 under a pairing's session key. The associated data is the
//! serialized unencrypted part of the frame with the nonce spliced out; the
//! nonce itself rides in the unencrypted header.

use zeroize::Zeroize;

use super::ocb;
use super::Algorithm;
use crate::core::{CryptoError, SESSION_KEY_SIZE};

/// A 16-byte AES session key.
///
/// Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    key: [u8; SESSION_KEY_SIZE],
}

impl SessionKey {
    /// Create a session key from bytes.
    pub fn from_bytes(key: [u8; SESSION_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.key
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Encrypt `plaintext`, returning `ciphertext || tag`.
///
/// The nonce must have the algorithm's width; the producer is responsible
/// for never reusing one under the same key.
pub fn seal(
    key: &SessionKey,
    algorithm: Algorithm,
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != algorithm.nonce_len() {
        return Err(CryptoError::NonceLength(nonce.len()));
    }
    ocb::seal(key.as_bytes(), nonce, aad, plaintext, algorithm.tag_len())
}

/// Decrypt `ciphertext || tag`.
///
/// The tag comparison is constant-time. No nonce-uniqueness check is made
/// here; anti-replay is the sequence number's job.
pub fn open(
    key: &SessionKey,
    algorithm: Algorithm,
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != algorithm.nonce_len() {
        return Err(CryptoError::NonceLength(nonce.len()));
    }
    ocb::open(key.as_bytes(), nonce, aad, ciphertext, algorithm.tag_len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::from_bytes([0x42; SESSION_KEY_SIZE])
    }

    #[test]
    fn test_seal_open_roundtrip_both_variants() {
        for (algorithm, nonce) in [
            (Algorithm::AesOcbTag128, vec![0x01u8; 8]),
            (Algorithm::AesOcbTag64, vec![0x01u8; 4]),
        ] {
            let sealed = seal(&key(), algorithm, &nonce, b"header", b"body").unwrap();
            assert_eq!(sealed.len(), 4 + algorithm.tag_len());
            let opened = open(&key(), algorithm, &nonce, b"header", &sealed).unwrap();
            assert_eq!(opened, b"body");
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&key(), Algorithm::AesOcbTag64, &[1, 2, 3, 4], b"", b"x").unwrap();
        let other = SessionKey::from_bytes([0x43; SESSION_KEY_SIZE]);
        assert_eq!(
            open(&other, Algorithm::AesOcbTag64, &[1, 2, 3, 4], b"", &sealed),
            Err(CryptoError::AuthFailure)
        );
    }

    #[test]
    fn test_nonce_width_enforced() {
        assert_eq!(
            seal(&key(), Algorithm::AesOcbTag128, &[0; 4], b"", b""),
            Err(CryptoError::NonceLength(4))
        );
        assert_eq!(
            open(&key(), Algorithm::AesOcbTag64, &[0; 8], b"", &[0; 8]),
            Err(CryptoError::NonceLength(8))
        );
    }

    #[test]
    fn test_debug_redacts_key() {
        assert_eq!(format!("{:?}", key()), "SessionKey(..)");
    }
}
