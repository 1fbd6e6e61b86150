//! Protection layer: AES-128-OCB3 under the registered algorithm ids.

pub mod aead;
mod ocb;

pub use aead::{open, seal, SessionKey};

use crate::core::constants::{ALG_AES_128_OCB_TAGLEN128, ALG_AES_128_OCB_TAGLEN64};

/// Registered protection algorithms.
///
/// Ids at or above 128 are private use and not understood by this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Algorithm {
    /// AEAD_AES_128_OCB_TAGLEN128: 8-byte nonce, 16-byte tag.
    AesOcbTag128 = 20,
    /// AEAD_AES_128_OCB_TAGLEN64: 4-byte nonce, 8-byte tag.
    AesOcbTag64 = 22,
}

impl Algorithm {
    /// Parse a registered algorithm id.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            ALG_AES_128_OCB_TAGLEN128 => Some(Self::AesOcbTag128),
            ALG_AES_128_OCB_TAGLEN64 => Some(Self::AesOcbTag64),
            _ => None,
        }
    }

    /// The registered id.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Nonce width on the wire.
    pub fn nonce_len(self) -> usize {
        match self {
            Self::AesOcbTag128 => 8,
            Self::AesOcbTag64 => 4,
        }
    }

    /// Authentication tag width.
    pub fn tag_len(self) -> usize {
        match self {
            Self::AesOcbTag128 => 16,
            Self::AesOcbTag64 => 8,
        }
    }
}

/// A session's protection parameters: algorithm plus key.
#[derive(Debug, Clone)]
pub struct Protection {
    /// Which registered AEAD variant the session uses.
    pub algorithm: Algorithm,
    /// The 16-byte session key minted at pairing.
    pub key: SessionKey,
}

impl Protection {
    /// Bundle an algorithm with its key.
    pub fn new(algorithm: Algorithm, key: SessionKey) -> Self {
        Self { algorithm, key }
    }

    /// Encrypt under this session's parameters.
    pub fn seal(
        &self,
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, crate::core::CryptoError> {
        seal(&self.key, self.algorithm, nonce, aad, plaintext)
    }

    /// Decrypt under this session's parameters.
    pub fn open(
        &self,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, crate::core::CryptoError> {
        open(&self.key, self.algorithm, nonce, aad, ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_registry() {
        assert_eq!(Algorithm::from_id(20), Some(Algorithm::AesOcbTag128));
        assert_eq!(Algorithm::from_id(22), Some(Algorithm::AesOcbTag64));
        assert_eq!(Algorithm::from_id(0), None);
        assert_eq!(Algorithm::from_id(21), None);
        assert_eq!(Algorithm::from_id(200), None); // private use
        assert_eq!(Algorithm::AesOcbTag128.id(), 20);
        assert_eq!(Algorithm::AesOcbTag64.id(), 22);
    }

    #[test]
    fn test_widths() {
        assert_eq!(Algorithm::AesOcbTag128.nonce_len(), 8);
        assert_eq!(Algorithm::AesOcbTag128.tag_len(), 16);
        assert_eq!(Algorithm::AesOcbTag64.nonce_len(), 4);
        assert_eq!(Algorithm::AesOcbTag64.tag_len(), 8);
    }

    #[test]
    fn test_protection_roundtrip() {
        let protection = Protection::new(
            Algorithm::AesOcbTag64,
            SessionKey::from_bytes([0x11; 16]),
        );
        let sealed = protection.seal(&[0, 0, 0, 1], b"aad", b"hello").unwrap();
        assert_eq!(protection.open(&[0, 0, 0, 1], b"aad", &sealed).unwrap(), b"hello");
    }
}
