//! Error types for the openepo protocol engine.

use thiserror::Error;

use super::constants::MAX_FRAME_BYTES;

/// Errors raised by the symbol layer while recovering a frame.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    /// Fewer than seven `0` symbols before the start-of-frame.
    #[error("preamble shorter than 7 symbols")]
    PreambleShort,

    /// The symbol after the preamble was not the `1` start-of-frame.
    #[error("missing start-of-frame symbol")]
    BadSof,

    /// Frame exceeded the byte cap without an end-of-frame.
    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    FrameTooLong,

    /// Symbol stream ended in the middle of a frame.
    #[error("symbol stream truncated mid-frame")]
    Truncated,

    /// The stuffed `1` expected before a message byte was absent.
    #[error("stuff bit missing before message byte")]
    BadStuffBit,
}

/// Errors raised while parsing frame bytes into messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Ran out of bytes mid-field.
    #[error("unexpected end of data")]
    Truncated,

    /// A discriminant of an implicit union was not recognised.
    #[error("unknown {union} discriminant: {value}")]
    UnknownTag {
        /// Which union carried the discriminant.
        union: &'static str,
        /// The offending value.
        value: u8,
    },

    /// The version nibble named a version this engine does not speak.
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// A length prefix pointed past the end of the frame.
    #[error("length prefix overruns frame")]
    BadLength,

    /// Bytes remained after the message body ended.
    #[error("trailing bytes after message body")]
    TrailingBytes,
}

/// Errors in the protection layer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD open failed: tag mismatch or wrong key.
    #[error("authentication failed")]
    AuthFailure,

    /// Nonce length outside what OCB3 accepts (1..=15 bytes).
    #[error("nonce length {0} unsupported")]
    NonceLength(usize),

    /// Sequence counter exhausted; the key must be retired.
    #[error("sequence counter exhausted")]
    CounterExhaustion,
}

/// Errors from the bounded session store.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionStoreError {
    /// The table already holds its configured maximum of records.
    #[error("session table full")]
    CapacityExhausted,

    /// A record with the same session id already exists.
    #[error("duplicate session id")]
    DuplicateSessionId,
}

/// Top-level openepo errors.
#[derive(Debug, Error)]
pub enum OpenepoError {
    /// Symbol-layer framing error.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Byte-layer decode error.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Protection-layer error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Session store error.
    #[error("session store error: {0}")]
    Store(#[from] SessionStoreError),

    /// Persistent storage I/O error.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}
