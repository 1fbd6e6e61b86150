//! Protocol constants.
//!
//! These values are fixed by the wire format and the pairing protocol and
//! MUST NOT be changed within version 1.

use std::time::Duration;

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Protocol version carried in the top nibble of every frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Session ID size (32-bit, chosen uniformly at pairing).
pub const SESSION_ID_SIZE: usize = 4;

/// AES-128 session key size.
pub const SESSION_KEY_SIZE: usize = 16;

/// Transmitter identifier size carried inside the BIND ciphertext.
pub const TRANSMITTER_ID_SIZE: usize = 8;

/// Sequence number size inside the encrypted header.
pub const SEQUENCE_SIZE: usize = 4;

/// Hard cap on the byte length of a single frame.
///
/// The symbol decoder aborts with `FrameTooLong` past this point; nothing in
/// the version-1 catalog comes close.
pub const MAX_FRAME_BYTES: usize = 96;

// =============================================================================
// MESSAGE TYPES (header type nibble)
// =============================================================================

/// HELLO — private medium, receiver to transmitter, plaintext only.
pub const MSG_TYPE_HELLO: u8 = 1;

/// BOUND — private medium, receiver to transmitter, encrypted.
pub const MSG_TYPE_BOUND: u8 = 2;

/// BIND — public medium, transmitter to receiver.
pub const MSG_TYPE_BIND: u8 = 3;

/// UNBIND — public medium, encrypted.
pub const MSG_TYPE_UNBIND: u8 = 4;

/// CONFIGURE — public medium, encrypted empty bodies.
pub const MSG_TYPE_CONFIGURE: u8 = 5;

/// ACT — public medium, encrypted.
pub const MSG_TYPE_ACT: u8 = 8;

// =============================================================================
// PROTECTION ALGORITHM REGISTRY
// =============================================================================

/// AEAD_AES_128_OCB_TAGLEN128 (8-byte nonce, 16-byte tag).
pub const ALG_AES_128_OCB_TAGLEN128: u8 = 20;

/// AEAD_AES_128_OCB_TAGLEN64 (4-byte nonce, 8-byte tag).
pub const ALG_AES_128_OCB_TAGLEN64: u8 = 22;

/// First protection algorithm id reserved for private use.
pub const ALG_PRIVATE_USE_MIN: u8 = 128;

// =============================================================================
// SYMBOL LAYER
// =============================================================================

/// Number of `0` symbols in the preamble.
pub const PREAMBLE_SYMBOLS: usize = 7;

/// Duration of one symbol in timing units (on + off).
pub const SYMBOL_UNITS: u32 = 3;

/// Duration of the whole preamble in timing units.
pub const PREAMBLE_UNITS: u32 = PREAMBLE_SYMBOLS as u32 * SYMBOL_UNITS;

/// Smallest legal symbol unit; 10 µs yields the 33 kbps upper bound.
pub const MIN_UNIT_MICROS: u32 = 10;

/// Default symbol unit.
pub const DEFAULT_UNIT_MICROS: u32 = 10;

// =============================================================================
// SPACING AND HOLD-OFF (in preamble lengths)
// =============================================================================

/// Copies emitted per bursted frame.
pub const BURST_COPIES: u8 = 3;

/// Minimum spacing between copies within a burst.
pub const COPY_GAP_PREAMBLES: u32 = 128;

/// Minimum spacing between whole frames or bursts.
pub const FRAME_GAP_PREAMBLES: u32 = 1024;

/// Receive silence enforced after a framing or authentication fault.
pub const HOLD_OFF_PREAMBLES: u32 = 64;

// =============================================================================
// STATE MACHINE TIMING
// =============================================================================

/// Receiver start-up delay; defeats power-cycle rate-limit bypass.
pub const STARTUP_DELAY: Duration = Duration::from_millis(100);

/// PAIRING / UNPAIRING window on both endpoints.
pub const PAIRING_WINDOW: Duration = Duration::from_secs(10);

/// CONFIGURING window entered after pairing or an authenticated CONFIGURE.
pub const CONFIGURING_WINDOW: Duration = Duration::from_secs(30);

/// CONFIGURING window re-armed by each authenticated ACT.
pub const ACTIVITY_WINDOW: Duration = Duration::from_secs(10);

/// Period of the receiver's HELLO broadcast while PAIRING.
pub const HELLO_PERIOD: Duration = Duration::from_millis(400);

/// Admission limiter accounting window.
pub const ADMISSION_WINDOW: Duration = Duration::from_secs(1);

/// Default per-window admission budget for ACT frames.
pub const DEFAULT_ACT_BUDGET: u32 = 10;

/// Default session table capacity.
pub const DEFAULT_SESSION_CAPACITY: usize = 8;
