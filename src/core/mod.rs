//! Core constants, error types, and injected-capability traits.

pub mod constants;
pub mod error;
pub mod traits;

pub use constants::*;
pub use error::{CryptoError, DecodeError, FramingError, OpenepoError, SessionStoreError};
pub use traits::{
    CancelHandle, FrameBus, FrameHandler, IntervalCallback, OsRandom, RandomSource, Scheduler,
    TimeoutCallback,
};
