//! # Openepo Protocol
//!
//! Openepo is an open rolling-code remote-control protocol for short,
//! infrequent messages over an untrusted public radio band, bootstrapped by
//! a trusted line-of-sight side channel. This crate is the protocol engine:
//!
//! - **Codec**: OOK pulse-width symbols, stuffed-bit framing, and the
//!   packed big-endian version-1 message catalog
//! - **Protection**: AES-128-OCB3 (tag 64 or 128) over the frame's
//!   unencrypted part as associated data, with sequence-number replay
//!   defence
//! - **Endpoints**: the paired transmitter and receiver state machines,
//!   driving pair/unpair/act over two injected buses
//! - **Governance**: framing/auth hold-off, per-type admission limiting,
//!   and burst pacing with preamble-derived spacing
//!
//! The engine is single-threaded and performs no I/O of its own: media,
//! deferred execution, randomness, persistence, and the host actor are all
//! injected through the traits in [`core`].
//!
//! ## Example
//!
//! ```
//! use std::rc::Rc;
//! use openepo::codec::Action;
//! use openepo::link::LocalBus;
//! use openepo::receiver::{Receiver, ReceiverConfig, ReceiverDeps};
//! use openepo::testing::{ManualScheduler, RecordingReceiverHost, SeededRandom};
//!
//! let public = Rc::new(LocalBus::new());
//! let private = Rc::new(LocalBus::new());
//! let scheduler = Rc::new(ManualScheduler::new());
//! let host = RecordingReceiverHost::shared();
//!
//! let receiver = Receiver::new(
//!     ReceiverConfig::default(),
//!     ReceiverDeps {
//!         public_bus: public,
//!         private_bus: private,
//!         scheduler: Rc::clone(&scheduler) as Rc<dyn openepo::core::Scheduler>,
//!         random: Box::new(SeededRandom::new(1)),
//!         host,
//!         storage: None,
//!     },
//! );
//!
//! // The start-up delay elapses; an uncommissioned device opens its
//! // commissioning surface.
//! scheduler.advance(std::time::Duration::from_millis(100));
//! assert_eq!(receiver.state(), openepo::receiver::ReceiverState::Configuring);
//! receiver.set_pairing();
//! # let _ = Action::button_act();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod core;
pub mod crypto;
pub mod link;
pub mod persist;
pub mod receiver;
pub mod testing;
pub mod transmitter;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::codec::{
        Action, Frame, InterfaceDescriptor, InterfaceType, MessageType, Payload, SessionId,
    };
    pub use crate::core::{
        CancelHandle, CryptoError, DecodeError, FrameBus, FramingError, OpenepoError, OsRandom,
        RandomSource, Scheduler,
    };
    pub use crate::crypto::{Algorithm, Protection, SessionKey};
    pub use crate::link::{BurstPacer, Governor, LinkTiming, LocalBus};
    pub use crate::persist::{
        FileStorage, MemoryStorage, Pairing, PairingStorage, SessionStorage, TransmitterRecord,
    };
    pub use crate::receiver::{
        Receiver, ReceiverConfig, ReceiverDeps, ReceiverHost, ReceiverState, SessionRecord,
        SessionStore,
    };
    pub use crate::transmitter::{
        Transmitter, TransmitterConfig, TransmitterDeps, TransmitterHost, TransmitterState,
    };
}

// Re-export commonly used items at crate root.
pub use crate::core::OpenepoError;
pub use codec::{Action, Frame, SessionId};
pub use crypto::Algorithm;
pub use receiver::{Receiver, ReceiverState};
pub use transmitter::{Transmitter, TransmitterState};
