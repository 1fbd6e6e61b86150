//! Frame codec: bit packing, OOK-PWM symbol framing, and the version-1
//! message catalog.

pub mod message;
pub mod symbol;
pub mod wire;

pub use message::{
    decode_act, decode_bind, decode_sequenced, encode_act, encode_bind, encode_sequenced,
    open_frame, seal_frame, Action, BindFields, Frame, HelloAlgorithm, HelloBody,
    InterfaceDescriptor, InterfaceType, MessageType, Payload, ProtectionHeader, Sealed,
    SealedKind, SessionId,
};
pub use symbol::{decode_frame, demodulate, encode_frame, modulate, Pulse, Symbol};
