//! The version-1 message catalog.
//!
//! Every frame starts with `version(4) | type(4) | session_id(32)`. All
//! types except HELLO follow with the protection union (one discriminant
//! byte plus the variant's nonce) and end with the opaque encrypted part;
//! HELLO is plaintext-only. The encrypted part, once opened, starts with the
//! 32-bit sequence number and continues with the type-specific body.
//!
//! Unions come in two flavours: *implicit* ones (message type, protection
//! algorithm, ACT interface) whose unknown discriminants are decode errors,
//! and *extensible* ones (HELLO interface descriptors) whose elements carry
//! their own length so unknown discriminants are skipped.

use super::wire::{BitReader, BitWriter};
use crate::core::constants::{
    MSG_TYPE_ACT, MSG_TYPE_BIND, MSG_TYPE_BOUND, MSG_TYPE_CONFIGURE, MSG_TYPE_HELLO,
    MSG_TYPE_UNBIND, PROTOCOL_VERSION, SESSION_ID_SIZE, SESSION_KEY_SIZE,
};
use crate::core::{CryptoError, DecodeError, RandomSource};
use crate::crypto::{self, Algorithm, SessionKey};

/// Ephemeral 32-bit pairing identifier, chosen uniformly at pairing.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub [u8; SESSION_ID_SIZE]);

impl SessionId {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; SESSION_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Draw a fresh id from the random source.
    pub fn random(random: &mut dyn RandomSource) -> Self {
        let mut id = [0u8; SESSION_ID_SIZE];
        random.fill_bytes(&mut id);
        Self(id)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.0
    }
}

impl AsRef<[u8]> for SessionId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", u32::from_be_bytes(self.0))
    }
}

impl std::fmt::Debug for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionId({self})")
    }
}

/// Message types of the version-1 catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Private medium, receiver to transmitter, plaintext only.
    Hello = MSG_TYPE_HELLO,
    /// Private medium, receiver to transmitter, encrypted.
    Bound = MSG_TYPE_BOUND,
    /// Public medium, transmitter to receiver.
    Bind = MSG_TYPE_BIND,
    /// Public medium, encrypted, empty body.
    Unbind = MSG_TYPE_UNBIND,
    /// Public medium, encrypted, empty bodies.
    Configure = MSG_TYPE_CONFIGURE,
    /// Public medium, encrypted.
    Act = MSG_TYPE_ACT,
}

impl MessageType {
    /// Parse the type nibble.
    pub fn from_nibble(value: u8) -> Option<Self> {
        match value {
            MSG_TYPE_HELLO => Some(Self::Hello),
            MSG_TYPE_BOUND => Some(Self::Bound),
            MSG_TYPE_BIND => Some(Self::Bind),
            MSG_TYPE_UNBIND => Some(Self::Unbind),
            MSG_TYPE_CONFIGURE => Some(Self::Configure),
            MSG_TYPE_ACT => Some(Self::Act),
            _ => None,
        }
    }
}

/// Registered host-interface types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InterfaceType {
    /// A momentary button press.
    ButtonAct = 1,
}

impl InterfaceType {
    /// Parse an interface type byte.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::ButtonAct),
            _ => None,
        }
    }
}

/// An advertised interface: type plus extensible parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    /// The interface type.
    pub kind: InterfaceType,
    /// Type-specific parameters; empty for `ButtonAct`.
    pub params: Vec<u8>,
}

impl InterfaceDescriptor {
    /// The parameterless button interface.
    pub fn button_act() -> Self {
        Self {
            kind: InterfaceType::ButtonAct,
            params: Vec::new(),
        }
    }
}

/// A host-initiated action carried inside an ACT frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Which interface the action targets.
    pub interface: InterfaceType,
    /// Interface-specific parameters; empty for `ButtonAct`.
    pub params: Vec<u8>,
}

impl Action {
    /// A bare button press.
    pub fn button_act() -> Self {
        Self {
            interface: InterfaceType::ButtonAct,
            params: Vec::new(),
        }
    }
}

/// The protection union of the unencrypted header: algorithm plus nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionHeader {
    /// Tag-128 variant with its 8-byte nonce.
    AesOcbTag128([u8; 8]),
    /// Tag-64 variant with its 4-byte nonce.
    AesOcbTag64([u8; 4]),
}

impl ProtectionHeader {
    /// The algorithm this header names.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::AesOcbTag128(_) => Algorithm::AesOcbTag128,
            Self::AesOcbTag64(_) => Algorithm::AesOcbTag64,
        }
    }

    /// The nonce bytes.
    pub fn nonce(&self) -> &[u8] {
        match self {
            Self::AesOcbTag128(nonce) => nonce,
            Self::AesOcbTag64(nonce) => nonce,
        }
    }

    /// Build a counter nonce: the counter big-endian, zero-extended to the
    /// variant's width.
    pub fn from_counter(algorithm: Algorithm, counter: u32) -> Self {
        match algorithm {
            Algorithm::AesOcbTag128 => Self::AesOcbTag128(u64::from(counter).to_be_bytes()),
            Algorithm::AesOcbTag64 => Self::AesOcbTag64(counter.to_be_bytes()),
        }
    }

    /// Build a random nonce of the variant's width.
    pub fn random(algorithm: Algorithm, random: &mut dyn RandomSource) -> Self {
        match algorithm {
            Algorithm::AesOcbTag128 => {
                let mut nonce = [0u8; 8];
                random.fill_bytes(&mut nonce);
                Self::AesOcbTag128(nonce)
            }
            Algorithm::AesOcbTag64 => {
                let mut nonce = [0u8; 4];
                random.fill_bytes(&mut nonce);
                Self::AesOcbTag64(nonce)
            }
        }
    }

    fn write(&self, w: &mut BitWriter) {
        w.write_u8(self.algorithm().id());
        w.write_bytes(self.nonce());
    }

    fn read(r: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        let id = r.read_u8()?;
        match Algorithm::from_id(id) {
            Some(Algorithm::AesOcbTag128) => Ok(Self::AesOcbTag128(r.read_array()?)),
            Some(Algorithm::AesOcbTag64) => Ok(Self::AesOcbTag64(r.read_array()?)),
            None => Err(DecodeError::UnknownTag {
                union: "protection algorithm",
                value: id,
            }),
        }
    }
}

/// One HELLO candidate: a registered algorithm id with its minted key.
#[derive(Clone, PartialEq, Eq)]
pub struct HelloAlgorithm {
    /// Registered algorithm id; unknown ids are filtered by the chooser.
    pub algorithm_id: u8,
    /// The candidate session key, plaintext on the trusted private medium.
    pub key: [u8; SESSION_KEY_SIZE],
}

impl HelloAlgorithm {
    /// The registered algorithm, if this engine speaks it.
    pub fn algorithm(&self) -> Option<Algorithm> {
        Algorithm::from_id(self.algorithm_id)
    }
}

impl std::fmt::Debug for HelloAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The key stays out of logs.
        write!(f, "HelloAlgorithm({})", self.algorithm_id)
    }
}

/// HELLO body: candidate algorithms and advertised interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HelloBody {
    /// Candidate protections, preference-ordered, each with key material.
    pub algorithms: Vec<HelloAlgorithm>,
    /// Interfaces the receiver will accept ACTs for.
    pub interfaces: Vec<InterfaceDescriptor>,
}

impl HelloBody {
    fn write(&self, w: &mut BitWriter) {
        w.write_u8(self.algorithms.len() as u8);
        for alg in &self.algorithms {
            w.write_u8(alg.algorithm_id);
            w.write_bytes(&alg.key);
        }
        w.write_u8(self.interfaces.len() as u8);
        for iface in &self.interfaces {
            w.write_u8(iface.kind as u8);
            w.write_u8(iface.params.len() as u8);
            w.write_bytes(&iface.params);
        }
    }

    fn read(r: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        let algorithm_count = r.read_u8()?;
        let mut algorithms = Vec::with_capacity(algorithm_count as usize);
        for _ in 0..algorithm_count {
            algorithms.push(HelloAlgorithm {
                algorithm_id: r.read_u8()?,
                key: r.read_array()?,
            });
        }
        let interface_count = r.read_u8()?;
        let mut interfaces = Vec::new();
        for _ in 0..interface_count {
            let kind = r.read_u8()?;
            let len = r.read_u8()? as usize;
            match InterfaceType::from_byte(kind) {
                Some(kind) => interfaces.push(InterfaceDescriptor {
                    kind,
                    params: r.read_bytes(len)?,
                }),
                // Extensible union: hop over the unknown element.
                None => r.skip_bytes(len)?,
            }
        }
        Ok(Self {
            algorithms,
            interfaces,
        })
    }
}

/// The protection header together with the opaque encrypted part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Algorithm and nonce from the unencrypted header.
    pub protection: ProtectionHeader,
    /// `ciphertext || tag`.
    pub ciphertext: Vec<u8>,
}

impl Sealed {
    /// A sealed part awaiting its ciphertext.
    fn pending(protection: ProtectionHeader) -> Self {
        Self {
            protection,
            ciphertext: Vec::new(),
        }
    }
}

/// Type-specific frame content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// HELLO: plaintext candidates, no encrypted part.
    Hello(HelloBody),
    /// BOUND: empty bodies, encrypted.
    Bound(Sealed),
    /// BIND: plaintext algorithm choice plus encrypted identity.
    Bind {
        /// The algorithm the transmitter adopted, restated in plaintext.
        algorithm_id: u8,
        /// The encrypted part.
        sealed: Sealed,
    },
    /// UNBIND: empty body, encrypted.
    Unbind(Sealed),
    /// CONFIGURE: empty bodies, still authenticated.
    Configure(Sealed),
    /// ACT: encrypted interface invocation.
    Act(Sealed),
}

/// A whole frame: the common header plus the type-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The plaintext session id used for routing.
    pub session_id: SessionId,
    /// Type-specific content.
    pub payload: Payload,
}

impl Frame {
    /// The catalog type of this frame.
    pub fn message_type(&self) -> MessageType {
        match &self.payload {
            Payload::Hello(_) => MessageType::Hello,
            Payload::Bound(_) => MessageType::Bound,
            Payload::Bind { .. } => MessageType::Bind,
            Payload::Unbind(_) => MessageType::Unbind,
            Payload::Configure(_) => MessageType::Configure,
            Payload::Act(_) => MessageType::Act,
        }
    }

    /// The encrypted part, for every type that has one.
    pub fn sealed(&self) -> Option<&Sealed> {
        match &self.payload {
            Payload::Hello(_) => None,
            Payload::Bound(sealed)
            | Payload::Unbind(sealed)
            | Payload::Configure(sealed)
            | Payload::Act(sealed) => Some(sealed),
            Payload::Bind { sealed, .. } => Some(sealed),
        }
    }

    fn sealed_mut(&mut self) -> Option<&mut Sealed> {
        match &mut self.payload {
            Payload::Hello(_) => None,
            Payload::Bound(sealed)
            | Payload::Unbind(sealed)
            | Payload::Configure(sealed)
            | Payload::Act(sealed) => Some(sealed),
            Payload::Bind { sealed, .. } => Some(sealed),
        }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(u32::from(PROTOCOL_VERSION), 4);
        w.write_bits(u32::from(self.message_type() as u8), 4);
        w.write_bytes(self.session_id.as_bytes());
        match &self.payload {
            Payload::Hello(body) => body.write(&mut w),
            Payload::Bound(sealed)
            | Payload::Unbind(sealed)
            | Payload::Configure(sealed)
            | Payload::Act(sealed) => {
                sealed.protection.write(&mut w);
                w.write_bytes(&sealed.ciphertext);
            }
            Payload::Bind {
                algorithm_id,
                sealed,
            } => {
                sealed.protection.write(&mut w);
                w.write_u8(*algorithm_id);
                w.write_bytes(&sealed.ciphertext);
            }
        }
        w.finish()
    }

    /// Parse wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = BitReader::new(bytes);
        let version = r.read_bits(4)? as u8;
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let type_nibble = r.read_bits(4)? as u8;
        let session_id = SessionId::from_bytes(r.read_array()?);
        let message_type =
            MessageType::from_nibble(type_nibble).ok_or(DecodeError::UnknownTag {
                union: "message type",
                value: type_nibble,
            })?;

        let payload = match message_type {
            MessageType::Hello => {
                let body = HelloBody::read(&mut r)?;
                r.expect_end()?;
                Payload::Hello(body)
            }
            MessageType::Bound => Payload::Bound(Self::read_sealed(&mut r)?),
            MessageType::Bind => {
                let protection = ProtectionHeader::read(&mut r)?;
                let algorithm_id = r.read_u8()?;
                Payload::Bind {
                    algorithm_id,
                    sealed: Sealed {
                        protection,
                        ciphertext: r.read_rest(),
                    },
                }
            }
            MessageType::Unbind => Payload::Unbind(Self::read_sealed(&mut r)?),
            MessageType::Configure => Payload::Configure(Self::read_sealed(&mut r)?),
            MessageType::Act => Payload::Act(Self::read_sealed(&mut r)?),
        };
        Ok(Self {
            session_id,
            payload,
        })
    }

    fn read_sealed(r: &mut BitReader<'_>) -> Result<Sealed, DecodeError> {
        let protection = ProtectionHeader::read(r)?;
        Ok(Sealed {
            protection,
            ciphertext: r.read_rest(),
        })
    }

    /// The AEAD associated data: the serialized unencrypted part with the
    /// nonce treated as zero-length.
    pub fn associated_data(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(u32::from(PROTOCOL_VERSION), 4);
        w.write_bits(u32::from(self.message_type() as u8), 4);
        w.write_bytes(self.session_id.as_bytes());
        match &self.payload {
            Payload::Hello(_) => {}
            Payload::Bound(sealed)
            | Payload::Unbind(sealed)
            | Payload::Configure(sealed)
            | Payload::Act(sealed) => w.write_u8(sealed.protection.algorithm().id()),
            Payload::Bind {
                algorithm_id,
                sealed,
            } => {
                w.write_u8(sealed.protection.algorithm().id());
                w.write_u8(*algorithm_id);
            }
        }
        w.finish()
    }
}

/// Which sealed frame to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealedKind {
    /// BOUND (private medium).
    Bound,
    /// BIND with its plaintext algorithm restatement.
    Bind {
        /// The adopted algorithm id.
        algorithm_id: u8,
    },
    /// UNBIND.
    Unbind,
    /// CONFIGURE.
    Configure,
    /// ACT.
    Act,
}

/// Build and encrypt a sealed frame in one step.
///
/// The plaintext must already carry the encrypted header (sequence number)
/// in front of the inner body; see [`encode_sequenced`] and friends.
pub fn seal_frame(
    session_id: SessionId,
    kind: SealedKind,
    protection: ProtectionHeader,
    key: &SessionKey,
    plaintext: &[u8],
) -> Result<Frame, CryptoError> {
    let payload = match kind {
        SealedKind::Bound => Payload::Bound(Sealed::pending(protection)),
        SealedKind::Bind { algorithm_id } => Payload::Bind {
            algorithm_id,
            sealed: Sealed::pending(protection),
        },
        SealedKind::Unbind => Payload::Unbind(Sealed::pending(protection)),
        SealedKind::Configure => Payload::Configure(Sealed::pending(protection)),
        SealedKind::Act => Payload::Act(Sealed::pending(protection)),
    };
    let mut frame = Frame {
        session_id,
        payload,
    };
    let aad = frame.associated_data();
    let ciphertext = crypto::seal(
        key,
        protection.algorithm(),
        protection.nonce(),
        &aad,
        plaintext,
    )?;
    if let Some(sealed) = frame.sealed_mut() {
        sealed.ciphertext = ciphertext;
    }
    Ok(frame)
}

/// Decrypt a frame's sealed part, returning the inner plaintext.
pub fn open_frame(frame: &Frame, key: &SessionKey) -> Result<Vec<u8>, CryptoError> {
    let sealed = frame.sealed().ok_or(CryptoError::AuthFailure)?;
    crypto::open(
        key,
        sealed.protection.algorithm(),
        sealed.protection.nonce(),
        &frame.associated_data(),
        &sealed.ciphertext,
    )
}

/// Encode the encrypted part of an empty-bodied message: the sequence alone.
pub fn encode_sequenced(sequence: u32) -> Vec<u8> {
    sequence.to_be_bytes().to_vec()
}

/// Decode the encrypted part of an empty-bodied message.
pub fn decode_sequenced(plaintext: &[u8]) -> Result<u32, DecodeError> {
    let mut r = BitReader::new(plaintext);
    let sequence = r.read_u32()?;
    r.expect_end()?;
    Ok(sequence)
}

/// The inner body of a BIND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindFields {
    /// The transmitter's persistent identifier, never sent in plaintext.
    pub transmitter_id: u64,
    /// The negotiated interface set.
    pub interface_types: Vec<InterfaceType>,
}

/// Encode the encrypted part of a BIND.
pub fn encode_bind(sequence: u32, fields: &BindFields) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_u32(sequence);
    w.write_u64(fields.transmitter_id);
    w.write_u8(fields.interface_types.len() as u8);
    for iface in &fields.interface_types {
        w.write_u8(*iface as u8);
    }
    w.finish()
}

/// Decode the encrypted part of a BIND.
pub fn decode_bind(plaintext: &[u8]) -> Result<(u32, BindFields), DecodeError> {
    let mut r = BitReader::new(plaintext);
    let sequence = r.read_u32()?;
    let transmitter_id = r.read_u64()?;
    let count = r.read_u8()?;
    let mut interface_types = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let value = r.read_u8()?;
        interface_types.push(InterfaceType::from_byte(value).ok_or(
            DecodeError::UnknownTag {
                union: "interface type",
                value,
            },
        )?);
    }
    r.expect_end()?;
    Ok((
        sequence,
        BindFields {
            transmitter_id,
            interface_types,
        },
    ))
}

/// Encode the encrypted part of an ACT.
pub fn encode_act(sequence: u32, action: &Action) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_u32(sequence);
    w.write_u8(action.interface as u8);
    w.write_u8(action.params.len() as u8);
    w.write_bytes(&action.params);
    w.finish()
}

/// Decode the encrypted part of an ACT.
pub fn decode_act(plaintext: &[u8]) -> Result<(u32, Action), DecodeError> {
    let mut r = BitReader::new(plaintext);
    let sequence = r.read_u32()?;
    let value = r.read_u8()?;
    let interface = InterfaceType::from_byte(value).ok_or(DecodeError::UnknownTag {
        union: "interface type",
        value,
    })?;
    let len = r.read_u8()? as usize;
    let params = r.read_bytes(len)?;
    r.expect_end()?;
    Ok((sequence, Action { interface, params }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> SessionId {
        SessionId::from_bytes([0x11, 0x22, 0x33, 0x44])
    }

    fn key() -> SessionKey {
        SessionKey::from_bytes([0x42; SESSION_KEY_SIZE])
    }

    #[test]
    fn test_hello_exact_bytes() {
        let frame = Frame {
            session_id: sid(),
            payload: Payload::Hello(HelloBody {
                algorithms: vec![HelloAlgorithm {
                    algorithm_id: 22,
                    key: [0xAA; 16],
                }],
                interfaces: vec![InterfaceDescriptor::button_act()],
            }),
        };
        let bytes = frame.encode();
        let mut expected = vec![0x11, 0x11, 0x22, 0x33, 0x44, 0x01, 0x16];
        expected.extend_from_slice(&[0xAA; 16]);
        expected.extend_from_slice(&[0x01, 0x01, 0x00]);
        assert_eq!(bytes, expected);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_roundtrip_every_type() {
        let sealed = Sealed {
            protection: ProtectionHeader::AesOcbTag64([0, 0, 0, 1]),
            ciphertext: vec![0xDE, 0xAD, 0xBE, 0xEF],
        };
        let frames = [
            Frame {
                session_id: sid(),
                payload: Payload::Hello(HelloBody::default()),
            },
            Frame {
                session_id: sid(),
                payload: Payload::Bound(sealed.clone()),
            },
            Frame {
                session_id: sid(),
                payload: Payload::Bind {
                    algorithm_id: 22,
                    sealed: Sealed {
                        protection: ProtectionHeader::AesOcbTag128([1, 2, 3, 4, 5, 6, 7, 8]),
                        ciphertext: vec![0x55; 20],
                    },
                },
            },
            Frame {
                session_id: sid(),
                payload: Payload::Unbind(sealed.clone()),
            },
            Frame {
                session_id: sid(),
                payload: Payload::Configure(sealed.clone()),
            },
            Frame {
                session_id: sid(),
                payload: Payload::Act(sealed),
            },
        ];
        for frame in frames {
            assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
        }
    }

    #[test]
    fn test_version_enforced() {
        let mut bytes = Frame {
            session_id: sid(),
            payload: Payload::Hello(HelloBody::default()),
        }
        .encode();
        bytes[0] = (2 << 4) | (bytes[0] & 0x0F);
        assert_eq!(
            Frame::decode(&bytes),
            Err(DecodeError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        // Type nibble 7 is unassigned in version 1.
        let bytes = [0x17, 0x11, 0x22, 0x33, 0x44];
        assert_eq!(
            Frame::decode(&bytes),
            Err(DecodeError::UnknownTag {
                union: "message type",
                value: 7,
            })
        );
    }

    #[test]
    fn test_unknown_protection_algorithm_rejected() {
        // An ACT whose protection union names the private-use id 200.
        let bytes = [0x18, 0x11, 0x22, 0x33, 0x44, 200, 0, 0, 0, 0];
        assert_eq!(
            Frame::decode(&bytes),
            Err(DecodeError::UnknownTag {
                union: "protection algorithm",
                value: 200,
            })
        );
    }

    #[test]
    fn test_unknown_interface_descriptor_skipped() {
        // Interface list: [unknown type 9 with 3 param bytes, BUTTON_ACT].
        let body = [
            0x00, // no algorithms
            0x02, // two interface elements
            0x09, 0x03, 0xAA, 0xBB, 0xCC, // unknown, skipped by length
            0x01, 0x00, // BUTTON_ACT, no params
        ];
        let mut bytes = vec![0x11, 0x11, 0x22, 0x33, 0x44];
        bytes.extend_from_slice(&body);
        let frame = Frame::decode(&bytes).unwrap();
        match frame.payload {
            Payload::Hello(hello) => {
                assert_eq!(hello.interfaces, vec![InterfaceDescriptor::button_act()]);
            }
            other => panic!("expected HELLO, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_skip_length_rejected() {
        let bytes = [
            0x11, 0x11, 0x22, 0x33, 0x44, // header
            0x00, // no algorithms
            0x01, // one interface
            0x09, 0x10, 0xAA, // claims 16 param bytes, has 1
        ];
        assert_eq!(Frame::decode(&bytes), Err(DecodeError::BadLength));
    }

    #[test]
    fn test_hello_trailing_bytes_rejected() {
        let mut bytes = Frame {
            session_id: sid(),
            payload: Payload::Hello(HelloBody::default()),
        }
        .encode();
        bytes.push(0xFF);
        assert_eq!(Frame::decode(&bytes), Err(DecodeError::TrailingBytes));
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert_eq!(Frame::decode(&[0x11, 0x22]), Err(DecodeError::Truncated));
        assert_eq!(Frame::decode(&[]), Err(DecodeError::Truncated));
    }

    #[test]
    fn test_associated_data_splices_nonce() {
        let frame = Frame {
            session_id: sid(),
            payload: Payload::Bind {
                algorithm_id: 22,
                sealed: Sealed {
                    protection: ProtectionHeader::AesOcbTag64([9, 9, 9, 9]),
                    ciphertext: vec![1, 2, 3],
                },
            },
        };
        // version|type, session id, algorithm discriminant, plaintext body.
        assert_eq!(
            frame.associated_data(),
            vec![0x13, 0x11, 0x22, 0x33, 0x44, 22, 22]
        );
    }

    #[test]
    fn test_seal_open_frame() {
        let plaintext = encode_act(7, &Action::button_act());
        let frame = seal_frame(
            sid(),
            SealedKind::Act,
            ProtectionHeader::from_counter(Algorithm::AesOcbTag64, 7),
            &key(),
            &plaintext,
        )
        .unwrap();
        let opened = open_frame(&frame, &key()).unwrap();
        let (sequence, action) = decode_act(&opened).unwrap();
        assert_eq!(sequence, 7);
        assert_eq!(action, Action::button_act());

        // A flipped ciphertext byte must not authenticate.
        let mut tampered = frame;
        if let Payload::Act(sealed) = &mut tampered.payload {
            sealed.ciphertext[0] ^= 0x80;
        }
        assert!(open_frame(&tampered, &key()).is_err());
    }

    #[test]
    fn test_counter_nonce_layout() {
        assert_eq!(
            ProtectionHeader::from_counter(Algorithm::AesOcbTag64, 1).nonce(),
            &[0, 0, 0, 1]
        );
        assert_eq!(
            ProtectionHeader::from_counter(Algorithm::AesOcbTag128, 0x0102).nonce(),
            &[0, 0, 0, 0, 0, 0, 1, 2]
        );
    }

    #[test]
    fn test_bind_fields_roundtrip() {
        let fields = BindFields {
            transmitter_id: 0xA1A2A3A4A5A6A7A8,
            interface_types: vec![InterfaceType::ButtonAct],
        };
        let bytes = encode_bind(1, &fields);
        assert_eq!(decode_bind(&bytes).unwrap(), (1, fields));
    }

    #[test]
    fn test_bind_unknown_interface_rejected() {
        let bytes = [
            0, 0, 0, 1, // sequence
            0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8, // transmitter id
            1, 0x07, // one interface, unknown type
        ];
        assert_eq!(
            decode_bind(&bytes),
            Err(DecodeError::UnknownTag {
                union: "interface type",
                value: 7,
            })
        );
    }

    #[test]
    fn test_sequenced_roundtrip() {
        let bytes = encode_sequenced(0xDEADBEEF);
        assert_eq!(decode_sequenced(&bytes).unwrap(), 0xDEADBEEF);
        assert_eq!(decode_sequenced(&[1, 2]), Err(DecodeError::Truncated));
        assert_eq!(
            decode_sequenced(&[1, 2, 3, 4, 5]),
            Err(DecodeError::TrailingBytes)
        );
    }
}
