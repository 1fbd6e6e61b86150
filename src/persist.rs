//! Persistent-state records and storage backends.
//!
//! The receiver persists its session table; the transmitter persists its
//! identifier, pairing, and sequence counter. Records use the same manual
//! big-endian layout as the wire codec, behind a leading format-version
//! byte. [`FileStorage`] writes through a temporary file and an atomic
//! rename so a crash never yields a half-written record.

use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::codec::wire::{BitReader, BitWriter};
use crate::codec::{InterfaceType, SessionId};
use crate::core::constants::SESSION_KEY_SIZE;
use crate::core::DecodeError;
use crate::crypto::{Algorithm, Protection, SessionKey};
use crate::receiver::SessionRecord;

/// On-disk format version.
const STORAGE_VERSION: u8 = 1;

/// The transmitter's persistent state.
#[derive(Debug, Clone)]
pub struct TransmitterRecord {
    /// Persistent identifier sent (encrypted) in BIND; regenerated only by
    /// factory reset.
    pub transmitter_id: u64,
    /// The current pairing, if any.
    pub pairing: Option<Pairing>,
}

/// A transmitter's pairing with one receiver.
#[derive(Debug, Clone)]
pub struct Pairing {
    /// The session id adopted from HELLO.
    pub session_id: SessionId,
    /// Algorithm and key adopted from HELLO.
    pub protection: Protection,
    /// Sequence counter; the last value used, 0 when fresh.
    pub tx_seq: u32,
    /// True until BOUND confirms the receiver installed the session.
    pub unbound: bool,
    /// The interface set negotiated at pairing.
    pub interfaces: Vec<InterfaceType>,
}

impl Pairing {
    /// Advance the sequence counter, refusing to wrap.
    ///
    /// A wrapped counter would reuse nonces under the live key, so `None`
    /// means the pairing is exhausted and must be re-established.
    pub fn next_seq(&mut self) -> Option<u32> {
        let next = self.tx_seq.checked_add(1)?;
        self.tx_seq = next;
        Some(next)
    }
}

/// Receiver-side persistence of the session table.
pub trait SessionStorage {
    /// Load the stored table; empty when nothing was stored yet.
    fn load(&self) -> io::Result<Vec<SessionRecord>>;

    /// Replace the stored table.
    fn save(&self, sessions: &[SessionRecord]) -> io::Result<()>;
}

/// Transmitter-side persistence of the pairing record.
pub trait PairingStorage {
    /// Load the stored record; `None` on first boot.
    fn load(&self) -> io::Result<Option<TransmitterRecord>>;

    /// Replace the stored record.
    fn save(&self, record: &TransmitterRecord) -> io::Result<()>;
}

/// Serialize a session table.
pub fn encode_sessions(records: &[SessionRecord]) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_u8(STORAGE_VERSION);
    w.write_u8(records.len() as u8);
    for record in records {
        w.write_bytes(record.session_id.as_bytes());
        w.write_u8(record.protection.algorithm.id());
        w.write_bytes(record.protection.key.as_bytes());
        w.write_u32(record.last_accepted_seq_no);
    }
    w.finish()
}

/// Parse a session table.
pub fn decode_sessions(bytes: &[u8]) -> Result<Vec<SessionRecord>, DecodeError> {
    let mut r = BitReader::new(bytes);
    let version = r.read_u8()?;
    if version != STORAGE_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let count = r.read_u8()?;
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let session_id = SessionId::from_bytes(r.read_array()?);
        let protection = read_protection(&mut r)?;
        let last_accepted_seq_no = r.read_u32()?;
        records.push(SessionRecord {
            session_id,
            protection,
            last_accepted_seq_no,
        });
    }
    r.expect_end()?;
    Ok(records)
}

/// Serialize a transmitter record.
pub fn encode_transmitter(record: &TransmitterRecord) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_u8(STORAGE_VERSION);
    w.write_u64(record.transmitter_id);
    match &record.pairing {
        None => w.write_u8(0),
        Some(pairing) => {
            w.write_u8(1);
            w.write_bytes(pairing.session_id.as_bytes());
            w.write_u8(pairing.protection.algorithm.id());
            w.write_bytes(pairing.protection.key.as_bytes());
            w.write_u32(pairing.tx_seq);
            w.write_u8(u8::from(pairing.unbound));
            w.write_u8(pairing.interfaces.len() as u8);
            for iface in &pairing.interfaces {
                w.write_u8(*iface as u8);
            }
        }
    }
    w.finish()
}

/// Parse a transmitter record.
pub fn decode_transmitter(bytes: &[u8]) -> Result<TransmitterRecord, DecodeError> {
    let mut r = BitReader::new(bytes);
    let version = r.read_u8()?;
    if version != STORAGE_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let transmitter_id = r.read_u64()?;
    let pairing = match r.read_u8()? {
        0 => None,
        1 => {
            let session_id = SessionId::from_bytes(r.read_array()?);
            let protection = read_protection(&mut r)?;
            let tx_seq = r.read_u32()?;
            let unbound = r.read_u8()? != 0;
            let count = r.read_u8()?;
            let mut interfaces = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let value = r.read_u8()?;
                interfaces.push(InterfaceType::from_byte(value).ok_or(
                    DecodeError::UnknownTag {
                        union: "interface type",
                        value,
                    },
                )?);
            }
            Some(Pairing {
                session_id,
                protection,
                tx_seq,
                unbound,
                interfaces,
            })
        }
        value => {
            return Err(DecodeError::UnknownTag {
                union: "pairing flag",
                value,
            })
        }
    };
    r.expect_end()?;
    Ok(TransmitterRecord {
        transmitter_id,
        pairing,
    })
}

fn read_protection(r: &mut BitReader<'_>) -> Result<Protection, DecodeError> {
    let id = r.read_u8()?;
    let algorithm = Algorithm::from_id(id).ok_or(DecodeError::UnknownTag {
        union: "protection algorithm",
        value: id,
    })?;
    let key: [u8; SESSION_KEY_SIZE] = r.read_array()?;
    Ok(Protection::new(algorithm, SessionKey::from_bytes(key)))
}

fn invalid_data(error: DecodeError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, error)
}

/// Volatile storage for tests and RAM-only deployments.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    sessions: RefCell<Option<Vec<u8>>>,
    transmitter: RefCell<Option<Vec<u8>>>,
}

impl MemoryStorage {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self) -> io::Result<Vec<SessionRecord>> {
        match &*self.sessions.borrow() {
            Some(bytes) => decode_sessions(bytes).map_err(invalid_data),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, sessions: &[SessionRecord]) -> io::Result<()> {
        *self.sessions.borrow_mut() = Some(encode_sessions(sessions));
        Ok(())
    }
}

impl PairingStorage for MemoryStorage {
    fn load(&self) -> io::Result<Option<TransmitterRecord>> {
        match &*self.transmitter.borrow() {
            Some(bytes) => decode_transmitter(bytes).map(Some).map_err(invalid_data),
            None => Ok(None),
        }
    }

    fn save(&self, record: &TransmitterRecord) -> io::Result<()> {
        *self.transmitter.borrow_mut() = Some(encode_transmitter(record));
        Ok(())
    }
}

/// File-backed storage with atomic replacement.
///
/// Use one instance (one path) per role; the same file never holds both a
/// session table and a transmitter record.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Storage rooted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn replace(&self, bytes: &[u8]) -> io::Result<()> {
        let tmp = tmp_path(&self.path);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

impl SessionStorage for FileStorage {
    fn load(&self) -> io::Result<Vec<SessionRecord>> {
        match self.read()? {
            Some(bytes) => decode_sessions(&bytes).map_err(invalid_data),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, sessions: &[SessionRecord]) -> io::Result<()> {
        self.replace(&encode_sessions(sessions))
    }
}

impl PairingStorage for FileStorage {
    fn load(&self) -> io::Result<Option<TransmitterRecord>> {
        match self.read()? {
            Some(bytes) => decode_transmitter(&bytes).map(Some).map_err(invalid_data),
            None => Ok(None),
        }
    }

    fn save(&self, record: &TransmitterRecord) -> io::Result<()> {
        self.replace(&encode_transmitter(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sessions() -> Vec<SessionRecord> {
        vec![
            SessionRecord {
                session_id: SessionId::from_bytes([0x11, 0x22, 0x33, 0x44]),
                protection: Protection::new(
                    Algorithm::AesOcbTag64,
                    SessionKey::from_bytes([0xAB; 16]),
                ),
                last_accepted_seq_no: 42,
            },
            SessionRecord {
                session_id: SessionId::from_bytes([0x55, 0x66, 0x77, 0x88]),
                protection: Protection::new(
                    Algorithm::AesOcbTag128,
                    SessionKey::from_bytes([0xCD; 16]),
                ),
                last_accepted_seq_no: 7,
            },
        ]
    }

    fn sample_transmitter() -> TransmitterRecord {
        TransmitterRecord {
            transmitter_id: 0xA1A2A3A4A5A6A7A8,
            pairing: Some(Pairing {
                session_id: SessionId::from_bytes([0x11, 0x22, 0x33, 0x44]),
                protection: Protection::new(
                    Algorithm::AesOcbTag64,
                    SessionKey::from_bytes([0x01; 16]),
                ),
                tx_seq: 3,
                unbound: false,
                interfaces: vec![InterfaceType::ButtonAct],
            }),
        }
    }

    #[test]
    fn test_sessions_roundtrip() {
        let records = sample_sessions();
        let decoded = decode_sessions(&encode_sessions(&records)).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].session_id, records[0].session_id);
        assert_eq!(decoded[0].last_accepted_seq_no, 42);
        assert_eq!(decoded[1].protection.algorithm, Algorithm::AesOcbTag128);
        assert_eq!(decoded[1].protection.key, records[1].protection.key);
    }

    #[test]
    fn test_transmitter_roundtrip() {
        let record = sample_transmitter();
        let decoded = decode_transmitter(&encode_transmitter(&record)).unwrap();
        assert_eq!(decoded.transmitter_id, record.transmitter_id);
        let pairing = decoded.pairing.unwrap();
        assert_eq!(pairing.tx_seq, 3);
        assert!(!pairing.unbound);
        assert_eq!(pairing.interfaces, vec![InterfaceType::ButtonAct]);
    }

    #[test]
    fn test_unpaired_transmitter_roundtrip() {
        let record = TransmitterRecord {
            transmitter_id: 1,
            pairing: None,
        };
        let decoded = decode_transmitter(&encode_transmitter(&record)).unwrap();
        assert!(decoded.pairing.is_none());
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut bytes = encode_sessions(&sample_sessions());
        bytes[0] = 9;
        assert!(matches!(
            decode_sessions(&bytes),
            Err(DecodeError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert!(SessionStorage::load(&storage).unwrap().is_empty());
        assert!(PairingStorage::load(&storage).unwrap().is_none());

        SessionStorage::save(&storage, &sample_sessions()).unwrap();
        assert_eq!(SessionStorage::load(&storage).unwrap().len(), 2);

        PairingStorage::save(&storage, &sample_transmitter()).unwrap();
        assert_eq!(
            PairingStorage::load(&storage).unwrap().unwrap().transmitter_id,
            0xA1A2A3A4A5A6A7A8
        );
    }

    #[test]
    fn test_file_storage() {
        let dir = std::env::temp_dir().join(format!("openepo-persist-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let storage = FileStorage::new(dir.join("sessions.bin"));

        assert!(SessionStorage::load(&storage).unwrap().is_empty());
        SessionStorage::save(&storage, &sample_sessions()).unwrap();
        assert_eq!(SessionStorage::load(&storage).unwrap().len(), 2);

        fs::remove_dir_all(&dir).unwrap();
    }
}
