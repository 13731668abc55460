//! Y-sync wire framing.
//!
//! Frames are y-protocols compatible so the session can talk to stock
//! Yjs collaboration servers.
//!
//! # Wire Format
//!
//! Messages use varUint encoding (7 bits per byte, MSB continuation):
//! - `varUint(0)`: Sync message
//!   - `varUint(0)`: SyncStep1, `varByteArray(state_vector)`
//!   - `varUint(1)`: SyncStep2, `varByteArray(update)`
//!   - `varUint(2)`: Update, `varByteArray(update)`
//! - `varUint(1)`: Awareness, `varByteArray(awareness_update)`
//! - `varUint(2)`: Auth
//!   - `varUint(0)`: Token, `varString(token)`
//!   - `varUint(1)`: PermissionDenied, `varString(reason)`
//!   - `varUint(2)`: Authenticated, `varString(scope)`
//!
//! An awareness update is `varUint(count)` followed by `count` entries of
//! `varUint(client_id) varUint(clock) varString(state_json)`. A state of
//! `null` means the participant left.

use crate::error::{CollabError, Result};

// ===========================================================================
// VarUint encoding/decoding
// ===========================================================================

/// Write a variable-length unsigned integer to a buffer.
fn write_var_uint(buf: &mut Vec<u8>, mut num: u64) {
    loop {
        let mut byte = (num & 0x7F) as u8;
        num >>= 7;
        if num > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if num == 0 {
            break;
        }
    }
}

fn write_var_byte_array(buf: &mut Vec<u8>, data: &[u8]) {
    write_var_uint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

fn write_var_string(buf: &mut Vec<u8>, s: &str) {
    write_var_byte_array(buf, s.as_bytes());
}

/// Cursor over an inbound frame. Every read failure is a malformed frame.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_var_uint(&mut self) -> Result<u64> {
        let mut num: u64 = 0;
        let mut shift = 0;
        while let Some(&byte) = self.data.get(self.pos) {
            self.pos += 1;
            num |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(num);
            }
            shift += 7;
            if shift > 63 {
                return Err(CollabError::MalformedFrame("varUint overflow".into()));
            }
        }
        Err(CollabError::MalformedFrame(format!(
            "truncated varUint at byte {}",
            self.pos
        )))
    }

    fn read_var_byte_array(&mut self) -> Result<&'a [u8]> {
        let len = self.read_var_uint()? as usize;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                CollabError::MalformedFrame(format!(
                    "byte array of {} bytes exceeds frame ({} remaining)",
                    len,
                    self.data.len() - self.pos
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_var_string(&mut self) -> Result<String> {
        let bytes = self.read_var_byte_array()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CollabError::MalformedFrame(format!("invalid utf-8 string: {}", e)))
    }
}

/// Message type bytes for the Y-sync protocol.
mod msg_type {
    pub const SYNC: u64 = 0;
    pub const AWARENESS: u64 = 1;
    pub const AUTH: u64 = 2;
}

/// Sync sub-message types.
mod sync_type {
    pub const STEP1: u64 = 0;
    pub const STEP2: u64 = 1;
    pub const UPDATE: u64 = 2;
}

/// Auth sub-message types.
mod auth_type {
    pub const TOKEN: u64 = 0;
    pub const PERMISSION_DENIED: u64 = 1;
    pub const AUTHENTICATED: u64 = 2;
}

/// Y-sync message types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// SyncStep1 contains a state vector
    SyncStep1(Vec<u8>),
    /// SyncStep2 contains missing updates
    SyncStep2(Vec<u8>),
    /// Update contains an incremental update
    Update(Vec<u8>),
}

/// Auth handshake messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMessage {
    /// Client credential token
    Token(String),
    /// Server refused the credentials
    PermissionDenied(String),
    /// Server accepted the credentials with the given scope
    Authenticated(String),
}

/// One participant record from an awareness update.
#[derive(Debug, Clone, PartialEq)]
pub struct AwarenessEntry {
    /// Yjs client id of the participant
    pub client_id: u64,
    /// Lamport clock of this state
    pub clock: u64,
    /// Raw JSON state; `null` once the participant left
    pub state: String,
}

impl AwarenessEntry {
    /// Whether this record announces a departure.
    pub fn is_removal(&self) -> bool {
        self.state.trim() == "null"
    }
}

/// Any frame the session can send or receive.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Document sync
    Sync(SyncMessage),
    /// Participant presence
    Awareness(Vec<AwarenessEntry>),
    /// Authentication handshake
    Auth(AuthMessage),
}

impl Message {
    /// Encode the message to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Message::Sync(sync) => {
                let (sub, payload) = match sync {
                    SyncMessage::SyncStep1(sv) => (sync_type::STEP1, sv),
                    SyncMessage::SyncStep2(update) => (sync_type::STEP2, update),
                    SyncMessage::Update(update) => (sync_type::UPDATE, update),
                };
                log::debug!(
                    "[Y-sync] Encoding sync type {}, {} bytes",
                    sub,
                    payload.len()
                );
                buf.reserve(payload.len() + 7);
                write_var_uint(&mut buf, msg_type::SYNC);
                write_var_uint(&mut buf, sub);
                write_var_byte_array(&mut buf, payload);
            }
            Message::Awareness(entries) => {
                let mut inner = Vec::new();
                write_var_uint(&mut inner, entries.len() as u64);
                for entry in entries {
                    write_var_uint(&mut inner, entry.client_id);
                    write_var_uint(&mut inner, entry.clock);
                    write_var_string(&mut inner, &entry.state);
                }
                write_var_uint(&mut buf, msg_type::AWARENESS);
                write_var_byte_array(&mut buf, &inner);
            }
            Message::Auth(auth) => {
                let (sub, text) = match auth {
                    AuthMessage::Token(t) => (auth_type::TOKEN, t),
                    AuthMessage::PermissionDenied(r) => (auth_type::PERMISSION_DENIED, r),
                    AuthMessage::Authenticated(s) => (auth_type::AUTHENTICATED, s),
                };
                write_var_uint(&mut buf, msg_type::AUTH);
                write_var_uint(&mut buf, sub);
                write_var_string(&mut buf, text);
            }
        }
        buf
    }

    /// Decode one frame.
    ///
    /// Returns `Ok(None)` for well-formed frames of a type this client does
    /// not handle. Truncated or garbled frames are
    /// [`CollabError::MalformedFrame`].
    pub fn decode(data: &[u8]) -> Result<Option<Self>> {
        if data.is_empty() {
            return Err(CollabError::MalformedFrame("empty frame".into()));
        }

        let mut reader = Reader::new(data);
        let kind = reader.read_var_uint()?;
        let message = match kind {
            msg_type::SYNC => {
                let sub = reader.read_var_uint()?;
                let payload = reader.read_var_byte_array()?.to_vec();
                let sync = match sub {
                    sync_type::STEP1 => SyncMessage::SyncStep1(payload),
                    sync_type::STEP2 => SyncMessage::SyncStep2(payload),
                    sync_type::UPDATE => SyncMessage::Update(payload),
                    other => {
                        return Err(CollabError::MalformedFrame(format!(
                            "unknown sync sub-type {}",
                            other
                        )));
                    }
                };
                Message::Sync(sync)
            }
            msg_type::AWARENESS => {
                let payload = reader.read_var_byte_array()?;
                Message::Awareness(decode_awareness(payload)?)
            }
            msg_type::AUTH => {
                let sub = reader.read_var_uint()?;
                let text = reader.read_var_string()?;
                Message::Auth(match sub {
                    auth_type::TOKEN => AuthMessage::Token(text),
                    auth_type::PERMISSION_DENIED => AuthMessage::PermissionDenied(text),
                    auth_type::AUTHENTICATED => AuthMessage::Authenticated(text),
                    other => {
                        return Err(CollabError::MalformedFrame(format!(
                            "unknown auth sub-type {}",
                            other
                        )));
                    }
                })
            }
            other => {
                log::debug!("[Y-sync] Ignoring message type {}", other);
                return Ok(None);
            }
        };
        Ok(Some(message))
    }
}

impl From<SyncMessage> for Message {
    fn from(msg: SyncMessage) -> Self {
        Message::Sync(msg)
    }
}

fn decode_awareness(payload: &[u8]) -> Result<Vec<AwarenessEntry>> {
    let mut reader = Reader::new(payload);
    let count = reader.read_var_uint()?;
    let mut entries = Vec::new();
    for _ in 0..count {
        let client_id = reader.read_var_uint()?;
        let clock = reader.read_var_uint()?;
        let state = reader.read_var_string()?;
        entries.push(AwarenessEntry {
            client_id,
            clock,
            state,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_uint_multi_byte() {
        let mut buf = Vec::new();
        write_var_uint(&mut buf, 300);
        assert_eq!(buf, vec![0xAC, 0x02]);
        assert_eq!(Reader::new(&buf).read_var_uint().unwrap(), 300);
    }

    #[test]
    fn test_sync_step1_layout() {
        let encoded = Message::Sync(SyncMessage::SyncStep1(vec![1, 2, 3])).encode();
        assert_eq!(encoded, vec![0, 0, 3, 1, 2, 3]);
    }

    #[test]
    fn test_decode_update() {
        let decoded = Message::decode(&[0, 2, 2, 9, 8]).unwrap();
        assert_eq!(
            decoded,
            Some(Message::Sync(SyncMessage::Update(vec![9, 8])))
        );
    }

    #[test]
    fn test_auth_frames() {
        let token = Message::Auth(AuthMessage::Token("alice:c:k:s".into()));
        assert_eq!(Message::decode(&token.encode()).unwrap(), Some(token));

        let denied = Message::Auth(AuthMessage::PermissionDenied("expired".into())).encode();
        assert!(matches!(
            Message::decode(&denied).unwrap(),
            Some(Message::Auth(AuthMessage::PermissionDenied(r))) if r == "expired"
        ));
    }

    #[test]
    fn test_awareness_entries() {
        let msg = Message::Awareness(vec![
            AwarenessEntry {
                client_id: 7,
                clock: 1,
                state: r#"{"user":{"name":"bob"}}"#.into(),
            },
            AwarenessEntry {
                client_id: 9,
                clock: 4,
                state: "null".into(),
            },
        ]);
        let Some(Message::Awareness(entries)) = Message::decode(&msg.encode()).unwrap() else {
            panic!("expected awareness");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].client_id, 7);
        assert!(!entries[0].is_removal());
        assert!(entries[1].is_removal());
    }

    #[test]
    fn test_truncated_frame_is_malformed() {
        // Claims 10 payload bytes, carries 2
        let err = Message::decode(&[0, 2, 10, 1, 2]).unwrap_err();
        assert!(matches!(err, CollabError::MalformedFrame(_)));

        assert!(matches!(
            Message::decode(&[]),
            Err(CollabError::MalformedFrame(_))
        ));
        assert!(matches!(
            Message::decode(&[0, 7, 0]),
            Err(CollabError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        // Query-awareness
        assert_eq!(Message::decode(&[3]).unwrap(), None);
    }
}
