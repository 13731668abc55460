//! Core types for the shared draft document.

use serde::{Deserialize, Serialize};

/// Origin of a CRDT update, used to distinguish local vs remote changes.
///
/// The tag travels with the yrs transaction that produced the update, so an
/// observer can tell its own writes apart from what arrived over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateOrigin {
    /// Live typing pushed from the local draft
    LocalEdit,

    /// Local content pushed during the first reconciliation after a sync
    InitialSync,

    /// Update received from a remote peer
    Remote,

    /// Update carrying no origin metadata
    Unattributed,
}

impl UpdateOrigin {
    /// Whether this origin denotes local authorship.
    pub fn is_local(&self) -> bool {
        matches!(self, UpdateOrigin::LocalEdit | UpdateOrigin::InitialSync)
    }

    /// The tag string stored as the yrs transaction origin.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOrigin::LocalEdit => "local-edit",
            UpdateOrigin::InitialSync => "initial-sync",
            UpdateOrigin::Remote => "remote",
            UpdateOrigin::Unattributed => "unattributed",
        }
    }

    /// Recover an origin from raw yrs origin bytes.
    ///
    /// Missing or unrecognised origins are `Unattributed`.
    pub fn from_origin_bytes(bytes: Option<&[u8]>) -> Self {
        bytes
            .and_then(|b| std::str::from_utf8(b).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(UpdateOrigin::Unattributed)
    }
}

impl std::fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UpdateOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local-edit" => Ok(UpdateOrigin::LocalEdit),
            "initial-sync" => Ok(UpdateOrigin::InitialSync),
            "remote" => Ok(UpdateOrigin::Remote),
            "unattributed" => Ok(UpdateOrigin::Unattributed),
            _ => Err(format!("Unknown update origin: {}", s)),
        }
    }
}

/// An encoded yrs v1 update plus the origin that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncUpdate {
    /// Serialized update bytes
    pub data: Vec<u8>,
    /// Who produced this update
    pub origin: UpdateOrigin,
}

impl SyncUpdate {
    /// Create a new update.
    pub fn new(data: Vec<u8>, origin: UpdateOrigin) -> Self {
        Self { data, origin }
    }
}

/// Identifies a collaborative document: the owner/permlink pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    /// Account that owns the draft
    pub owner: String,
    /// Permlink of the draft
    pub permlink: String,
}

impl DocumentKey {
    /// Create a document key.
    pub fn new(owner: impl Into<String>, permlink: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            permlink: permlink.into(),
        }
    }

    /// The `owner/permlink` room name used on the wire.
    pub fn room_name(&self) -> String {
        format!("{}/{}", self.owner, self.permlink)
    }
}

impl std::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.permlink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_origin_display() {
        assert_eq!(UpdateOrigin::LocalEdit.to_string(), "local-edit");
        assert_eq!(UpdateOrigin::InitialSync.to_string(), "initial-sync");
        assert_eq!(UpdateOrigin::Remote.to_string(), "remote");
        assert_eq!(UpdateOrigin::Unattributed.to_string(), "unattributed");
    }

    #[test]
    fn test_update_origin_from_str() {
        assert_eq!(
            "local-edit".parse::<UpdateOrigin>().unwrap(),
            UpdateOrigin::LocalEdit
        );
        assert_eq!(
            "initial-sync".parse::<UpdateOrigin>().unwrap(),
            UpdateOrigin::InitialSync
        );
        assert!("local".parse::<UpdateOrigin>().is_err());
    }

    #[test]
    fn test_origin_bytes_fallback() {
        assert_eq!(
            UpdateOrigin::from_origin_bytes(Some(b"remote")),
            UpdateOrigin::Remote
        );
        assert_eq!(
            UpdateOrigin::from_origin_bytes(None),
            UpdateOrigin::Unattributed
        );
        assert_eq!(
            UpdateOrigin::from_origin_bytes(Some(&[0xff, 0xfe])),
            UpdateOrigin::Unattributed
        );
        assert_eq!(
            UpdateOrigin::from_origin_bytes(Some(b"YjsProvider")),
            UpdateOrigin::Unattributed
        );
    }

    #[test]
    fn test_is_local() {
        assert!(UpdateOrigin::LocalEdit.is_local());
        assert!(UpdateOrigin::InitialSync.is_local());
        assert!(!UpdateOrigin::Remote.is_local());
        assert!(!UpdateOrigin::Unattributed.is_local());
    }

    #[test]
    fn test_document_key_room_name() {
        let key = DocumentKey::new("alice", "my-first-post");
        assert_eq!(key.room_name(), "alice/my-first-post");
        assert_eq!(key.to_string(), "alice/my-first-post");
    }

    #[test]
    fn test_update_origin_serde() {
        let json = serde_json::to_string(&UpdateOrigin::InitialSync).unwrap();
        assert_eq!(json, "\"initial-sync\"");
    }
}
