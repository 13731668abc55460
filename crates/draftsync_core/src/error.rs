use serde::Serialize;
use thiserror::Error;

use crate::recovery::FatalSignature;

/// Unified error type for draftsync operations
#[derive(Debug, Error)]
pub enum CollabError {
    // CRDT errors
    #[error("CRDT error: {0}")]
    Crdt(String),

    #[error("Malformed update frame: {0}")]
    MalformedFrame(String),

    #[error("Mismatched transaction: {0}")]
    MismatchedTransaction(String),

    #[error("Shared document has been destroyed")]
    DocumentDestroyed,

    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Collaboration disabled after recovery failure")]
    CollaborationDisabled,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for draftsync operations
pub type Result<T> = std::result::Result<T, CollabError>;

impl CollabError {
    /// The protocol-fatal signature this error corresponds to, if any.
    ///
    /// Only these two kinds are routed to the recovery supervisor; everything
    /// else is reported as a connection status.
    pub fn fatal_signature(&self) -> Option<FatalSignature> {
        match self {
            CollabError::MalformedFrame(_) => Some(FatalSignature::MalformedUpdateFrame),
            CollabError::MismatchedTransaction(_) => Some(FatalSignature::MismatchedTransaction),
            _ => None,
        }
    }
}

/// A serializable representation of CollabError for IPC
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
}

impl From<&CollabError> for SerializableError {
    fn from(err: &CollabError) -> Self {
        let kind = match err {
            CollabError::Crdt(_) => "Crdt",
            CollabError::MalformedFrame(_) => "MalformedFrame",
            CollabError::MismatchedTransaction(_) => "MismatchedTransaction",
            CollabError::DocumentDestroyed => "DocumentDestroyed",
            CollabError::Transport(_) => "Transport",
            CollabError::InvalidEndpoint(_) => "InvalidEndpoint",
            CollabError::SessionClosed => "SessionClosed",
            CollabError::CollaborationDisabled => "CollaborationDisabled",
            CollabError::Io(_) => "Io",
            CollabError::ConfigParse(_) => "ConfigParse",
            CollabError::ConfigSerialize(_) => "ConfigSerialize",
            CollabError::NoConfigDir => "NoConfigDir",
            CollabError::Json(_) => "Json",
        }
        .to_string();

        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<CollabError> for SerializableError {
    fn from(err: CollabError) -> Self {
        SerializableError::from(&err)
    }
}
