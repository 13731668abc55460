#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Debounced autosave checkpoints
pub mod autosave;

/// Draft/document bridge (push and pull)
pub mod bridge;

/// Collaboration controller (the event loop the UI talks to)
pub mod collab;

/// Configuration options
pub mod config;

/// Replicated document and wire protocol
pub mod crdt;

/// Local draft model and permlink derivation
pub mod draft;

/// Error (common error types)
pub mod error;

/// Collaborator presence and author list
pub mod presence;

/// Fatal-error detection and bounded recovery
pub mod recovery;

pub mod timer;

/// Network transports and the sync session
pub mod transport;

pub use collab::{CollabController, ConnectionStatus, CoreEvent, SaveReport};
pub use config::CollabConfig;
pub use draft::{DraftChanges, DraftField, LocalDraft};
pub use error::{CollabError, Result};
