//! Replicated document and its wire protocol.
//!
//! - [`SharedDocumentHandle`] wraps a yrs `Doc` holding the draft's
//!   `title`, `body` and `tags` text containers.
//! - [`Message`] frames updates, awareness and auth for the network.
//! - [`UpdateOrigin`] tags every transaction so echoes can be recognised.

mod protocol;
mod shared_doc;
mod types;

pub use protocol::{AuthMessage, AwarenessEntry, Message, SyncMessage};
pub use shared_doc::{SharedDocumentHandle, SubscriptionId};
pub use types::{DocumentKey, SyncUpdate, UpdateOrigin};
