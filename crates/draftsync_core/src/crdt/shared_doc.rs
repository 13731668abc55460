//! The replicated draft document.
//!
//! `SharedDocumentHandle` owns one yrs `Doc` with three text containers
//! (`title`, `body`, `tags`) and tags every transaction it opens with an
//! [`UpdateOrigin`], so subscribers receive [`SyncUpdate`]s that say who
//! produced them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use yrs::{
    Doc, GetString, ReadTxn, Text, TextRef, Transact, Update, updates::decoder::Decode,
    updates::encoder::Encode,
};

use super::types::{DocumentKey, SyncUpdate, UpdateOrigin};
use crate::draft::DraftField;
use crate::error::{CollabError, Result};

/// Identifier returned by [`SharedDocumentHandle::subscribe`].
pub type SubscriptionId = u64;

/// Owner of a replicated draft document and its named text fields.
///
/// A handle is single-use: once [`destroy`](Self::destroy)ed every operation
/// returns [`CollabError::DocumentDestroyed`] and no subscriber fires again.
pub struct SharedDocumentHandle {
    key: DocumentKey,
    doc: Doc,
    title: TextRef,
    body: TextRef,
    tags: TextRef,
    subscriptions: Mutex<HashMap<SubscriptionId, yrs::Subscription>>,
    next_subscription: AtomicU64,
    destroyed: AtomicBool,
}

impl SharedDocumentHandle {
    /// Create a new empty document for `key`.
    pub fn create(key: DocumentKey) -> Self {
        let doc = Doc::new();
        let title = doc.get_or_insert_text(DraftField::Title.as_str());
        let body = doc.get_or_insert_text(DraftField::Body.as_str());
        let tags = doc.get_or_insert_text(DraftField::Tags.as_str());

        log::debug!("[SharedDoc] Created document {}", key);

        Self {
            key,
            doc,
            title,
            body,
            tags,
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            destroyed: AtomicBool::new(false),
        }
    }

    /// The document key this handle was created for.
    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// Yjs client id of this replica, used as the awareness client id.
    pub fn client_id(&self) -> u64 {
        self.doc.client_id()
    }

    fn text_ref(&self, field: DraftField) -> &TextRef {
        match field {
            DraftField::Title => &self.title,
            DraftField::Body => &self.body,
            DraftField::Tags => &self.tags,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            Err(CollabError::DocumentDestroyed)
        } else {
            Ok(())
        }
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    // ==================== Text Operations ====================

    /// Current string value of a field.
    ///
    /// Must not be called from inside a subscriber callback.
    pub fn get_text(&self, field: DraftField) -> Result<String> {
        self.ensure_live()?;
        let txn = self.doc.transact();
        Ok(self.text_ref(field).get_string(&txn))
    }

    /// Replace the whole content of `field` with `value`.
    ///
    /// Delete and insert happen in one transaction tagged with `origin`, so
    /// replicas never observe a half-applied replacement. Writing the value
    /// the field already holds is a no-op and emits no update.
    pub fn apply_local_edit(
        &self,
        field: DraftField,
        value: &str,
        origin: UpdateOrigin,
    ) -> Result<bool> {
        self.ensure_live()?;
        let text = self.text_ref(field);

        let mut txn = self.doc.transact_mut_with(origin.as_str());
        if text.get_string(&txn) == value {
            return Ok(false);
        }

        let len = text.len(&txn);
        if len > 0 {
            text.remove_range(&mut txn, 0, len);
        }
        if !value.is_empty() {
            text.insert(&mut txn, 0, value);
        }

        log::debug!(
            "[SharedDoc] {} replaced {} ({} bytes, origin {})",
            self.key,
            field,
            value.len(),
            origin
        );
        Ok(true)
    }

    /// Apply an encoded update received from elsewhere.
    ///
    /// A payload that does not decode is a [`CollabError::MalformedFrame`];
    /// one that decodes but cannot be integrated is a
    /// [`CollabError::MismatchedTransaction`].
    pub fn apply_remote_update(&self, update: &[u8], origin: UpdateOrigin) -> Result<()> {
        self.ensure_live()?;
        let decoded = Update::decode_v1(update)
            .map_err(|e| CollabError::MalformedFrame(format!("Failed to decode update: {}", e)))?;

        let mut txn = self.doc.transact_mut_with(origin.as_str());
        txn.apply_update(decoded).map_err(|e| {
            CollabError::MismatchedTransaction(format!("Failed to apply update: {}", e))
        })?;
        Ok(())
    }

    /// Whether any of the three containers holds text.
    pub fn has_content(&self) -> Result<bool> {
        self.ensure_live()?;
        let txn = self.doc.transact();
        Ok(DraftField::ALL
            .iter()
            .any(|f| self.text_ref(*f).len(&txn) > 0))
    }

    // ==================== Sync Encoding ====================

    /// Encode the current state vector for SyncStep1.
    pub fn encode_state_vector(&self) -> Result<Vec<u8>> {
        self.ensure_live()?;
        let txn = self.doc.transact();
        Ok(txn.state_vector().encode_v1())
    }

    /// Encode the full state as an update.
    pub fn encode_state_as_update(&self) -> Result<Vec<u8>> {
        self.ensure_live()?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&Default::default()))
    }

    /// Encode the diff between current state and a remote state vector.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>> {
        self.ensure_live()?;
        let sv = yrs::StateVector::decode_v1(remote_state_vector).map_err(|e| {
            CollabError::MalformedFrame(format!("Failed to decode state vector: {}", e))
        })?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    // ==================== Observers ====================

    /// Register a callback for every committed update.
    ///
    /// The callback runs while the producing transaction is still committing,
    /// so it must not touch this handle. Forward into a channel instead.
    pub fn subscribe<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(SyncUpdate) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let subscription = self
            .doc
            .observe_update_v1(move |txn, event| {
                let origin = UpdateOrigin::from_origin_bytes(txn.origin().map(|o| o.as_ref()));
                callback(SyncUpdate::new(event.update.clone(), origin));
            })
            .map_err(|e| CollabError::Crdt(format!("Failed to observe document: {}", e)))?;

        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, subscription);
        Ok(id)
    }

    /// Drop one subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Detach every subscriber, then mark the handle dead.
    pub fn destroy(&self) {
        let dropped = {
            let mut subs = self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let count = subs.len();
            subs.clear();
            count
        };
        self.destroyed.store(true, Ordering::SeqCst);
        log::debug!(
            "[SharedDoc] Destroyed document {} ({} subscribers detached)",
            self.key,
            dropped
        );
    }
}

impl std::fmt::Debug for SharedDocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDocumentHandle")
            .field("key", &self.key)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}
