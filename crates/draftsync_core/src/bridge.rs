//! Origin-tagged translation between the local draft and the shared document.
//!
//! Both directions are idempotent and decided purely by comparing content:
//!
//! - **Push** writes every field whose local value differs from the shared
//!   container, tagged `local-edit` (live typing) or `initial-sync` (first
//!   reconciliation).
//! - **Pull** copies every differing shared field into the draft, unless the
//!   triggering update is self-attributed, the field has an unpushed local
//!   edit, or the shared value is empty while the local one is not.

use indexmap::IndexSet;

use crate::crdt::{SharedDocumentHandle, UpdateOrigin};
use crate::draft::{DraftChanges, DraftField, LocalDraft};
use crate::error::Result;

/// Outcome of the first reconciliation after a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Fields taken from the shared document
    pub pulled: DraftChanges,
    /// Fields written to the shared document
    pub pushed: Vec<DraftField>,
}

/// Bidirectional draft/document bridge.
#[derive(Debug, Default)]
pub struct OriginTaggedSyncBridge {
    pending: IndexSet<DraftField>,
}

impl OriginTaggedSyncBridge {
    /// Create a bridge with no pending edits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a local edit that has not been pushed yet.
    pub fn mark_pending(&mut self, field: DraftField) {
        self.pending.insert(field);
    }

    /// Whether any local edit awaits a push.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Push every differing field to the shared document.
    pub fn push(
        &mut self,
        draft: &LocalDraft,
        handle: &SharedDocumentHandle,
        origin: UpdateOrigin,
    ) -> Result<Vec<DraftField>> {
        let mut pushed = Vec::new();
        for field in DraftField::ALL {
            let local = draft.get(field);
            if handle.get_text(field)? != local {
                handle.apply_local_edit(field, local, origin)?;
                pushed.push(field);
            }
        }
        self.pending.clear();

        if !pushed.is_empty() {
            log::debug!("[SyncBridge] Pushed {:?} ({})", pushed, origin);
        }
        Ok(pushed)
    }

    /// Pull shared content into the draft after an update tagged `origin`.
    pub fn pull(
        &mut self,
        draft: &mut LocalDraft,
        handle: &SharedDocumentHandle,
        origin: UpdateOrigin,
    ) -> Result<DraftChanges> {
        let mut changes = DraftChanges::default();
        if origin.is_local() {
            return Ok(changes);
        }

        for field in DraftField::ALL {
            if self.pending.contains(&field) {
                continue;
            }
            let shared = handle.get_text(field)?;
            let local = draft.get(field);
            if shared == local {
                continue;
            }
            if shared.is_empty() && !local.is_empty() {
                log::debug!(
                    "[SyncBridge] Keeping local {} over empty shared value",
                    field
                );
                continue;
            }

            draft.set(field, shared.as_str());
            changes.record(field, &shared);
            if field == DraftField::Title {
                changes.permlink = Some(draft.permlink.clone());
            }
        }

        if !changes.is_empty() {
            log::debug!("[SyncBridge] Pulled {:?} ({})", changes, origin);
        }
        Ok(changes)
    }

    /// First reconciliation after `Synced`.
    ///
    /// With remote content, non-empty shared fields win first; whatever local
    /// content remains different is then pushed as `initial-sync`. Without
    /// remote content the local draft is pushed as-is.
    pub fn reconcile_initial(
        &mut self,
        draft: &mut LocalDraft,
        handle: &SharedDocumentHandle,
        has_content: bool,
    ) -> Result<Reconciliation> {
        let pulled = if has_content {
            self.pull(draft, handle, UpdateOrigin::Remote)?
        } else {
            DraftChanges::default()
        };
        let pushed = self.push(draft, handle, UpdateOrigin::InitialSync)?;
        Ok(Reconciliation { pulled, pushed })
    }
}
