//! Debounced autosave checkpoints.
//!
//! The scheduler performs no I/O. Durability belongs to the replicated
//! document; a checkpoint is a user-visible "Saved" signal plus a hook for
//! best-effort activity logging.

use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::draft::DraftField;
use crate::timer::Debouncer;

/// What triggered a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    /// Inactivity timer fired
    Autosave,
    /// The user asked to save
    Manual,
}

/// Emitted when a checkpoint is taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointReport {
    /// Trigger
    pub reason: CheckpointReason,
    /// Fields edited since the previous checkpoint, in first-edit order
    pub fields: Vec<DraftField>,
    /// Whether the session was synced at checkpoint time
    pub synced: bool,
    /// Timestamp of the checkpoint
    pub saved_at: DateTime<Utc>,
}

/// Resets a single inactivity timer on every edit.
#[derive(Debug)]
pub struct AutosaveScheduler<T> {
    timer: Debouncer<T>,
    dirty: IndexSet<DraftField>,
}

impl<T: Send + 'static> AutosaveScheduler<T> {
    /// Create a scheduler whose timer sends `make(seq)` on `tx`.
    pub fn new(delay: Duration, tx: mpsc::UnboundedSender<T>, make: fn(u64) -> T) -> Self {
        Self {
            timer: Debouncer::new(delay, tx, make),
            dirty: IndexSet::new(),
        }
    }

    /// Record an edit and restart the inactivity timer.
    pub fn notify_edit(&mut self, field: DraftField) {
        self.dirty.insert(field);
        self.timer.touch();
    }

    /// Handle a timer fire. Stale fires yield `None`.
    pub fn on_timer(&mut self, seq: u64, synced: bool) -> Option<CheckpointReport> {
        if !self.timer.accept(seq) {
            return None;
        }
        Some(self.take(CheckpointReason::Autosave, synced))
    }

    /// Checkpoint immediately regardless of the timer.
    pub fn checkpoint_now(&mut self, synced: bool) -> CheckpointReport {
        self.timer.cancel();
        self.take(CheckpointReason::Manual, synced)
    }

    /// Cancel the pending timer without checkpointing.
    pub fn cancel(&mut self) -> bool {
        self.timer.cancel()
    }

    /// Whether a checkpoint is pending.
    pub fn is_pending(&self) -> bool {
        self.timer.is_pending()
    }

    fn take(&mut self, reason: CheckpointReason, synced: bool) -> CheckpointReport {
        let saved_at = Utc::now();
        let report = CheckpointReport {
            reason,
            fields: self.dirty.drain(..).collect(),
            synced,
            saved_at,
        };
        log::info!(
            "[Autosave] {:?} checkpoint ({} fields, synced: {})",
            report.reason,
            report.fields.len(),
            report.synced
        );
        report
    }
}
