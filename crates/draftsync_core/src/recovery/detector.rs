//! Fatal-error detector.
//!
//! Protocol-fatal errors surface deep inside the CRDT and transport layers,
//! outside the session's normal event stream. Those layers hold a clone of
//! the [`FatalErrorDetector`] and [`report`](FatalErrorDetector::report)
//! into it. Reports only go anywhere while a subscriber has
//! [`install`](FatalErrorDetector::install)ed a hook; otherwise they are
//! logged and dropped.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::CollabError;

/// The two bad-transaction signatures that trigger recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalSignature {
    /// An inbound frame or update payload failed to decode
    MalformedUpdateFrame,
    /// A decoded update could not be integrated into the document
    MismatchedTransaction,
}

impl std::fmt::Display for FatalSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalSignature::MalformedUpdateFrame => write!(f, "malformed update frame"),
            FatalSignature::MismatchedTransaction => write!(f, "mismatched transaction"),
        }
    }
}

/// One observed fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalReport {
    /// Which signature matched
    pub signature: FatalSignature,
    /// Human-readable detail from the failing layer
    pub detail: String,
    /// Session generation that observed it
    pub generation: u64,
}

/// Cloneable hub routing fatal reports to at most one installed hook.
#[derive(Debug, Clone, Default)]
pub struct FatalErrorDetector {
    hook: Arc<Mutex<Option<mpsc::UnboundedSender<FatalReport>>>>,
}

impl FatalErrorDetector {
    /// Create a detector with no hook installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a hook, replacing any previous one.
    pub fn install(&self) -> mpsc::UnboundedReceiver<FatalReport> {
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self
            .hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(tx);
        if previous.is_some() {
            log::debug!("[Recovery] Replaced existing fatal-error hook");
        }
        rx
    }

    /// Remove the hook. Later reports are dropped.
    pub fn uninstall(&self) {
        self.hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Whether a hook is currently installed.
    pub fn is_installed(&self) -> bool {
        self.hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Route a fatal report to the hook. Returns whether it was delivered.
    pub fn report(&self, signature: FatalSignature, detail: impl Into<String>, generation: u64) -> bool {
        let report = FatalReport {
            signature,
            detail: detail.into(),
            generation,
        };
        let guard = self.hook.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) if tx.send(report.clone()).is_ok() => true,
            _ => {
                log::warn!(
                    "[Recovery] No hook installed, dropping {}: {}",
                    report.signature,
                    report.detail
                );
                false
            }
        }
    }

    /// Report `err` if it carries a fatal signature.
    ///
    /// Returns `None` for non-fatal errors, otherwise whether it was delivered.
    pub fn report_error(&self, err: &CollabError, generation: u64) -> Option<bool> {
        let signature = err.fatal_signature()?;
        Some(self.report(signature, err.to_string(), generation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_without_hook_is_dropped() {
        let detector = FatalErrorDetector::new();
        assert!(!detector.is_installed());
        assert!(!detector.report(FatalSignature::MalformedUpdateFrame, "x", 1));
    }

    #[test]
    fn test_installed_hook_receives_reports() {
        let detector = FatalErrorDetector::new();
        let mut rx = detector.install();
        let layer = detector.clone();

        assert!(layer.report(FatalSignature::MismatchedTransaction, "missing struct", 3));
        let report = rx.try_recv().unwrap();
        assert_eq!(report.signature, FatalSignature::MismatchedTransaction);
        assert_eq!(report.detail, "missing struct");
        assert_eq!(report.generation, 3);
    }

    #[test]
    fn test_uninstall_stops_delivery() {
        let detector = FatalErrorDetector::new();
        let mut rx = detector.install();
        detector.uninstall();
        assert!(!detector.is_installed());
        assert!(!detector.report(FatalSignature::MalformedUpdateFrame, "late", 1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reinstall_replaces_hook() {
        let detector = FatalErrorDetector::new();
        let mut first = detector.install();
        let mut second = detector.install();
        detector.report(FatalSignature::MalformedUpdateFrame, "x", 1);
        assert!(first.try_recv().is_err());
        assert!(second.try_recv().is_ok());
    }

    #[test]
    fn test_report_error_classifies() {
        let detector = FatalErrorDetector::new();
        let mut rx = detector.install();
        assert_eq!(
            detector.report_error(&CollabError::SessionClosed, 1),
            None
        );
        assert_eq!(
            detector.report_error(&CollabError::MalformedFrame("bad".into()), 1),
            Some(true)
        );
        assert_eq!(
            rx.try_recv().unwrap().signature,
            FatalSignature::MalformedUpdateFrame
        );
    }
}
