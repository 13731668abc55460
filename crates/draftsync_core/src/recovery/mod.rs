//! Protocol-level recovery.
//!
//! The [`FatalErrorDetector`] collects fatal protocol errors from wherever
//! they surface. The [`RecoverySupervisor`] turns them into bounded,
//! linearly backed-off rebuilds of the session and document.

mod detector;
mod supervisor;

pub use detector::{FatalErrorDetector, FatalReport, FatalSignature};
pub use supervisor::{
    RecoveryAttempt, RecoveryDecision, RecoveryPolicy, RecoverySupervisor, SuppressReason,
};
