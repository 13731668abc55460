//! Recovery budget and backoff bookkeeping.
//!
//! `RecoverySupervisor` decides *whether* and *when* a rebuild happens. It
//! performs no I/O; the controller executes the teardown/rebuild sequence
//! and reports back through [`on_rebuild_complete`](RecoverySupervisor::on_rebuild_complete)
//! and [`on_resynced`](RecoverySupervisor::on_resynced).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::detector::FatalReport;

/// Retry budget and linear backoff unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Maximum rebuilds between two successful resyncs
    pub budget: u32,
    /// Backoff before attempt `n` is `n * backoff_unit`
    pub backoff_unit: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            budget: 3,
            backoff_unit: Duration::from_millis(1000),
        }
    }
}

/// One scheduled rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryAttempt {
    /// 1-based attempt number
    pub attempt_number: u32,
    /// When the attempt was scheduled
    pub started_at: DateTime<Utc>,
    /// Delay before the rebuild runs
    #[serde(with = "duration_ms")]
    pub backoff: Duration,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Why a fatal error was swallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// A rebuild is already scheduled or running
    InFlight,
    /// The budget ran out earlier; recovery is permanently off
    Disabled,
}

/// What the controller should do about a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Ignore it
    Suppressed(SuppressReason),
    /// Wait `attempt.backoff`, then rebuild
    Scheduled(RecoveryAttempt),
    /// Budget exceeded: disable collaboration for the rest of the session
    Exhausted,
}

/// Bounded-retry recovery state machine.
#[derive(Debug)]
pub struct RecoverySupervisor {
    policy: RecoveryPolicy,
    attempts: u32,
    in_flight: Option<RecoveryAttempt>,
    awaiting_resync: bool,
    failed: bool,
}

impl RecoverySupervisor {
    /// Create a supervisor with the given policy.
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            in_flight: None,
            awaiting_resync: false,
            failed: false,
        }
    }

    /// Attempts used since the last successful resync.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The scheduled or running attempt, if any.
    pub fn in_flight(&self) -> Option<&RecoveryAttempt> {
        self.in_flight.as_ref()
    }

    /// Whether the budget was exhausted.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Decide what to do about a fatal error.
    pub fn on_fatal(&mut self, report: &FatalReport) -> RecoveryDecision {
        if self.failed {
            log::warn!(
                "[Recovery] Suppressing {} (recovery disabled): {}",
                report.signature,
                report.detail
            );
            return RecoveryDecision::Suppressed(SuppressReason::Disabled);
        }

        if let Some(attempt) = &self.in_flight {
            log::warn!(
                "[Recovery] Suppressing {} (attempt {} in flight): {}",
                report.signature,
                attempt.attempt_number,
                report.detail
            );
            return RecoveryDecision::Suppressed(SuppressReason::InFlight);
        }

        if self.attempts >= self.policy.budget {
            log::error!(
                "[Recovery] Budget of {} attempts exhausted by {}: {}",
                self.policy.budget,
                report.signature,
                report.detail
            );
            self.failed = true;
            return RecoveryDecision::Exhausted;
        }

        self.attempts += 1;
        let attempt = RecoveryAttempt {
            attempt_number: self.attempts,
            started_at: Utc::now(),
            backoff: self.policy.backoff_unit * self.attempts,
        };
        log::info!(
            "[Recovery] Scheduling attempt {}/{} in {}ms after {}",
            attempt.attempt_number,
            self.policy.budget,
            attempt.backoff.as_millis(),
            report.signature
        );
        // The rebuilt session failed before it synced
        self.awaiting_resync = false;
        self.in_flight = Some(attempt.clone());
        RecoveryDecision::Scheduled(attempt)
    }

    /// The rebuild for the in-flight attempt finished.
    pub fn on_rebuild_complete(&mut self) {
        if let Some(attempt) = self.in_flight.take() {
            log::info!(
                "[Recovery] Attempt {} rebuilt the session",
                attempt.attempt_number
            );
            self.awaiting_resync = true;
        }
    }

    /// The rebuild itself failed. Recovery is over for this session.
    pub fn on_rebuild_failed(&mut self) {
        self.in_flight = None;
        self.awaiting_resync = false;
        self.failed = true;
    }

    /// The session reached `Synced`. Resets the budget after a rebuild.
    ///
    /// Ignored while an attempt is scheduled: that sync came from a session
    /// that is about to be torn down.
    pub fn on_resynced(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        if self.awaiting_resync {
            log::info!(
                "[Recovery] Resynced after {} attempt(s), budget reset",
                self.attempts
            );
            self.awaiting_resync = false;
            self.attempts = 0;
        }
    }

    /// Abandon any in-flight attempt without touching the budget.
    pub fn cancel(&mut self) {
        if let Some(attempt) = self.in_flight.take() {
            log::info!("[Recovery] Abandoned attempt {}", attempt.attempt_number);
        }
        self.awaiting_resync = false;
    }

    /// Forget everything, as for a fresh collaboration session.
    pub fn reset(&mut self) {
        *self = Self::new(self.policy);
    }
}
