//! The collaboration controller.
//!
//! [`CollabController`] owns the local draft and runs a single event loop
//! that serialises every mutation of the draft and the shared document:
//! UI commands, document updates, session lifecycle events, fatal-error
//! reports and timer fires all arrive as messages on that loop. Outbound
//! notifications are [`CoreEvent`]s on the receiver returned by
//! [`CollabController::spawn`].
//!
//! At most one [`SharedDocumentHandle`]/[`TransportSession`] pair is live.
//! Every teardown destroys the old pair completely before a new one is
//! built, and events from earlier generations are dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::autosave::{AutosaveScheduler, CheckpointReport};
use crate::bridge::OriginTaggedSyncBridge;
use crate::config::CollabConfig;
use crate::crdt::{DocumentKey, SharedDocumentHandle, SyncUpdate, UpdateOrigin};
use crate::draft::{DraftChanges, DraftField, LocalDraft};
use crate::error::{CollabError, Result};
use crate::presence::PresenceTracker;
use crate::recovery::{FatalErrorDetector, FatalReport, RecoveryDecision, RecoverySupervisor};
use crate::timer::{self, Debouncer};
use crate::transport::{
    ConnectionParams, SessionConfig, SessionEnvelope, SessionEvent, Transport, TransportSession,
};

/// User-visible connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    /// Opening or authenticating a connection
    Connecting,
    /// Authenticated, initial sync pending
    Connected,
    /// In sync with the server
    Synced,
    /// Not collaborating
    Disconnected,
    /// Credentials rejected
    #[serde(rename = "Auth Failed")]
    AuthFailed,
    /// The connection failed
    Error,
    /// Rebuilding after a protocol-fatal error
    Recovering,
    /// Recovery budget exhausted; local-only editing from here on
    #[serde(rename = "Recovery Failed")]
    RecoveryFailed,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Synced => "Synced",
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::AuthFailed => "Auth Failed",
            ConnectionStatus::Error => "Error",
            ConnectionStatus::Recovering => "Recovering",
            ConnectionStatus::RecoveryFailed => "Recovery Failed",
        };
        f.write_str(label)
    }
}

/// Notification for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CoreEvent {
    /// A pull or a post-recovery restore changed the draft
    LocalDraftChanged(DraftChanges),
    /// Connection status changed
    ConnectionStatusChanged(ConnectionStatus),
    /// A new collaborator joined the author list
    AuthorDetected(String),
    /// A checkpoint was taken
    Checkpoint(CheckpointReport),
}

/// Result of a manual save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    /// Whether the session was synced when saving
    pub synced: bool,
    /// Checkpoint time
    pub saved_at: DateTime<Utc>,
}

enum Command {
    FieldEdited(DraftField, String),
    Enable {
        key: DocumentKey,
        params: ConnectionParams,
        reply: oneshot::Sender<Result<()>>,
    },
    Disable(oneshot::Sender<()>),
    ManualSave(oneshot::Sender<SaveReport>),
    Draft(oneshot::Sender<LocalDraft>),
    Status(oneshot::Sender<ConnectionStatus>),
    Authors(oneshot::Sender<Vec<String>>),
    ActiveUsers(oneshot::Sender<Vec<String>>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
enum Tick {
    PushDue(u64),
    AutosaveDue(u64),
    RecoveryDue(u64),
    RebuildDue(u64),
}

struct DocEvent {
    generation: u64,
    update: SyncUpdate,
}

/// Handle to the collaboration event loop.
///
/// Cloning is cheap; all clones drive the same loop.
#[derive(Clone)]
pub struct CollabController {
    commands: mpsc::UnboundedSender<Command>,
    detector: FatalErrorDetector,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl CollabController {
    /// Start the event loop for `draft`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(
        config: CollabConfig,
        transport: Arc<dyn Transport>,
        draft: LocalDraft,
        local_user: Option<String>,
    ) -> (Self, mpsc::UnboundedReceiver<CoreEvent>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (doc_tx, doc_rx) = mpsc::unbounded_channel();
        let detector = FatalErrorDetector::new();

        let actor = Actor {
            autosave: AutosaveScheduler::new(
                config.autosave_delay(),
                tick_tx.clone(),
                Tick::AutosaveDue,
            ),
            push_timer: Debouncer::new(config.push_debounce(), tick_tx.clone(), Tick::PushDue),
            supervisor: RecoverySupervisor::new(config.recovery_policy()),
            presence: PresenceTracker::new(local_user.clone())
                .with_authors(draft.beneficiaries.iter().map(|b| b.account.clone())),
            bridge: OriginTaggedSyncBridge::new(),
            detector: detector.clone(),
            fatal_rx: None,
            live: None,
            generation: 0,
            status: ConnectionStatus::Disconnected,
            recovery: None,
            recovery_epoch: 0,
            disabled: false,
            config,
            transport,
            local_user,
            draft,
            events,
            tick_tx,
            session_tx,
            doc_tx,
        };

        let task = tokio::spawn(actor.run(command_rx, tick_rx, session_rx, doc_rx));
        let controller = Self {
            commands,
            detector,
            task: Arc::new(std::sync::Mutex::new(Some(task))),
        };
        (controller, event_rx)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| CollabError::SessionClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| CollabError::SessionClosed)
    }

    /// The UI edited a field.
    pub fn on_field_edited(&self, field: DraftField, value: impl Into<String>) -> Result<()> {
        self.send(Command::FieldEdited(field, value.into()))
    }

    /// Join the collaborative document `key`.
    ///
    /// Re-enabling the live document is a no-op; a different key tears the
    /// current session down first.
    pub async fn enable_collaboration(
        &self,
        key: DocumentKey,
        params: ConnectionParams,
    ) -> Result<()> {
        self.request(|reply| Command::Enable { key, params, reply })
            .await?
    }

    /// Leave the collaborative document and cancel all pending work.
    pub async fn disable_collaboration(&self) -> Result<()> {
        self.request(Command::Disable).await
    }

    /// Checkpoint now, regardless of the autosave timer.
    pub async fn manual_save_requested(&self) -> Result<SaveReport> {
        self.request(Command::ManualSave).await
    }

    /// Snapshot of the local draft.
    pub async fn draft(&self) -> Result<LocalDraft> {
        self.request(Command::Draft).await
    }

    /// Current connection status.
    pub async fn status(&self) -> Result<ConnectionStatus> {
        self.request(Command::Status).await
    }

    /// Accumulated author list.
    pub async fn authors(&self) -> Result<Vec<String>> {
        self.request(Command::Authors).await
    }

    /// Participants currently connected to the live document.
    pub async fn active_users(&self) -> Result<Vec<String>> {
        self.request(Command::ActiveUsers).await
    }

    /// The fatal-error detector that lower layers report into.
    pub fn detector(&self) -> FatalErrorDetector {
        self.detector.clone()
    }

    /// Disable collaboration and stop the event loop.
    pub async fn shutdown(&self) -> Result<()> {
        let result = self.request(Command::Shutdown).await;
        let task = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            log::error!("[Collab] Event loop failed: {}", e);
        }
        result
    }
}

struct Live {
    key: DocumentKey,
    params: ConnectionParams,
    handle: Arc<SharedDocumentHandle>,
    session: TransportSession,
}

/// An in-flight recovery: cancelled on disable, tracked by epoch.
struct Recovery {
    epoch: u64,
    cancel: CancellationToken,
    target: (DocumentKey, ConnectionParams),
    snapshot: Option<(String, String)>,
}

struct Actor {
    config: CollabConfig,
    transport: Arc<dyn Transport>,
    local_user: Option<String>,
    draft: LocalDraft,
    bridge: OriginTaggedSyncBridge,
    presence: PresenceTracker,
    autosave: AutosaveScheduler<Tick>,
    push_timer: Debouncer<Tick>,
    detector: FatalErrorDetector,
    fatal_rx: Option<mpsc::UnboundedReceiver<FatalReport>>,
    supervisor: RecoverySupervisor,
    live: Option<Live>,
    generation: u64,
    status: ConnectionStatus,
    recovery: Option<Recovery>,
    recovery_epoch: u64,
    disabled: bool,
    events: mpsc::UnboundedSender<CoreEvent>,
    tick_tx: mpsc::UnboundedSender<Tick>,
    session_tx: mpsc::UnboundedSender<SessionEnvelope>,
    doc_tx: mpsc::UnboundedSender<DocEvent>,
}

async fn recv_fatal(rx: &mut Option<mpsc::UnboundedReceiver<FatalReport>>) -> Option<FatalReport> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut ticks: mpsc::UnboundedReceiver<Tick>,
        mut sessions: mpsc::UnboundedReceiver<SessionEnvelope>,
        mut docs: mpsc::UnboundedReceiver<DocEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.disable();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.disable();
                        break;
                    }
                },
                Some(tick) = ticks.recv() => self.handle_tick(tick),
                Some(envelope) = sessions.recv() => self.handle_session(envelope),
                Some(doc) = docs.recv() => self.handle_doc(doc),
                Some(report) = recv_fatal(&mut self.fatal_rx) => self.handle_fatal(report),
            }
        }
        log::info!("[Collab] Event loop stopped");
    }

    fn emit(&self, event: CoreEvent) {
        let _ = self.events.send(event);
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            log::info!("[Collab] Status {} -> {}", self.status, status);
            self.status = status;
            self.emit(CoreEvent::ConnectionStatusChanged(status));
        }
    }

    fn live_generation(&self) -> Option<u64> {
        self.live.as_ref().map(|live| live.session.generation())
    }

    // ==================== Commands ====================

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::FieldEdited(field, value) => self.on_field_edited(field, value),
            Command::Enable { key, params, reply } => {
                let _ = reply.send(self.enable(key, params));
            }
            Command::Disable(reply) => {
                self.disable();
                let _ = reply.send(());
            }
            Command::ManualSave(reply) => {
                let _ = reply.send(self.manual_save());
            }
            Command::Draft(reply) => {
                let _ = reply.send(self.draft.clone());
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status);
            }
            Command::Authors(reply) => {
                let _ = reply.send(self.presence.authors());
            }
            Command::ActiveUsers(reply) => {
                let _ = reply.send(self.presence.active_users());
            }
            // Handled by the loop
            Command::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }

    fn on_field_edited(&mut self, field: DraftField, value: String) {
        if self.draft.get(field) == value {
            return;
        }
        self.draft.set(field, value);
        self.autosave.notify_edit(field);
        if self.live.is_some() {
            self.bridge.mark_pending(field);
            self.push_timer.touch();
        }
    }

    fn enable(&mut self, key: DocumentKey, params: ConnectionParams) -> Result<()> {
        if self.disabled {
            return Err(CollabError::CollaborationDisabled);
        }
        if let Some(live) = &self.live
            && live.key == key
            && live.params == params
            && !live.session.is_finished()
        {
            log::debug!("[Collab] Already collaborating on {}", key);
            return Ok(());
        }

        if self.live.is_some() {
            // Switching documents cancels timers armed for the old one
            self.push_timer.cancel();
            self.autosave.cancel();
            self.presence.clear_active();
        }
        self.cancel_recovery();
        self.teardown_live();
        self.supervisor.reset();
        self.fatal_rx = Some(self.detector.install());

        match self.start_live(key, params) {
            Ok(()) => {
                self.set_status(ConnectionStatus::Connecting);
                Ok(())
            }
            Err(e) => {
                log::error!("[Collab] Failed to start collaboration: {}", e);
                self.detector.uninstall();
                self.fatal_rx = None;
                self.set_status(ConnectionStatus::Error);
                Err(e)
            }
        }
    }

    fn disable(&mut self) {
        self.push_timer.cancel();
        self.autosave.cancel();
        self.cancel_recovery();
        self.detector.uninstall();
        self.fatal_rx = None;
        self.teardown_live();
        self.presence.clear_active();
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn manual_save(&mut self) -> SaveReport {
        self.push_timer.cancel();
        if self.bridge.has_pending() {
            self.push_now();
        }
        let synced = self.status == ConnectionStatus::Synced;
        let report = self.autosave.checkpoint_now(synced);
        let saved = SaveReport {
            synced,
            saved_at: report.saved_at,
        };
        self.emit(CoreEvent::Checkpoint(report));
        saved
    }

    // ==================== Live pair ====================

    fn start_live(&mut self, key: DocumentKey, params: ConnectionParams) -> Result<()> {
        self.generation += 1;
        let generation = self.generation;

        let handle = Arc::new(SharedDocumentHandle::create(key.clone()));
        let doc_tx = self.doc_tx.clone();
        handle.subscribe(move |update| {
            let _ = doc_tx.send(DocEvent { generation, update });
        })?;

        let session = TransportSession::connect(
            generation,
            Arc::clone(&handle),
            params.clone(),
            Arc::clone(&self.transport),
            SessionConfig::from_config(&self.config, self.local_user.clone()),
            self.detector.clone(),
            self.session_tx.clone(),
        );
        let session = match session {
            Ok(session) => session,
            Err(e) => {
                handle.destroy();
                return Err(e);
            }
        };

        log::info!(
            "[Collab] Collaborating on {} (generation {})",
            key,
            generation
        );
        self.live = Some(Live {
            key,
            params,
            handle,
            session,
        });
        Ok(())
    }

    fn teardown_live(&mut self) {
        if let Some(live) = self.live.take() {
            log::info!(
                "[Collab] Tearing down {} (generation {})",
                live.key,
                live.session.generation()
            );
            live.session.disconnect();
            live.handle.destroy();
        }
    }

    fn push_now(&mut self) {
        let Some(live) = &self.live else {
            return;
        };
        if let Err(e) = self
            .bridge
            .push(&self.draft, &live.handle, UpdateOrigin::LocalEdit)
        {
            log::warn!("[Collab] Push failed: {}", e);
        }
    }

    // ==================== Timers ====================

    fn handle_tick(&mut self, tick: Tick) {
        match tick {
            Tick::PushDue(seq) => {
                if self.push_timer.accept(seq) {
                    self.push_now();
                }
            }
            Tick::AutosaveDue(seq) => {
                let synced = self.status == ConnectionStatus::Synced;
                if let Some(report) = self.autosave.on_timer(seq, synced) {
                    self.emit(CoreEvent::Checkpoint(report));
                }
            }
            Tick::RecoveryDue(epoch) => self.begin_rebuild(epoch),
            Tick::RebuildDue(epoch) => self.finish_rebuild(epoch),
        }
    }

    // ==================== Session & document events ====================

    fn handle_session(&mut self, envelope: SessionEnvelope) {
        if self.live_generation() != Some(envelope.generation) {
            log::debug!(
                "[Collab] Dropping event from stale session {}: {:?}",
                envelope.generation,
                envelope.event
            );
            return;
        }
        if self.recovery.is_some() && !matches!(envelope.event, SessionEvent::Awareness(_)) {
            // The session is scheduled for teardown; keep reporting Recovering
            log::debug!("[Collab] Ignoring {:?} while recovering", envelope.event);
            return;
        }

        match envelope.event {
            SessionEvent::Connecting => self.set_status(ConnectionStatus::Connecting),
            SessionEvent::Connected => self.set_status(ConnectionStatus::Connected),
            SessionEvent::AuthFailed(reason) => {
                log::warn!("[Collab] Authentication failed: {}", reason);
                self.set_status(ConnectionStatus::AuthFailed);
            }
            SessionEvent::Synced { has_content } => self.on_synced(has_content),
            SessionEvent::Disconnected { code, reason } => {
                log::info!("[Collab] Disconnected ({} {})", code, reason);
                self.presence.clear_active();
                self.set_status(ConnectionStatus::Disconnected);
            }
            SessionEvent::Error(message) => {
                log::warn!("[Collab] Session error: {}", message);
                self.set_status(ConnectionStatus::Error);
            }
            SessionEvent::Awareness(entries) => {
                for name in self.presence.on_awareness_update(&entries) {
                    self.emit(CoreEvent::AuthorDetected(name));
                }
            }
        }
    }

    fn on_synced(&mut self, has_content: bool) {
        self.supervisor.on_resynced();
        self.push_timer.cancel();

        if let Some(live) = &self.live {
            match self
                .bridge
                .reconcile_initial(&mut self.draft, &live.handle, has_content)
            {
                Ok(result) => {
                    if !result.pulled.is_empty() {
                        self.emit(CoreEvent::LocalDraftChanged(result.pulled));
                    }
                }
                Err(e) => log::warn!("[Collab] Initial reconciliation failed: {}", e),
            }
        }
        self.set_status(ConnectionStatus::Synced);
    }

    fn handle_doc(&mut self, doc: DocEvent) {
        if self.live_generation() != Some(doc.generation) || doc.update.origin.is_local() {
            return;
        }
        let Some(live) = &self.live else {
            return;
        };
        match self
            .bridge
            .pull(&mut self.draft, &live.handle, doc.update.origin)
        {
            Ok(changes) if !changes.is_empty() => {
                self.emit(CoreEvent::LocalDraftChanged(changes));
            }
            Ok(_) => {}
            Err(CollabError::DocumentDestroyed) => {}
            Err(e) => log::warn!("[Collab] Pull failed: {}", e),
        }
    }

    // ==================== Recovery ====================

    fn handle_fatal(&mut self, report: FatalReport) {
        let Some(live) = &self.live else {
            log::debug!(
                "[Collab] Ignoring {} with no live session: {}",
                report.signature,
                report.detail
            );
            return;
        };
        let target = (live.key.clone(), live.params.clone());

        match self.supervisor.on_fatal(&report) {
            RecoveryDecision::Suppressed(_) => {}
            RecoveryDecision::Scheduled(attempt) => {
                self.recovery_epoch += 1;
                let cancel = CancellationToken::new();
                self.recovery = Some(Recovery {
                    epoch: self.recovery_epoch,
                    cancel: cancel.clone(),
                    target,
                    snapshot: None,
                });
                self.set_status(ConnectionStatus::Recovering);
                timer::schedule(
                    attempt.backoff,
                    cancel,
                    self.tick_tx.clone(),
                    Tick::RecoveryDue(self.recovery_epoch),
                );
            }
            RecoveryDecision::Exhausted => self.fail_recovery("recovery budget exhausted"),
        }
    }

    fn current_recovery(&mut self, epoch: u64) -> Option<&mut Recovery> {
        self.recovery.as_mut().filter(|r| r.epoch == epoch)
    }

    /// Backoff elapsed: snapshot, tear down, then wait for quiescence.
    fn begin_rebuild(&mut self, epoch: u64) {
        let snapshot = (self.draft.title.clone(), self.draft.body.clone());
        let quiescence = self.config.quiescence();
        let tick_tx = self.tick_tx.clone();

        let Some(recovery) = self.current_recovery(epoch) else {
            return;
        };
        recovery.snapshot = Some(snapshot);
        let cancel = recovery.cancel.clone();

        if let Some(live) = &self.live {
            live.session.mark_recovering();
        }
        self.teardown_live();
        timer::schedule(quiescence, cancel, tick_tx, Tick::RebuildDue(epoch));
    }

    /// Quiescence elapsed: rebuild the pair and restore emptied fields.
    fn finish_rebuild(&mut self, epoch: u64) {
        if self.current_recovery(epoch).is_none() {
            return;
        }
        let Some(recovery) = self.recovery.take() else {
            return;
        };
        let (key, params) = recovery.target;

        if let Err(e) = self.start_live(key, params) {
            self.supervisor.on_rebuild_failed();
            self.fail_recovery(&e.to_string());
            return;
        }
        self.supervisor.on_rebuild_complete();

        if let Some((title, body)) = recovery.snapshot {
            let mut restored = DraftChanges::default();
            if self.draft.title.is_empty() && !title.is_empty() {
                self.draft.set(DraftField::Title, title.as_str());
                restored.record(DraftField::Title, &title);
                restored.permlink = Some(self.draft.permlink.clone());
            }
            if self.draft.body.is_empty() && !body.is_empty() {
                self.draft.set(DraftField::Body, body.as_str());
                restored.record(DraftField::Body, &body);
            }
            if !restored.is_empty() {
                log::info!("[Recovery] Restored draft content lost during teardown");
                self.emit(CoreEvent::LocalDraftChanged(restored));
            }
        }
        self.set_status(ConnectionStatus::Connecting);
    }

    fn cancel_recovery(&mut self) {
        if let Some(recovery) = self.recovery.take() {
            recovery.cancel.cancel();
        }
        self.supervisor.cancel();
    }

    fn fail_recovery(&mut self, reason: &str) {
        log::error!(
            "[Recovery] Giving up: {}. Collaboration disabled for this session",
            reason
        );
        if let Some(recovery) = self.recovery.take() {
            recovery.cancel.cancel();
        }
        self.push_timer.cancel();
        self.detector.uninstall();
        self.fatal_rx = None;
        self.teardown_live();
        self.disabled = true;
        self.set_status(ConnectionStatus::RecoveryFailed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryListener, MemoryTransport};
    use std::time::Duration;

    fn params() -> ConnectionParams {
        ConnectionParams {
            endpoint: "ws://memory/collab".into(),
            account: "alice".into(),
            challenge: "c".into(),
            public_key: "k".into(),
            signature: "s".into(),
        }
    }

    fn key() -> DocumentKey {
        DocumentKey::new("alice", "draft")
    }

    fn spawn(draft: LocalDraft) -> (CollabController, mpsc::UnboundedReceiver<CoreEvent>, MemoryListener) {
        let (transport, listener) = MemoryTransport::new();
        let (controller, events) = CollabController::spawn(
            CollabConfig::default(),
            Arc::new(transport),
            draft,
            Some("alice".into()),
        );
        (controller, events, listener)
    }

    fn statuses(events: &mut mpsc::UnboundedReceiver<CoreEvent>) -> Vec<ConnectionStatus> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let CoreEvent::ConnectionStatusChanged(status) = event {
                seen.push(status);
            }
        }
        seen
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(ConnectionStatus::AuthFailed.to_string(), "Auth Failed");
        assert_eq!(ConnectionStatus::RecoveryFailed.to_string(), "Recovery Failed");
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::RecoveryFailed).unwrap(),
            "\"Recovery Failed\""
        );
    }

    #[test]
    fn test_core_event_serializes_tagged() {
        let event = CoreEvent::AuthorDetected("bob".into());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "author_detected");
        assert_eq!(json["payload"], "bob");
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_are_local_only_when_disabled() {
        let (controller, mut events, _listener) = spawn(LocalDraft::default());
        controller
            .on_field_edited(DraftField::Title, "Offline Draft")
            .unwrap();

        let draft = controller.draft().await.unwrap();
        assert_eq!(draft.title, "Offline Draft");
        assert_eq!(draft.permlink, "offline-draft");
        assert_eq!(
            controller.status().await.unwrap(),
            ConnectionStatus::Disconnected
        );

        // Autosave still fires after inactivity
        tokio::time::sleep(Duration::from_secs(4)).await;
        let mut checkpoint = None;
        while let Ok(event) = events.try_recv() {
            if let CoreEvent::Checkpoint(report) = event {
                checkpoint = Some(report);
            }
        }
        let checkpoint = checkpoint.expect("autosave checkpoint");
        assert_eq!(checkpoint.fields, vec![DraftField::Title]);
        assert!(!checkpoint.synced);
    }

    #[tokio::test]
    async fn test_manual_save_reports_unsynced() {
        let (controller, _events, _listener) = spawn(LocalDraft::default());
        let report = controller.manual_save_requested().await.unwrap();
        assert!(!report.synced);
    }

    #[tokio::test]
    async fn test_invalid_endpoint_reports_error() {
        let (controller, mut events, _listener) = spawn(LocalDraft::default());
        let mut bad = params();
        bad.endpoint = "ftp://nowhere".into();
        let result = controller.enable_collaboration(key(), bad).await;
        assert!(matches!(result, Err(CollabError::InvalidEndpoint(_))));
        assert_eq!(statuses(&mut events), vec![ConnectionStatus::Error]);
        assert!(!controller.detector().is_installed());
    }

    #[tokio::test]
    async fn test_enable_and_disable() {
        let (controller, mut events, mut listener) = spawn(LocalDraft::default());
        controller
            .enable_collaboration(key(), params())
            .await
            .unwrap();
        assert!(controller.detector().is_installed());
        let _server = listener.accept().await.unwrap();

        // Same key again is a no-op
        controller
            .enable_collaboration(key(), params())
            .await
            .unwrap();
        assert!(listener.try_accept().is_none());

        controller.disable_collaboration().await.unwrap();
        assert!(!controller.detector().is_installed());
        assert_eq!(
            controller.status().await.unwrap(),
            ConnectionStatus::Disconnected
        );
        let seen = statuses(&mut events);
        assert_eq!(seen.first(), Some(&ConnectionStatus::Connecting));
        assert_eq!(seen.last(), Some(&ConnectionStatus::Disconnected));
    }

    #[tokio::test]
    async fn test_switching_documents_replaces_session() {
        let (controller, _events, mut listener) = spawn(LocalDraft::default());
        controller
            .enable_collaboration(key(), params())
            .await
            .unwrap();
        let mut old = listener.accept().await.unwrap();

        let other = DocumentKey::new("alice", "second-draft");
        controller
            .enable_collaboration(other, params())
            .await
            .unwrap();
        let new = listener.accept().await.unwrap();
        assert!(new.request.url.contains("doc=alice%2Fsecond-draft"));

        // The old connection is closed, never left running alongside
        while old.recv().await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_restores_emptied_fields() {
        let (controller, _events, mut listener) =
            spawn(LocalDraft::new("Keep me", "Body text", ""));
        controller
            .enable_collaboration(key(), params())
            .await
            .unwrap();
        let _first = listener.accept().await.unwrap();

        controller
            .detector()
            .report(crate::recovery::FatalSignature::MismatchedTransaction, "x", 1);
        assert_eq!(
            wait_for_status(&controller, ConnectionStatus::Recovering).await,
            ConnectionStatus::Recovering
        );

        // Wipe the title while the rebuild is pending
        tokio::time::sleep(Duration::from_millis(1100)).await;
        controller.on_field_edited(DraftField::Title, "").unwrap();

        let _second = listener.accept().await.unwrap();
        let draft = controller.draft().await.unwrap();
        assert_eq!(draft.title, "Keep me");
        assert_eq!(draft.body, "Body text");
    }

    #[tokio::test]
    async fn test_lifecycle_events_ignored_while_recovering() {
        use crate::crdt::{AuthMessage, Message, SyncMessage};

        let (controller, mut events, mut listener) = spawn(LocalDraft::default());
        controller
            .enable_collaboration(key(), params())
            .await
            .unwrap();
        let mut server = listener.accept().await.unwrap();
        controller
            .detector()
            .report(crate::recovery::FatalSignature::MismatchedTransaction, "x", 1);
        assert_eq!(
            wait_for_status(&controller, ConnectionStatus::Recovering).await,
            ConnectionStatus::Recovering
        );
        statuses(&mut events);

        // The doomed session completes its handshake before the backoff elapses
        server.recv_message().await;
        server.send_message(&Message::Auth(AuthMessage::Authenticated(
            "read-write".into(),
        )));
        let Some(Message::Sync(SyncMessage::SyncStep1(sv))) = server.recv_message().await else {
            panic!("expected SyncStep1");
        };
        let peer = SharedDocumentHandle::create(key());
        peer.apply_local_edit(DraftField::Title, "Remote", UpdateOrigin::LocalEdit)
            .unwrap();
        server.send_message(&Message::Sync(SyncMessage::SyncStep2(
            peer.encode_diff(&sv).unwrap(),
        )));
        while controller.draft().await.unwrap().title != "Remote" {
            tokio::task::yield_now().await;
        }
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            controller.status().await.unwrap(),
            ConnectionStatus::Recovering
        );
        assert!(statuses(&mut events).is_empty());
    }

    async fn wait_for_status(
        controller: &CollabController,
        wanted: ConnectionStatus,
    ) -> ConnectionStatus {
        for _ in 0..100 {
            let status = controller.status().await.unwrap();
            if status == wanted {
                return status;
            }
            tokio::task::yield_now().await;
        }
        controller.status().await.unwrap()
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let (controller, _events, _listener) = spawn(LocalDraft::default());
        controller.shutdown().await.unwrap();
        assert!(matches!(
            controller.status().await,
            Err(CollabError::SessionClosed)
        ));
    }
}
