//! One network session bound to one shared document.
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Connected -> Synced
//!                     ^              |                |          |
//!                     |              +----------------+----------+--> Error
//!                     +-------------- (fixed-delay reconnect) -------+
//! ```
//!
//! The session task owns the connection. It forwards locally originated
//! document updates to the server, applies inbound updates as `remote`, and
//! reports lifecycle changes as [`SessionEvent`]s tagged with the session
//! generation. Protocol-fatal errors never become events; they go to the
//! [`FatalErrorDetector`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Connection, ConnectionParams, ConnectionRequest, Incoming, Transport};
use crate::config::CollabConfig;
use crate::crdt::{
    AuthMessage, AwarenessEntry, DocumentKey, Message, SharedDocumentHandle, SubscriptionId,
    SyncMessage, SyncUpdate, UpdateOrigin,
};
use crate::error::{CollabError, Result};
use crate::recovery::FatalErrorDetector;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not connected, and not trying to
    Disconnected,
    /// Opening the socket
    Connecting,
    /// Socket open, waiting for the server to accept the credentials
    Authenticating,
    /// Credentials accepted, initial sync pending
    Connected,
    /// Initial sync complete
    Synced,
    /// The last connection failed
    Error,
    /// Being torn down for a protocol-level rebuild
    Recovering,
}

/// Lifecycle event emitted by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A connection attempt started
    Connecting,
    /// The server accepted the credentials
    Connected,
    /// The server rejected the credentials. The session stops.
    AuthFailed(String),
    /// First sync frame applied
    Synced {
        /// Whether any text container holds content after the sync
        has_content: bool,
    },
    /// The connection closed
    Disconnected {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
    /// A connection attempt or an open connection failed
    Error(String),
    /// Participant presence changed
    Awareness(Vec<AwarenessEntry>),
}

/// A session event plus the generation of the session that emitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEnvelope {
    /// Generation of the emitting session
    pub generation: u64,
    /// The event
    pub event: SessionEvent,
}

/// Transport-level tuning for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Consecutive failed connections tolerated before giving up
    pub max_reconnect_attempts: u32,
    /// Fixed delay between reconnects
    pub reconnect_delay: Duration,
    /// Local updates held while not synced; the oldest are dropped beyond this
    pub offline_queue_limit: usize,
    /// Name announced in awareness, if any
    pub local_user: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
            offline_queue_limit: 512,
            local_user: None,
        }
    }
}

impl SessionConfig {
    /// Session settings derived from the collaboration config.
    pub fn from_config(config: &CollabConfig, local_user: Option<String>) -> Self {
        Self {
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            local_user,
            ..Default::default()
        }
    }
}

/// Handle to a running session task.
///
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub struct TransportSession {
    generation: u64,
    key: DocumentKey,
    state: Arc<Mutex<SessionState>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TransportSession {
    /// Start a session for `handle` and begin connecting.
    ///
    /// Must be called inside a tokio runtime. Fails only if the endpoint is
    /// invalid or the document is already destroyed.
    pub fn connect(
        generation: u64,
        handle: Arc<SharedDocumentHandle>,
        params: ConnectionParams,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        detector: FatalErrorDetector,
        events: mpsc::UnboundedSender<SessionEnvelope>,
    ) -> Result<Self> {
        let key = handle.key().clone();
        let request = ConnectionRequest::new(key.clone(), params)?;

        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let subscription = handle.subscribe(move |update: SyncUpdate| {
            if update.origin.is_local() {
                let _ = local_tx.send(update);
            }
        })?;

        let state = Arc::new(Mutex::new(SessionState::Connecting));
        let cancel = CancellationToken::new();
        let queue = OfflineQueue::new(config.offline_queue_limit);

        let worker = SessionWorker {
            generation,
            handle,
            request,
            transport,
            config,
            detector,
            events,
            state: Arc::clone(&state),
            cancel: cancel.clone(),
            local_rx,
            subscription,
            queue,
            awareness_clock: 0,
        };

        log::info!(
            "[TransportSession] Starting session {} for {}",
            generation,
            key
        );
        let task = tokio::spawn(worker.run());

        Ok(Self {
            generation,
            key,
            state,
            cancel,
            task: Some(task),
        })
    }

    /// Generation number of this session.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Document this session serves.
    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the session as being torn down for recovery.
    pub fn mark_recovering(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = SessionState::Recovering;
    }

    /// Stop the session. Takes effect immediately; the task exits on its own.
    pub fn disconnect(&self) {
        self.cancel.cancel();
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = SessionState::Disconnected;
    }

    /// Whether the session task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Wait for the session task to exit without cancelling it.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            log::error!("[TransportSession] Session task failed: {}", e);
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel.cancel();
        }
    }
}

/// Encoded local updates awaiting a synced connection.
///
/// Never drops an update: a later replace-all edit deletes items that only
/// exist in earlier updates, so losing one would leave the server unable to
/// integrate the rest. Once `limit` entries are held they are merged into a
/// single update.
#[derive(Debug)]
struct OfflineQueue {
    items: VecDeque<Vec<u8>>,
    limit: usize,
}

impl OfflineQueue {
    fn new(limit: usize) -> Self {
        Self {
            items: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    fn push(&mut self, update: Vec<u8>) {
        self.items.push_back(update);
        if self.items.len() <= self.limit {
            return;
        }
        match yrs::merge_updates_v1(self.items.iter()) {
            Ok(merged) => {
                log::debug!(
                    "[TransportSession] Offline queue over {} entries, merged {} updates",
                    self.limit,
                    self.items.len()
                );
                self.items.clear();
                self.items.push_back(merged);
            }
            Err(e) => {
                log::warn!(
                    "[TransportSession] Failed to merge offline queue ({} entries): {}",
                    self.items.len(),
                    e
                );
            }
        }
    }

    fn drain(&mut self) -> Vec<Vec<u8>> {
        self.items.drain(..).collect()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

enum Outcome {
    /// Cancelled by the owner
    Cancelled,
    /// Stopped for good (credentials rejected or document gone)
    Stopped,
    /// Peer closed the connection
    Closed { code: u16, reason: String },
    /// The connection failed
    Failed(String),
}

enum Step {
    Cancel,
    Local(SyncUpdate),
    Incoming(Result<Incoming>),
}

enum Flow {
    Continue,
    AuthFailed,
}

struct SessionWorker {
    generation: u64,
    handle: Arc<SharedDocumentHandle>,
    request: ConnectionRequest,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    detector: FatalErrorDetector,
    events: mpsc::UnboundedSender<SessionEnvelope>,
    state: Arc<Mutex<SessionState>>,
    cancel: CancellationToken,
    local_rx: mpsc::UnboundedReceiver<SyncUpdate>,
    subscription: SubscriptionId,
    queue: OfflineQueue,
    awareness_clock: u64,
}

impl SessionWorker {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            log::debug!(
                "[TransportSession] {} {:?} -> {:?}",
                self.generation,
                *state,
                next
            );
            *state = next;
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(SessionEnvelope {
            generation: self.generation,
            event,
        });
    }

    async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            self.set_state(SessionState::Connecting);
            self.emit(SessionEvent::Connecting);

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.transport.connect(&self.request) => result,
            };

            let outcome = match connected {
                Ok(conn) => self.drive(conn, &mut failures).await,
                Err(e) => {
                    log::warn!("[TransportSession] Connection failed: {}", e);
                    Outcome::Failed(e.to_string())
                }
            };

            match outcome {
                Outcome::Cancelled | Outcome::Stopped => break,
                Outcome::Closed { code, reason } => {
                    log::info!(
                        "[TransportSession] Connection closed: {} {}",
                        code,
                        reason
                    );
                    self.set_state(SessionState::Error);
                    self.emit(SessionEvent::Disconnected { code, reason });
                }
                Outcome::Failed(message) => {
                    self.set_state(SessionState::Error);
                    self.emit(SessionEvent::Error(message));
                }
            }

            failures += 1;
            if failures > self.config.max_reconnect_attempts {
                log::error!("[TransportSession] Max reconnect attempts reached");
                self.emit(SessionEvent::Error(
                    "Max reconnect attempts reached".to_string(),
                ));
                break;
            }

            log::info!(
                "[TransportSession] Reconnecting in {}ms (attempt {}/{})",
                self.config.reconnect_delay.as_millis(),
                failures,
                self.config.max_reconnect_attempts
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }

        self.handle.unsubscribe(self.subscription);
        if self.cancel.is_cancelled() {
            self.set_state(SessionState::Disconnected);
        }
        log::info!("[TransportSession] Session {} ended", self.generation);
    }

    async fn drive(&mut self, mut conn: Box<dyn Connection>, failures: &mut u32) -> Outcome {
        self.set_state(SessionState::Authenticating);

        let token = Message::Auth(AuthMessage::Token(self.request.params.token()));
        if let Err(e) = conn.send(token.encode()).await {
            return Outcome::Failed(e.to_string());
        }

        loop {
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Cancel,
                Some(update) = self.local_rx.recv() => Step::Local(update),
                incoming = conn.recv() => Step::Incoming(incoming),
            };

            match step {
                Step::Cancel => {
                    self.leave(&mut conn).await;
                    if let Err(e) = conn.close().await {
                        log::debug!("[TransportSession] Close failed: {}", e);
                    }
                    return Outcome::Cancelled;
                }
                Step::Local(update) => {
                    if self.state() == SessionState::Synced {
                        let frame = Message::Sync(SyncMessage::Update(update.data)).encode();
                        if let Err(e) = conn.send(frame).await {
                            return Outcome::Failed(e.to_string());
                        }
                    } else {
                        self.queue.push(update.data);
                    }
                }
                Step::Incoming(Ok(Incoming::Frame(bytes))) => {
                    match self.handle_frame(&mut conn, &bytes, failures).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::AuthFailed) => {
                            let _ = conn.close().await;
                            return Outcome::Stopped;
                        }
                        Err(CollabError::DocumentDestroyed) => {
                            log::debug!("[TransportSession] Document destroyed, stopping");
                            return Outcome::Stopped;
                        }
                        Err(e) => return Outcome::Failed(e.to_string()),
                    }
                }
                Step::Incoming(Ok(Incoming::Closed { code, reason })) => {
                    return Outcome::Closed { code, reason };
                }
                Step::Incoming(Err(e)) => return Outcome::Failed(e.to_string()),
            }
        }
    }

    async fn handle_frame(
        &mut self,
        conn: &mut Box<dyn Connection>,
        bytes: &[u8],
        failures: &mut u32,
    ) -> Result<Flow> {
        let message = match Message::decode(bytes) {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(Flow::Continue),
            Err(e) => {
                self.detector.report_error(&e, self.generation);
                return Ok(Flow::Continue);
            }
        };

        match message {
            Message::Auth(AuthMessage::Authenticated(scope)) => {
                if self.state() != SessionState::Authenticating {
                    log::debug!("[TransportSession] Duplicate authentication ack ignored");
                    return Ok(Flow::Continue);
                }
                log::info!("[TransportSession] Authenticated (scope: {})", scope);
                *failures = 0;
                self.set_state(SessionState::Connected);
                self.emit(SessionEvent::Connected);

                let sv = self.handle.encode_state_vector()?;
                conn.send(Message::Sync(SyncMessage::SyncStep1(sv)).encode())
                    .await?;
                self.announce(conn).await?;
            }
            Message::Auth(AuthMessage::PermissionDenied(reason)) => {
                log::warn!("[TransportSession] Authentication rejected: {}", reason);
                self.set_state(SessionState::Error);
                self.emit(SessionEvent::AuthFailed(reason));
                return Ok(Flow::AuthFailed);
            }
            Message::Auth(AuthMessage::Token(_)) => {
                log::debug!("[TransportSession] Ignoring token frame from server");
            }
            Message::Sync(_) if self.state() == SessionState::Authenticating => {
                log::debug!("[TransportSession] Ignoring sync frame before authentication");
            }
            Message::Sync(SyncMessage::SyncStep1(sv)) => match self.handle.encode_diff(&sv) {
                Ok(diff) => {
                    conn.send(Message::Sync(SyncMessage::SyncStep2(diff)).encode())
                        .await?;
                }
                Err(e) if e.fatal_signature().is_some() => {
                    self.detector.report_error(&e, self.generation);
                }
                Err(e) => return Err(e),
            },
            Message::Sync(SyncMessage::SyncStep2(update)) => {
                // A step 2 that failed to apply is not a sync
                if self.apply_remote(&update)? && self.state() != SessionState::Synced {
                    self.on_synced(conn).await?;
                }
            }
            Message::Sync(SyncMessage::Update(update)) => {
                self.apply_remote(&update)?;
            }
            Message::Awareness(entries) => {
                self.emit(SessionEvent::Awareness(entries));
            }
        }
        Ok(Flow::Continue)
    }

    /// Apply an inbound update, routing fatal failures to the detector.
    ///
    /// Returns whether the update was applied.
    fn apply_remote(&self, update: &[u8]) -> Result<bool> {
        match self.handle.apply_remote_update(update, UpdateOrigin::Remote) {
            Ok(()) => Ok(true),
            Err(e) if self.detector.report_error(&e, self.generation).is_some() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn on_synced(&mut self, conn: &mut Box<dyn Connection>) -> Result<()> {
        let has_content = self.handle.has_content()?;
        self.set_state(SessionState::Synced);
        log::info!(
            "[TransportSession] Synced {} (has content: {})",
            self.request.key,
            has_content
        );
        self.emit(SessionEvent::Synced { has_content });

        if self.queue.len() > 0 {
            log::debug!(
                "[TransportSession] Flushing {} queued updates",
                self.queue.len()
            );
        }
        for update in self.queue.drain() {
            conn.send(Message::Sync(SyncMessage::Update(update)).encode())
                .await?;
        }
        Ok(())
    }

    async fn announce(&mut self, conn: &mut Box<dyn Connection>) -> Result<()> {
        let Some(user) = self.config.local_user.clone() else {
            return Ok(());
        };
        let state = serde_json::json!({ "user": { "name": user } }).to_string();
        self.send_awareness(conn, state).await
    }

    async fn leave(&mut self, conn: &mut Box<dyn Connection>) {
        if self.config.local_user.is_none() || self.awareness_clock == 0 {
            return;
        }
        if let Err(e) = self.send_awareness(conn, "null".to_string()).await {
            log::debug!("[TransportSession] Failed to announce departure: {}", e);
        }
    }

    async fn send_awareness(&mut self, conn: &mut Box<dyn Connection>, state: String) -> Result<()> {
        self.awareness_clock += 1;
        let entry = AwarenessEntry {
            client_id: self.handle.client_id(),
            clock: self.awareness_clock,
            state,
        };
        conn.send(Message::Awareness(vec![entry]).encode()).await
    }
}
