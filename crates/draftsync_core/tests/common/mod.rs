//! Scripted collaboration server and controller fixture shared by the
//! integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use draftsync_core::crdt::{
    AuthMessage, AwarenessEntry, DocumentKey, Message, SharedDocumentHandle, SyncMessage,
    UpdateOrigin,
};
use draftsync_core::transport::ConnectionParams;
use draftsync_core::transport::memory::{MemoryListener, MemoryTransport, ServerConnection};
use draftsync_core::{
    CollabConfig, CollabController, ConnectionStatus, CoreEvent, DraftField, LocalDraft,
};
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(10);

pub fn params() -> ConnectionParams {
    ConnectionParams {
        endpoint: "ws://memory/collab".into(),
        account: "alice".into(),
        challenge: "1700000000".into(),
        public_key: "STM5key".into(),
        signature: "sig".into(),
    }
}

pub fn key() -> DocumentKey {
    DocumentKey::new("alice", "draft")
}

pub struct Fixture {
    pub controller: CollabController,
    pub events: mpsc::UnboundedReceiver<CoreEvent>,
    pub listener: MemoryListener,
}

impl Fixture {
    pub fn spawn(draft: LocalDraft) -> Self {
        let (transport, listener) = MemoryTransport::new();
        let (controller, events) = CollabController::spawn(
            CollabConfig::default(),
            Arc::new(transport),
            draft,
            Some("alice".into()),
        );
        Self {
            controller,
            events,
            listener,
        }
    }

    pub async fn enable(&mut self) -> ServerConnection {
        self.controller
            .enable_collaboration(key(), params())
            .await
            .expect("enable collaboration");
        self.accept().await
    }

    pub async fn accept(&mut self) -> ServerConnection {
        tokio::time::timeout(WAIT, self.listener.accept())
            .await
            .expect("timed out waiting for a connection")
            .expect("listener closed")
    }

    pub async fn next_event(&mut self) -> CoreEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for a core event")
            .expect("event channel closed")
    }

    /// Read events until `status` is reported. Returns everything seen before it.
    pub async fn wait_for_status(&mut self, status: ConnectionStatus) -> Vec<CoreEvent> {
        let mut seen = Vec::new();
        loop {
            match self.next_event().await {
                CoreEvent::ConnectionStatusChanged(s) if s == status => return seen,
                other => seen.push(other),
            }
        }
    }

    /// Read events until one matches `pred`.
    pub async fn wait_for<F>(&mut self, mut pred: F) -> CoreEvent
    where
        F: FnMut(&CoreEvent) -> bool,
    {
        loop {
            let event = self.next_event().await;
            if pred(&event) {
                return event;
            }
        }
    }
}

/// The server's replica of the shared document.
pub fn replica(title: &str, body: &str) -> SharedDocumentHandle {
    let doc = SharedDocumentHandle::create(DocumentKey::new("server", "draft"));
    for (field, value) in [(DraftField::Title, title), (DraftField::Body, body)] {
        if !value.is_empty() {
            doc.apply_local_edit(field, value, UpdateOrigin::LocalEdit)
                .unwrap();
        }
    }
    doc
}

/// Accept the token, then answer the client's SyncStep1 from `replica`.
pub async fn handshake(server: &mut ServerConnection, replica: &SharedDocumentHandle) {
    assert_eq!(
        server.recv_message().await,
        Some(Message::Auth(AuthMessage::Token(
            "alice:1700000000:STM5key:sig".into()
        )))
    );
    server.send_message(&Message::Auth(AuthMessage::Authenticated(
        "read-write".into(),
    )));
    loop {
        match server.recv_message().await {
            Some(Message::Sync(SyncMessage::SyncStep1(sv))) => {
                let diff = replica.encode_diff(&sv).unwrap();
                server.send_message(&Message::Sync(SyncMessage::SyncStep2(diff)));
                return;
            }
            Some(_) => continue,
            None => panic!("client hung up during handshake"),
        }
    }
}

/// Next document update sent by the client, skipping awareness traffic.
pub async fn next_update(server: &mut ServerConnection) -> Option<Vec<u8>> {
    loop {
        match server.recv_message().await? {
            Message::Sync(SyncMessage::Update(update))
            | Message::Sync(SyncMessage::SyncStep2(update)) => return Some(update),
            _ => continue,
        }
    }
}

/// Apply a local edit on the replica and send the resulting delta to the client.
pub fn remote_edit(
    server: &ServerConnection,
    replica: &SharedDocumentHandle,
    field: DraftField,
    value: &str,
) {
    let before = replica.encode_state_vector().unwrap();
    replica
        .apply_local_edit(field, value, UpdateOrigin::LocalEdit)
        .unwrap();
    let delta = replica.encode_diff(&before).unwrap();
    server.send_message(&Message::Sync(SyncMessage::Update(delta)));
}

/// Awareness frame announcing the given `(client_id, name)` pairs.
pub fn awareness(users: &[(u64, &str)]) -> Message {
    Message::Awareness(
        users
            .iter()
            .map(|(client_id, name)| AwarenessEntry {
                client_id: *client_id,
                clock: 1,
                state: format!(r#"{{"user":{{"name":"{}"}}}}"#, name),
            })
            .collect(),
    )
}
