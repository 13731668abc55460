//! `join` command handler.
//!
//! Connects to a collaborative draft over WebSocket, turns stdin lines into
//! field edits and prints core events as they arrive.

use std::str::FromStr;
use std::sync::Arc;

use draftsync_core::crdt::DocumentKey;
use draftsync_core::transport::{ConnectionParams, WebSocketTransport};
use draftsync_core::{
    CollabConfig, CollabController, ConnectionStatus, CoreEvent, DraftField, LocalDraft,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::cli::args::JoinArgs;

/// One line of interactive input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Edit(DraftField, String),
    Save,
    Status,
    Draft,
    Authors,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim_end_matches(['\r', '\n']);
    match line.trim() {
        "" => return Input::Empty,
        "/save" => return Input::Save,
        "/status" => return Input::Status,
        "/draft" => return Input::Draft,
        "/authors" => return Input::Authors,
        "/quit" | "/exit" => return Input::Quit,
        _ => {}
    }

    if let Some((name, value)) = line.split_once(':')
        && let Ok(field) = DraftField::from_str(name.trim())
    {
        return Input::Edit(field, value.strip_prefix(' ').unwrap_or(value).to_string());
    }
    Input::Unknown(line.trim().to_string())
}

/// Resolve the connection parameters from flags, falling back to config.
fn resolve_params(args: &JoinArgs, config: &CollabConfig) -> Result<ConnectionParams, String> {
    let endpoint = args
        .endpoint
        .clone()
        .or_else(|| config.endpoint.clone())
        .ok_or("No endpoint given. Pass --endpoint or run 'draftsync config --endpoint <url>'")?;
    let account = args
        .account
        .clone()
        .or_else(|| config.account.clone())
        .ok_or("No account given. Pass --account or run 'draftsync config --account <name>'")?;
    let public_key = args
        .public_key
        .clone()
        .or_else(|| config.public_key.clone())
        .ok_or("No public key given. Pass --public-key or run 'draftsync config --public-key <key>'")?;

    Ok(ConnectionParams {
        endpoint,
        account,
        challenge: args.challenge.clone(),
        public_key,
        signature: args.signature.clone(),
    })
}

pub fn handle_join(args: JoinArgs) -> bool {
    let config = match CollabConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return false;
        }
    };

    let params = match resolve_params(&args, &config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}", e);
            return false;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {}", e);
            return false;
        }
    };

    let key = DocumentKey::new(args.owner.as_str(), args.permlink.as_str());
    let user = args.user.clone().or_else(|| Some(params.account.clone()));

    println!("Joining draft...");
    println!("  Server: {}", params.endpoint);
    println!("  Document: {}", key);
    println!();

    let ok = runtime.block_on(run_session(config, key, params, user, args.json));
    println!("Left draft.");
    ok
}

async fn run_session(
    config: CollabConfig,
    key: DocumentKey,
    params: ConnectionParams,
    user: Option<String>,
    json: bool,
) -> bool {
    let (controller, mut events) = CollabController::spawn(
        config,
        Arc::new(WebSocketTransport::new()),
        LocalDraft::default(),
        user,
    );

    if let Err(e) = controller.enable_collaboration(key, params).await {
        eprintln!("Failed to join draft: {}", e);
        let _ = controller.shutdown().await;
        return false;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    eprintln!("Failed to listen for Ctrl+C: {}", e);
                }
                println!("\nLeaving draft...");
                break;
            }
            event = events.recv() => match event {
                Some(event) => print_event(&event, json),
                None => break,
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !handle_input(&controller, parse_input(&line)).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    eprintln!("Failed to read stdin: {}", e);
                    break;
                }
            },
        }
    }

    if let Err(e) = controller.shutdown().await {
        log::warn!("Shutdown failed: {}", e);
    }
    drain_events(&mut events, json);
    true
}

/// Returns false when the user asked to quit.
async fn handle_input(controller: &CollabController, input: Input) -> bool {
    match input {
        Input::Edit(field, value) => {
            if let Err(e) = controller.on_field_edited(field, value) {
                eprintln!("Edit failed: {}", e);
            }
        }
        Input::Save => match controller.manual_save_requested().await {
            Ok(report) => println!(
                "Saved at {}{}",
                report
                    .saved_at
                    .with_timezone(&chrono::Local)
                    .format("%H:%M:%S"),
                if report.synced { "" } else { " (not synced)" }
            ),
            Err(e) => eprintln!("Save failed: {}", e),
        },
        Input::Status => match controller.status().await {
            Ok(status) => println!("Status: {}", status),
            Err(e) => eprintln!("Status unavailable: {}", e),
        },
        Input::Draft => match controller.draft().await {
            Ok(draft) => {
                println!("Title: {}", draft.title);
                println!("Permlink: {}", draft.permlink);
                println!("Tags: {}", draft.tags);
                println!("Body:\n{}", draft.body);
            }
            Err(e) => eprintln!("Draft unavailable: {}", e),
        },
        Input::Authors => {
            match controller.authors().await {
                Ok(authors) if authors.is_empty() => println!("No collaborators yet."),
                Ok(authors) => println!("Authors: {}", authors.join(", ")),
                Err(e) => eprintln!("Authors unavailable: {}", e),
            }
            if let Ok(online) = controller.active_users().await
                && !online.is_empty()
            {
                println!("Online: {}", online.join(", "));
            }
        }
        Input::Quit => return false,
        Input::Empty => {}
        Input::Unknown(line) => {
            eprintln!(
                "Unrecognised input '{}'. Use 'title: ...', 'body: ...', 'tags: ...' or /save, /status, /draft, /authors, /quit",
                line
            );
        }
    }
    true
}

fn drain_events(events: &mut mpsc::UnboundedReceiver<CoreEvent>, json: bool) {
    while let Ok(event) = events.try_recv() {
        print_event(&event, json);
    }
}

fn print_event(event: &CoreEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => log::warn!("Failed to serialize event: {}", e),
        }
        return;
    }

    match event {
        CoreEvent::ConnectionStatusChanged(status) => {
            println!("[status] {}", status);
            match status {
                ConnectionStatus::AuthFailed => {
                    eprintln!("  The server rejected the credentials. Sign a fresh challenge and rejoin.")
                }
                ConnectionStatus::RecoveryFailed => {
                    eprintln!("  Collaboration stopped. Edits stay local to this session.")
                }
                _ => {}
            }
        }
        CoreEvent::LocalDraftChanged(changes) => {
            if let Some(title) = &changes.title {
                println!("[remote] title: {}", title);
            }
            if let Some(permlink) = &changes.permlink {
                println!("[remote] permlink: {}", permlink);
            }
            if let Some(tags) = &changes.tags {
                println!("[remote] tags: {}", tags);
            }
            if let Some(body) = &changes.body {
                println!("[remote] body: {} chars", body.chars().count());
            }
        }
        CoreEvent::AuthorDetected(name) => println!("[author] {} joined", name),
        CoreEvent::Checkpoint(report) => println!(
            "[saved] {} ({} fields{})",
            report
                .saved_at
                .with_timezone(&chrono::Local)
                .format("%H:%M:%S"),
            report.fields.len(),
            if report.synced { ", synced" } else { "" }
        ),
    }
}
