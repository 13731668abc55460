//! Collaborator presence.
//!
//! Awareness records carry a JSON state per participant. The tracker pulls a
//! user name out of each record and folds every name other than the local
//! user's into the draft's author list.

use std::collections::HashMap;

use indexmap::IndexSet;
use serde::Deserialize;

use crate::crdt::AwarenessEntry;

#[derive(Deserialize)]
struct AwarenessState {
    user: Option<AwarenessUser>,
}

#[derive(Deserialize)]
struct AwarenessUser {
    name: Option<String>,
}

/// Tracks connected participants and the accumulated author list.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    local_user: Option<String>,
    authors: IndexSet<String>,
    active: HashMap<u64, String>,
}

impl PresenceTracker {
    /// Create a tracker for `local_user`.
    pub fn new(local_user: Option<String>) -> Self {
        Self {
            local_user,
            ..Default::default()
        }
    }

    /// Seed the author list (e.g. from the draft's existing metadata).
    pub fn with_authors<I: IntoIterator<Item = String>>(mut self, authors: I) -> Self {
        self.authors.extend(authors);
        self
    }

    /// Fold an awareness update into the tracker.
    ///
    /// Returns the names that were newly added to the author list. A record
    /// that fails to parse is skipped without affecting the others.
    pub fn on_awareness_update(&mut self, entries: &[AwarenessEntry]) -> Vec<String> {
        let mut added = Vec::new();
        for entry in entries {
            if entry.is_removal() {
                if let Some(name) = self.active.remove(&entry.client_id) {
                    log::debug!("[Presence] {} left", name);
                }
                continue;
            }

            let name = match parse_user_name(&entry.state) {
                Ok(Some(name)) => name,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!(
                        "[Presence] Skipping awareness record for client {}: {}",
                        entry.client_id,
                        e
                    );
                    continue;
                }
            };

            self.active.insert(entry.client_id, name.clone());
            if self.local_user.as_deref() == Some(name.as_str()) {
                continue;
            }
            if self.authors.insert(name.clone()) {
                log::info!("[Presence] New author {}", name);
                added.push(name);
            }
        }
        added
    }

    /// Authors in the order they were first seen.
    pub fn authors(&self) -> Vec<String> {
        self.authors.iter().cloned().collect()
    }

    /// Names of currently connected participants, sorted.
    pub fn active_users(&self) -> Vec<String> {
        let mut names: Vec<String> = self.active.values().cloned().collect();
        names.sort();
        names.dedup();
        names
    }

    /// Forget who is connected. The author list is kept.
    pub fn clear_active(&mut self) {
        self.active.clear();
    }
}

fn parse_user_name(state: &str) -> Result<Option<String>, serde_json::Error> {
    let state: AwarenessState = serde_json::from_str(state)?;
    Ok(state
        .user
        .and_then(|u| u.name)
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(client_id: u64, state: &str) -> AwarenessEntry {
        AwarenessEntry {
            client_id,
            clock: 1,
            state: state.to_string(),
        }
    }

    fn user(client_id: u64, name: &str) -> AwarenessEntry {
        entry(client_id, &format!(r#"{{"user":{{"name":"{}"}}}}"#, name))
    }

    #[test]
    fn test_authors_added_once() {
        let mut tracker = PresenceTracker::new(Some("alice".into()));
        let states = vec![user(1, "alice"), user(2, "bob"), user(3, "carol")];

        assert_eq!(tracker.on_awareness_update(&states), vec!["bob", "carol"]);
        assert!(tracker.on_awareness_update(&states).is_empty());
        assert_eq!(tracker.authors(), vec!["bob", "carol"]);
    }

    #[test]
    fn test_bad_record_is_isolated() {
        let mut tracker = PresenceTracker::new(None);
        let states = vec![
            entry(1, "{not json"),
            entry(2, r#"{"cursor":{"index":4}}"#),
            user(3, "dave"),
        ];
        assert_eq!(tracker.on_awareness_update(&states), vec!["dave"]);
    }

    #[test]
    fn test_removal_updates_active_users() {
        let mut tracker = PresenceTracker::new(None);
        tracker.on_awareness_update(&[user(1, "bob"), user(2, "erin")]);
        assert_eq!(tracker.active_users(), vec!["bob", "erin"]);

        tracker.on_awareness_update(&[entry(1, "null")]);
        assert_eq!(tracker.active_users(), vec!["erin"]);
        // Leaving doesn't remove authorship
        assert_eq!(tracker.authors(), vec!["bob", "erin"]);
    }

    #[test]
    fn test_seeded_authors_not_reported() {
        let mut tracker = PresenceTracker::new(None).with_authors(vec!["bob".to_string()]);
        assert!(tracker.on_awareness_update(&[user(5, "bob")]).is_empty());
    }
}
