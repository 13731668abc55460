//! The locally edited draft record.
//!
//! `LocalDraft` is plain last-write-wins data owned by the UI. The sync core
//! only reads it and conditionally overwrites its title, body and tags.

use serde::{Deserialize, Serialize};

/// One of the three replicated text fields of a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftField {
    /// Post title
    Title,
    /// Post body (markdown)
    Body,
    /// Space-joined tag list
    Tags,
}

impl DraftField {
    /// All replicated fields, in push order.
    pub const ALL: [DraftField; 3] = [DraftField::Title, DraftField::Body, DraftField::Tags];

    /// Name of the shared text container backing this field.
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftField::Title => "title",
            DraftField::Body => "body",
            DraftField::Tags => "tags",
        }
    }
}

impl std::fmt::Display for DraftField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DraftField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(DraftField::Title),
            "body" => Ok(DraftField::Body),
            "tags" => Ok(DraftField::Tags),
            _ => Err(format!("Unknown draft field: {}", s)),
        }
    }
}

/// A reward beneficiary attached to a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiary {
    /// Receiving account
    pub account: String,
    /// Share in basis points (10000 = 100%)
    pub weight: u16,
}

/// The UI-facing draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalDraft {
    /// Post title
    pub title: String,
    /// Post body
    pub body: String,
    /// Tags, space-joined
    pub tags: String,
    /// URL slug derived from the title
    pub permlink: String,
    /// Reward beneficiaries (not replicated)
    #[serde(default)]
    pub beneficiaries: Vec<Beneficiary>,
    /// Free-form post metadata (not replicated)
    #[serde(default)]
    pub custom_json: serde_json::Map<String, serde_json::Value>,
}

impl LocalDraft {
    /// Create a draft with the three replicated fields set.
    ///
    /// The permlink is derived from the title.
    pub fn new(title: impl Into<String>, body: impl Into<String>, tags: impl Into<String>) -> Self {
        let title = title.into();
        let permlink = derive_permlink(&title);
        Self {
            title,
            body: body.into(),
            tags: tags.into(),
            permlink,
            ..Default::default()
        }
    }

    /// Current value of a replicated field.
    pub fn get(&self, field: DraftField) -> &str {
        match field {
            DraftField::Title => &self.title,
            DraftField::Body => &self.body,
            DraftField::Tags => &self.tags,
        }
    }

    /// Overwrite a replicated field. Title writes regenerate the permlink.
    pub fn set(&mut self, field: DraftField, value: impl Into<String>) {
        let value = value.into();
        match field {
            DraftField::Title => {
                self.permlink = derive_permlink(&value);
                self.title = value;
            }
            DraftField::Body => self.body = value,
            DraftField::Tags => self.tags = value,
        }
    }

    /// Set tags from a list, joining with single spaces.
    pub fn set_tag_list<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = tags
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
    }

    /// Tags as a list.
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags.split_whitespace().collect()
    }

    /// Whether any replicated field has content.
    pub fn has_content(&self) -> bool {
        DraftField::ALL.iter().any(|f| !self.get(*f).is_empty())
    }
}

/// Fields changed by a pull, reported to the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftChanges {
    /// New title, if it changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New body, if it changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// New tags, if they changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    /// Regenerated permlink, when the title changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permlink: Option<String>,
}

impl DraftChanges {
    /// True when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none() && self.tags.is_none()
    }

    pub(crate) fn record(&mut self, field: DraftField, value: &str) {
        let slot = match field {
            DraftField::Title => &mut self.title,
            DraftField::Body => &mut self.body,
            DraftField::Tags => &mut self.tags,
        };
        *slot = Some(value.to_string());
    }

    /// Fold later changes on top of these.
    pub fn merge(&mut self, later: DraftChanges) {
        if later.title.is_some() {
            self.title = later.title;
            self.permlink = later.permlink;
        }
        if later.body.is_some() {
            self.body = later.body;
        }
        if later.tags.is_some() {
            self.tags = later.tags;
        }
    }
}

/// Derive a URL slug from a title.
///
/// Lower-cases, turns whitespace runs into single hyphens and strips every
/// character that is not a word character or hyphen.
pub fn derive_permlink(title: &str) -> String {
    let hyphenated = title
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");

    let mut slug = String::with_capacity(hyphenated.len());
    for c in hyphenated.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c);
        } else if c == '-' && !slug.ends_with('-') {
            slug.push(c);
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_permlink() {
        assert_eq!(derive_permlink("My First Post!! 2024"), "my-first-post-2024");
        assert_eq!(derive_permlink("  Hello   World  "), "hello-world");
        assert_eq!(derive_permlink("snake_case stays"), "snake_case-stays");
        assert_eq!(derive_permlink("!!!"), "");
        assert_eq!(derive_permlink("a - b"), "a-b");
    }

    #[test]
    fn test_set_title_regenerates_permlink() {
        let mut draft = LocalDraft::default();
        draft.set(DraftField::Title, "Rust & CRDTs");
        assert_eq!(draft.title, "Rust & CRDTs");
        assert_eq!(draft.permlink, "rust-crdts");

        draft.set(DraftField::Body, "text");
        assert_eq!(draft.permlink, "rust-crdts");
    }

    #[test]
    fn test_tag_list() {
        let mut draft = LocalDraft::default();
        draft.set_tag_list(["rust", " ", "crdt ", "sync"]);
        assert_eq!(draft.tags, "rust crdt sync");
        assert_eq!(draft.tag_list(), vec!["rust", "crdt", "sync"]);
    }

    #[test]
    fn test_has_content() {
        assert!(!LocalDraft::default().has_content());
        assert!(LocalDraft::new("", "", "x").has_content());
    }

    #[test]
    fn test_draft_field_parse() {
        assert_eq!("body".parse::<DraftField>().unwrap(), DraftField::Body);
        assert!("permlink".parse::<DraftField>().is_err());
    }

    #[test]
    fn test_draft_changes_merge() {
        let mut first = DraftChanges {
            title: Some("A".into()),
            permlink: Some("a".into()),
            ..Default::default()
        };
        first.merge(DraftChanges {
            body: Some("B".into()),
            ..Default::default()
        });
        assert_eq!(first.title.as_deref(), Some("A"));
        assert_eq!(first.permlink.as_deref(), Some("a"));
        assert_eq!(first.body.as_deref(), Some("B"));
        assert!(!first.is_empty());
        assert!(DraftChanges::default().is_empty());
    }

    #[test]
    fn test_draft_changes_serialize_skips_unset() {
        let changes = DraftChanges {
            tags: Some("x y".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&changes).unwrap();
        assert_eq!(json, r#"{"tags":"x y"}"#);
    }
}
