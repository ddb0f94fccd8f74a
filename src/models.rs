//! Core data models shared by the sync engine and the citation resolver.
//!
//! [`DocumentRecord`] is the only persisted type. Everything else is
//! produced and consumed within a single sync pass or a single answer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the Record Store knows about one document, keyed by name.
///
/// The revision markers are opaque strings supplied by the external store
/// and are only ever compared for equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Id of the item in the external store, used to fetch content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Marker last seen by the change detector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_revision: Option<String>,
    /// Marker of the last upload the index confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_revision: Option<String>,
    /// Object currently live in the search index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_object_id: Option<String>,
    /// Object created in the index but not yet confirmed searchable.
    /// Deleted before the next upload of this name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl DocumentRecord {
    pub fn is_indexed(&self) -> bool {
        self.indexed_object_id.is_some()
    }

    /// True when the observed revision has not been confirmed by an upload.
    pub fn is_pending(&self) -> bool {
        self.observed_revision != self.synced_revision
            || !self.is_indexed()
            || self.pending_object_id.is_some()
    }

    /// Every index object this record may still own.
    pub fn live_objects(&self) -> impl Iterator<Item = &str> {
        self.indexed_object_id
            .as_deref()
            .into_iter()
            .chain(self.pending_object_id.as_deref())
    }
}

/// Name → record mapping. Ordered so persisted output is stable.
pub type RecordMap = BTreeMap<String, DocumentRecord>;

/// Kind of an entry in an external store listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    File,
    Folder,
    WebLink,
    Other,
}

impl ItemKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "file" => ItemKind::File,
            "folder" => ItemKind::Folder,
            "web_link" => ItemKind::WebLink,
            _ => ItemKind::Other,
        }
    }
}

/// One entry of a live external store listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreItem {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
    pub revision: String,
}

impl StoreItem {
    pub fn file(id: impl Into<String>, name: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ItemKind::File,
            revision: revision.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    New,
    Modified,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::New => write!(f, "new"),
            ChangeKind::Modified => write!(f, "modified"),
        }
    }
}

/// A classified change produced by one detection pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEntry {
    pub name: String,
    pub kind: ChangeKind,
    pub revision: String,
    pub item_id: String,
}

/// Outcome counts of one synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub indexed: u64,
    pub failed: u64,
    pub pruned: u64,
}

impl std::ops::AddAssign for SyncReport {
    fn add_assign(&mut self, other: Self) {
        self.indexed += other.indexed;
        self.failed += other.failed;
        self.pruned += other.pruned;
    }
}

/// A citation span inside a generated answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Literal marker text as it appears in the answer, e.g. `【4:0†source】`.
    pub marker: String,
    /// Indexed object the span cites, when it cites one.
    pub object_id: Option<String>,
}

impl Annotation {
    pub fn new(marker: impl Into<String>, object_id: Option<&str>) -> Self {
        Self {
            marker: marker.into(),
            object_id: object_id.map(str::to_string),
        }
    }
}

/// Answer text with markers removed, plus its ordered source names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedAnswer {
    pub text: String,
    pub citations: Vec<String>,
}

/// One generated assistant turn, before citation resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssistantTurn {
    pub text: String,
    pub annotations: Vec<Annotation>,
}
