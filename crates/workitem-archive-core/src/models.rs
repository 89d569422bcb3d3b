//! Core data models: live documents, immutable snapshots, and the sync
//! metadata record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot_id;

/// Type marker prefixed to a snapshot's type so snapshots never collide
/// with live documents in a shared query namespace.
pub const SNAPSHOT_TYPE_PREFIX: &str = "snapshot-";

/// Item map: item name to its (multi-valued) list of values.
pub type Items = BTreeMap<String, Vec<ItemValue>>;

/// A single typed item value.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl ItemValue {
    /// String rendering used by restore filters and status output.
    pub fn as_text(&self) -> String {
        match self {
            ItemValue::Text(s) => s.clone(),
            ItemValue::Integer(i) => i.to_string(),
            ItemValue::Float(f) => f.to_string(),
            ItemValue::Boolean(b) => b.to_string(),
            ItemValue::Timestamp(ts) => ts.to_rfc3339(),
        }
    }
}

impl From<&str> for ItemValue {
    fn from(s: &str) -> Self {
        ItemValue::Text(s.to_string())
    }
}

/// A named file attachment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileData {
    pub content_type: String,
    pub content: Vec<u8>,
    pub attributes: Items,
    /// Set on a snapshot file whose content was found neither on the
    /// document nor in the previous snapshot.
    pub missing_content: bool,
}

impl FileData {
    /// Content stored on an origin document once the bytes have moved into
    /// a snapshot.
    pub const PLACEHOLDER: [u8; 1] = [0];

    pub fn new(content_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            content,
            attributes: Items::new(),
            missing_content: false,
        }
    }

    /// True when the file carries no real content (empty or the 1-byte
    /// placeholder).
    pub fn is_placeholder(&self) -> bool {
        self.content.is_empty() || self.content == Self::PLACEHOLDER
    }

    /// Copy of this file with the content replaced by the placeholder.
    pub fn stripped(&self) -> Self {
        Self {
            content_type: self.content_type.clone(),
            content: Self::PLACEHOLDER.to_vec(),
            attributes: self.attributes.clone(),
            missing_content: false,
        }
    }
}

/// A mutable business entity owned by the workflow layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub doc_type: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub items: Items,
    pub files: BTreeMap<String, FileData>,
    /// `$snapshotID`: reference to the current snapshot of this document.
    pub snapshot_id: Option<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, doc_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            doc_type: doc_type.into(),
            created: now,
            modified: now,
            items: Items::new(),
            files: BTreeMap::new(),
            snapshot_id: None,
        }
    }

    pub fn set_item(&mut self, name: impl Into<String>, value: ItemValue) {
        self.items.insert(name.into(), vec![value]);
    }

    pub fn add_file(&mut self, name: impl Into<String>, file: FileData) {
        self.files.insert(name.into(), file);
    }
}

/// An immutable copy of a [`Document`] at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// `<origin_id>-<creation millis>`.
    pub id: String,
    pub origin_id: String,
    /// Origin type prefixed with [`SNAPSHOT_TYPE_PREFIX`].
    pub doc_type: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub items: Items,
    pub files: BTreeMap<String, FileData>,
}

impl Snapshot {
    /// Build a snapshot of `doc` taken at `millis`.
    pub fn of(doc: &Document, millis: i64) -> Self {
        let ts = snapshot_id::to_datetime(millis);
        Self {
            id: snapshot_id::make(&doc.id, millis),
            origin_id: doc.id.clone(),
            doc_type: snapshot_type(&doc.doc_type),
            created: ts,
            modified: ts,
            items: doc.items.clone(),
            files: doc.files.clone(),
        }
    }

    /// The type of the origin document, without the snapshot marker.
    pub fn origin_type(&self) -> &str {
        self.doc_type
            .strip_prefix(SNAPSHOT_TYPE_PREFIX)
            .unwrap_or(&self.doc_type)
    }

    pub fn modified_millis(&self) -> i64 {
        self.modified.timestamp_millis()
    }

    /// Total number of content bytes across all file attachments.
    pub fn content_size(&self) -> u64 {
        self.files.values().map(|f| f.content.len() as u64).sum()
    }

    /// String values of an item as seen from the origin document.
    ///
    /// `type` resolves to the origin type; every other name reads the item map.
    pub fn item_texts(&self, name: &str) -> Vec<String> {
        if name == "type" {
            return vec![self.origin_type().to_string()];
        }
        self.items
            .get(name)
            .map(|values| values.iter().map(ItemValue::as_text).collect())
            .unwrap_or_default()
    }

    /// Names of the files flagged with missing content.
    pub fn missing_files(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter(|(_, f)| f.missing_content)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Copy without any file content (names, types and attributes kept).
    pub fn without_content(&self) -> Self {
        let mut copy = self.clone();
        for file in copy.files.values_mut() {
            file.content.clear();
        }
        copy
    }
}

/// Prefix an origin type with the snapshot marker.
pub fn snapshot_type(origin_type: &str) -> String {
    format!("{}{}", SNAPSHOT_TYPE_PREFIX, origin_type)
}

/// A restore filter: at least one value of `item_name` must match `regex`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOption {
    pub item_name: String,
    pub regex: String,
}

/// Cursor of the export engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportCursor {
    /// Highest exported modification time (ms).
    pub point: i64,
    pub count: u64,
    pub size: u64,
    pub errors: u64,
}

/// Cursor of the import engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCursor {
    /// Highest imported modification time (ms).
    pub point: i64,
    pub count: u64,
    pub size: u64,
    #[serde(default)]
    pub errors: u64,
}

/// Cursor of the restore engine, including the window being restored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreCursor {
    pub from: i64,
    pub to: i64,
    /// Start of the next day bucket to scan (ms).
    pub point: i64,
    pub count: u64,
    pub size: u64,
    pub errors: u64,
    #[serde(default)]
    pub options: Vec<FilterOption>,
}

impl RestoreCursor {
    /// A window is pending while it is non-empty and not yet consumed.
    pub fn is_pending(&self) -> bool {
        self.to > 0 && self.point <= self.to
    }
}

/// The singleton sync metadata record of an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub export: ExportCursor,
    #[serde(default)]
    pub import: ImportCursor,
    #[serde(default)]
    pub restore: RestoreCursor,
}

impl Metadata {
    /// Flattened `name -> value` view (`export.point`, `import.count`, ...).
    pub fn entries(&self) -> Vec<(&'static str, i64)> {
        vec![
            ("export.point", self.export.point),
            ("export.count", self.export.count as i64),
            ("export.size", self.export.size as i64),
            ("export.errors", self.export.errors as i64),
            ("import.point", self.import.point),
            ("import.count", self.import.count as i64),
            ("import.size", self.import.size as i64),
            ("import.errors", self.import.errors as i64),
            ("restore.from", self.restore.from),
            ("restore.to", self.restore.to),
            ("restore.point", self.restore.point),
            ("restore.count", self.restore.count as i64),
            ("restore.size", self.restore.size as i64),
            ("restore.errors", self.restore.errors as i64),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_of_document_marks_type() {
        let mut doc = Document::new("ABC123", "invoice");
        doc.set_item("subject", "hello".into());
        let snap = Snapshot::of(&doc, 1_683_000_000_000);
        assert_eq!(snap.id, "ABC123-1683000000000");
        assert_eq!(snap.doc_type, "snapshot-invoice");
        assert_eq!(snap.origin_type(), "invoice");
        assert_eq!(snap.modified_millis(), 1_683_000_000_000);
    }

    #[test]
    fn placeholder_detection() {
        assert!(FileData::new("text/plain", vec![]).is_placeholder());
        assert!(FileData::new("text/plain", vec![0]).is_placeholder());
        assert!(!FileData::new("text/plain", vec![1]).is_placeholder());
        assert!(!FileData::new("text/plain", vec![0, 0]).is_placeholder());
    }

    #[test]
    fn item_texts_resolves_type_to_origin() {
        let mut doc = Document::new("A", "order");
        doc.items.insert(
            "tags".into(),
            vec![ItemValue::Text("x".into()), ItemValue::Integer(7)],
        );
        let snap = Snapshot::of(&doc, 1);
        assert_eq!(snap.item_texts("type"), vec!["order"]);
        assert_eq!(snap.item_texts("tags"), vec!["x", "7"]);
        assert!(snap.item_texts("missing").is_empty());
    }

    #[test]
    fn metadata_entries_are_named() {
        let mut meta = Metadata::default();
        meta.export.count = 4;
        let entries = meta.entries();
        assert!(entries.contains(&("export.count", 4)));
        assert_eq!(entries.len(), 14);
    }

    #[test]
    fn restore_window_pending() {
        let mut cursor = RestoreCursor::default();
        assert!(!cursor.is_pending());
        cursor.from = 10;
        cursor.to = 20;
        cursor.point = 10;
        assert!(cursor.is_pending());
        cursor.point = 21;
        assert!(!cursor.is_pending());
    }
}
