//! XML wire format for snapshots and documents.
//!
//! ```xml
//! <document id="ABC123-1683000000000" origin="ABC123" type="snapshot-invoice"
//!           created="1683000000000" modified="1683000000000">
//!   <item name="subject"><value type="text">Hello</value></item>
//!   <file name="a.pdf" content-type="application/pdf">
//!     <item name="comment"><value type="text">signed</value></item>
//!     <content>AQID</content>
//!   </file>
//! </document>
//! ```
//!
//! File content is base64 encoded. The same format is used for files on the
//! transport, for the archive's `payload` column (without content), and
//! for live documents handed to the snapshot ingestion path.

use std::collections::BTreeMap;

use base64::Engine as _;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use sha2::{Digest, Sha256};

use crate::errors::{ArchiveError, Result};
use crate::models::{Document, FileData, ItemValue, Items, Snapshot};
use crate::snapshot_id;

/// Serialize a snapshot. With `with_content = false` every file keeps its
/// name, content type and attributes but no bytes.
pub fn encode(snapshot: &Snapshot, with_content: bool) -> Result<Vec<u8>> {
    let created = snapshot.created.timestamp_millis().to_string();
    let modified = snapshot.modified.timestamp_millis().to_string();
    let header = [
        ("id", snapshot.id.as_str()),
        ("origin", snapshot.origin_id.as_str()),
        ("type", snapshot.doc_type.as_str()),
        ("created", created.as_str()),
        ("modified", modified.as_str()),
    ];
    write_envelope(&header, &snapshot.items, &snapshot.files, with_content)
}

/// Parse a snapshot from its XML form.
///
/// # Errors
///
/// [`ArchiveError::DataIntegrity`] for malformed XML, unknown value types,
/// bad base64, missing header attributes, or an id that does not belong to
/// the declared origin.
pub fn decode(bytes: &[u8]) -> Result<Snapshot> {
    let env = read_envelope(bytes)?;
    let id = env.required("id")?;
    let (origin, millis) = snapshot_id::parse(&id)
        .map_err(|e| ArchiveError::data_integrity(format!("snapshot id: {}", e)))?;
    let origin_id = env.attrs.get("origin").cloned().unwrap_or_else(|| origin.to_string());
    if origin_id != origin {
        return Err(ArchiveError::data_integrity(format!(
            "snapshot '{}' declares origin '{}'",
            id, origin_id
        )));
    }
    let created = env.millis("created")?.unwrap_or(millis);
    let modified = env.millis("modified")?.unwrap_or(created);
    Ok(Snapshot {
        id,
        origin_id,
        doc_type: env.required("type")?,
        created: snapshot_id::to_datetime(created),
        modified: snapshot_id::to_datetime(modified),
        items: env.items,
        files: env.files,
    })
}

/// Serialize a live document.
pub fn encode_document(doc: &Document) -> Result<Vec<u8>> {
    let created = doc.created.timestamp_millis().to_string();
    let modified = doc.modified.timestamp_millis().to_string();
    let mut header = vec![
        ("id", doc.id.as_str()),
        ("type", doc.doc_type.as_str()),
        ("created", created.as_str()),
        ("modified", modified.as_str()),
    ];
    if let Some(ref snapshot) = doc.snapshot_id {
        header.push(("snapshot", snapshot.as_str()));
    }
    write_envelope(&header, &doc.items, &doc.files, true)
}

/// Parse a live document. `created` / `modified` default to now.
pub fn decode_document(bytes: &[u8]) -> Result<Document> {
    let env = read_envelope(bytes)?;
    let now = chrono::Utc::now().timestamp_millis();
    let created = env.millis("created")?.unwrap_or(now);
    let modified = env.millis("modified")?.unwrap_or(created);
    Ok(Document {
        id: env.required("id")?,
        doc_type: env.attrs.get("type").cloned().unwrap_or_default(),
        created: snapshot_id::to_datetime(created),
        modified: snapshot_id::to_datetime(modified),
        snapshot_id: env.attrs.get("snapshot").cloned(),
        items: env.items,
        files: env.files,
    })
}

/// Hex SHA-256 over the full encoding; identical content yields identical
/// digests.
pub fn digest(snapshot: &Snapshot) -> Result<String> {
    let bytes = encode(snapshot, true)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

// ============ Writing ============

fn xml_err(e: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::data_integrity(format!("xml: {}", e))
}

fn write_envelope(
    header: &[(&str, &str)],
    items: &Items,
    files: &BTreeMap<String, FileData>,
    with_content: bool,
) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;

    let mut root = BytesStart::new("document");
    for (key, value) in header {
        root.push_attribute((*key, *value));
    }
    writer.write_event(Event::Start(root)).map_err(xml_err)?;

    write_items(&mut writer, items)?;

    for (name, file) in files {
        let mut start = BytesStart::new("file");
        start.push_attribute(("name", name.as_str()));
        start.push_attribute(("content-type", file.content_type.as_str()));
        if file.missing_content {
            start.push_attribute(("missing-content", "true"));
        }
        writer.write_event(Event::Start(start)).map_err(xml_err)?;
        write_items(&mut writer, &file.attributes)?;
        if with_content && !file.content.is_empty() {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&file.content);
            write_text_element(&mut writer, BytesStart::new("content"), &encoded)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("file")))
            .map_err(xml_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("document")))
        .map_err(xml_err)?;
    Ok(writer.into_inner())
}

fn write_items(writer: &mut Writer<Vec<u8>>, items: &Items) -> Result<()> {
    for (name, values) in items {
        let mut start = BytesStart::new("item");
        start.push_attribute(("name", name.as_str()));
        writer.write_event(Event::Start(start)).map_err(xml_err)?;
        for value in values {
            let (kind, text) = match value {
                ItemValue::Text(s) => ("text", s.clone()),
                ItemValue::Integer(i) => ("integer", i.to_string()),
                ItemValue::Float(f) => ("float", f.to_string()),
                ItemValue::Boolean(b) => ("boolean", b.to_string()),
                ItemValue::Timestamp(ts) => ("timestamp", ts.timestamp_millis().to_string()),
            };
            let mut value_start = BytesStart::new("value");
            value_start.push_attribute(("type", kind));
            write_text_element(writer, value_start, &text)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("item")))
            .map_err(xml_err)?;
    }
    Ok(())
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, start: BytesStart<'_>, text: &str) -> Result<()> {
    let end = start.to_end().into_owned();
    writer.write_event(Event::Start(start)).map_err(xml_err)?;
    if !text.is_empty() {
        writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_err)?;
    }
    writer.write_event(Event::End(end)).map_err(xml_err)?;
    Ok(())
}

// ============ Reading ============

/// Parsed `<document>` before it is shaped into a snapshot or document.
struct Envelope {
    attrs: BTreeMap<String, String>,
    items: Items,
    files: BTreeMap<String, FileData>,
}

impl Envelope {
    fn required(&self, key: &str) -> Result<String> {
        self.attrs
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| ArchiveError::data_integrity(format!("missing '{}' attribute", key)))
    }

    fn millis(&self, key: &str) -> Result<Option<i64>> {
        match self.attrs.get(key) {
            None => Ok(None),
            Some(v) => v.parse::<i64>().map(Some).map_err(|_| {
                ArchiveError::data_integrity(format!("attribute '{}' is not a timestamp: {}", key, v))
            }),
        }
    }
}

fn attributes_of(e: &BytesStart<'_>) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
        out.insert(key, value);
    }
    Ok(out)
}

fn parse_value(kind: &str, text: &str) -> Result<ItemValue> {
    let bad = |e: String| {
        ArchiveError::data_integrity(format!("invalid {} value '{}': {}", kind, text, e))
    };
    match kind {
        "text" => Ok(ItemValue::Text(text.to_string())),
        "integer" => text.trim().parse().map(ItemValue::Integer).map_err(|e| bad(e.to_string())),
        "float" => text.trim().parse().map(ItemValue::Float).map_err(|e| bad(e.to_string())),
        "boolean" => text.trim().parse().map(ItemValue::Boolean).map_err(|e| bad(e.to_string())),
        "timestamp" => text
            .trim()
            .parse::<i64>()
            .map(|ms| ItemValue::Timestamp(snapshot_id::to_datetime(ms)))
            .map_err(|e| bad(e.to_string())),
        other => Err(ArchiveError::data_integrity(format!(
            "unknown value type '{}'",
            other
        ))),
    }
}

#[derive(Default)]
struct ParseState {
    attrs: Option<BTreeMap<String, String>>,
    items: Items,
    files: BTreeMap<String, FileData>,
    file: Option<(String, FileData)>,
    item: Option<(String, Vec<ItemValue>)>,
    value_kind: Option<String>,
    in_content: bool,
    text: String,
}

impl ParseState {
    fn open(&mut self, e: &BytesStart<'_>) -> Result<()> {
        let attrs = attributes_of(e)?;
        match e.name().as_ref() {
            b"document" => self.attrs = Some(attrs),
            b"item" => {
                let name = attrs
                    .get("name")
                    .cloned()
                    .ok_or_else(|| ArchiveError::data_integrity("item without name"))?;
                self.item = Some((name, Vec::new()));
            }
            b"value" => {
                self.value_kind = Some(attrs.get("type").cloned().unwrap_or_else(|| "text".into()));
                self.text.clear();
            }
            b"file" => {
                let name = attrs
                    .get("name")
                    .cloned()
                    .ok_or_else(|| ArchiveError::data_integrity("file without name"))?;
                let content_type = attrs.get("content-type").cloned().unwrap_or_default();
                let mut file = FileData::new(content_type, Vec::new());
                file.missing_content = attrs.get("missing-content").is_some_and(|v| v == "true");
                self.file = Some((name, file));
            }
            b"content" => {
                self.in_content = true;
                self.text.clear();
            }
            other => {
                return Err(ArchiveError::data_integrity(format!(
                    "unexpected element <{}>",
                    String::from_utf8_lossy(other)
                )))
            }
        }
        Ok(())
    }

    fn close(&mut self, name: &[u8]) -> Result<()> {
        match name {
            b"value" => {
                let kind = self.value_kind.take().unwrap_or_else(|| "text".into());
                let value = parse_value(&kind, &self.text)?;
                self.text.clear();
                match self.item.as_mut() {
                    Some((_, values)) => values.push(value),
                    None => return Err(ArchiveError::data_integrity("value outside of item")),
                }
            }
            b"item" => {
                if let Some((name, values)) = self.item.take() {
                    match self.file.as_mut() {
                        Some((_, file)) => {
                            file.attributes.insert(name, values);
                        }
                        None => {
                            self.items.insert(name, values);
                        }
                    }
                }
            }
            b"content" => {
                self.in_content = false;
                let content = base64::engine::general_purpose::STANDARD
                    .decode(self.text.trim())
                    .map_err(|e| ArchiveError::data_integrity(format!("file content: {}", e)))?;
                self.text.clear();
                match self.file.as_mut() {
                    Some((_, file)) => file.content = content,
                    None => return Err(ArchiveError::data_integrity("content outside of file")),
                }
            }
            b"file" => {
                if let Some((name, file)) = self.file.take() {
                    self.files.insert(name, file);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn read_envelope(bytes: &[u8]) -> Result<Envelope> {
    let mut reader = Reader::from_reader(bytes);
    let mut state = ParseState::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => state.open(&e)?,
            Event::Empty(e) => {
                state.open(&e)?;
                let name = e.name().as_ref().to_vec();
                state.close(&name)?;
            }
            Event::End(e) => state.close(e.name().as_ref())?,
            Event::Text(t) => {
                if state.value_kind.is_some() || state.in_content {
                    state.text.push_str(&t.unescape().map_err(xml_err)?);
                }
            }
            Event::CData(c) => {
                if state.value_kind.is_some() || state.in_content {
                    state.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let attrs = state
        .attrs
        .ok_or_else(|| ArchiveError::data_integrity("no <document> root element"))?;
    Ok(Envelope {
        attrs,
        items: state.items,
        files: state.files,
    })
}
