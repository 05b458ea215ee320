//! Storage documents: the persisted envelope around an encoded note.
//!
//! Bodies and documents are written as pretty-printed JSON with a two-space
//! indent, a `" : "` key separator and unescaped slashes. Byte stability of
//! this format matters for checksums and conflict payload comparison.

use std::io;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::ser::Formatter;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};
use crate::note::{Note, NoteType};

// =============================================================================
// JSON FORMAT
// =============================================================================

/// Pretty printer with two-space indent and `" : "` between key and value.
/// serde_json never escapes `/`, so slashes stay as written.
#[derive(Debug, Default)]
pub struct NoteJsonFormatter {
    indent: usize,
    has_value: bool,
}

impl NoteJsonFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_indent<W: ?Sized + io::Write>(&self, writer: &mut W) -> io::Result<()> {
        for _ in 0..self.indent {
            writer.write_all(b"  ")?;
        }
        Ok(())
    }
}

impl Formatter for NoteJsonFormatter {
    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.indent += 1;
        self.has_value = false;
        writer.write_all(b"[")
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.indent -= 1;
        if self.has_value {
            writer.write_all(b"\n")?;
            self.write_indent(writer)?;
        }
        writer.write_all(b"]")
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        writer.write_all(if first { b"\n" } else { b",\n" })?;
        self.write_indent(writer)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        self.has_value = true;
        Ok(())
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.indent += 1;
        self.has_value = false;
        writer.write_all(b"{")
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.indent -= 1;
        if self.has_value {
            writer.write_all(b"\n")?;
            self.write_indent(writer)?;
        }
        writer.write_all(b"}")
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        writer.write_all(if first { b"\n" } else { b",\n" })?;
        self.write_indent(writer)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b" : ")
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        self.has_value = true;
        Ok(())
    }
}

/// Serialize `value` in the persisted JSON format.
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, NoteJsonFormatter::new());
    value.serialize(&mut serializer)?;
    Ok(out)
}

/// `sha256:<hex>` digest of a body.
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Integer journal key (`YYYYMMDD`) used by storage filters.
pub fn journal_date_key(date: NaiveDate) -> i64 {
    date.year() as i64 * 10_000 + date.month() as i64 * 100 + date.day() as i64
}

/// Bodies are JSON text, so they travel as a string rather than a byte array.
mod utf8_body {
    use super::*;

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        String::from_utf8_lossy(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}

// =============================================================================
// DOCUMENT
// =============================================================================

/// Kind of note a document holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentType {
    Journal,
    #[default]
    Note,
    TabGroup,
}

impl From<NoteType> for DocumentType {
    fn from(note_type: NoteType) -> Self {
        match note_type {
            NoteType::Note => DocumentType::Note,
            NoteType::Journal(_) => DocumentType::Journal,
            NoteType::TabGroup(_) => DocumentType::TabGroup,
        }
    }
}

/// Persisted envelope around an encoded note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDocument {
    pub id: Uuid,
    #[serde(default)]
    pub database_id: Uuid,
    pub title: String,
    #[serde(with = "utf8_body")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub document_type: DocumentType,
    pub version: i64,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_group_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    defaults::LOCAL_SOURCE.to_string()
}

impl NoteDocument {
    /// Encode `note` into a document carrying `version`.
    pub fn from_note(note: &Note, version: i64, database_id: Uuid, source: &str) -> Result<Self> {
        let data = note.encode()?;
        let note_type = note.note_type();
        Ok(Self {
            id: note.id(),
            database_id: note.database_id().unwrap_or(database_id),
            title: note.title().to_string(),
            data,
            document_type: note_type.into(),
            version,
            is_public: note.is_public(),
            journal_date: note_type.journal_date().map(journal_date_key),
            tab_group_id: note_type.tab_group_id(),
            created_at: note.root().creation_date(),
            updated_at: note.root().update_date(),
            deleted_at: None,
            source: source.to_string(),
        })
    }

    /// Decode the body. The document's identity and title win over what the
    /// body says.
    pub fn decode_note(&self) -> Result<Note> {
        let mut note = Note::decode(&self.data)?;
        if note.id() != self.id {
            return Err(Error::Decode(format!(
                "document {} carries a body for note {}",
                self.id,
                note.id()
            )));
        }
        if note.title() != self.title {
            note.set_title(&self.title);
        }
        note.discard_changes();
        Ok(note)
    }

    pub fn checksum(&self) -> String {
        checksum(&self.data)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the body is too short to hold a note: fewer than
    /// `min_bytes` bytes once surrounding whitespace is ignored.
    ///
    /// This is a size check on the encoded bytes only. A note whose tree has
    /// no content still encodes its identity and dates, so a freshly created
    /// note is never an empty body.
    pub fn is_empty_body(&self, min_bytes: usize) -> bool {
        let data = self.data.as_slice();
        let start = data.iter().position(|b| !b.is_ascii_whitespace());
        let end = data.iter().rposition(|b| !b.is_ascii_whitespace());
        let content = match (start, end) {
            (Some(start), Some(end)) => end - start + 1,
            _ => 0,
        };
        content < min_bytes
    }

    /// Short label for logs: `title {id} vN`.
    pub fn title_and_id(&self) -> String {
        format!(
            "{} {{{}}} v{}{}",
            self.title,
            self.id,
            self.version,
            if self.is_deleted() { " [DELETED]" } else { "" }
        )
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        to_pretty_json(self)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::Decode(e.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn for_tests(title: &str) -> Self {
        let note = Note::new(title);
        Self::from_note(&note, 1, Uuid::nil(), defaults::LOCAL_SOURCE)
            .unwrap_or_else(|e| panic!("test document: {e}"))
    }
}
