//! Collaborator traits.
//!
//! The sync engine talks to persistent storage and to the link/search
//! index only through these interfaces, so backends are pluggable and the
//! engine is testable against in-memory implementations.

use std::ops::Range;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::{DocumentType, NoteDocument};
use crate::element::Element;
use crate::error::Result;
use crate::note::Note;
use crate::references::title_key;

// =============================================================================
// DOCUMENT STORE
// =============================================================================

/// Predicate over stored documents. A filter list matches a document when
/// every filter matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum DocumentFilter {
    /// Case-insensitive title match.
    Title(String),
    Id(Uuid),
    Ids(Vec<Uuid>),
    /// Journal date as `YYYYMMDD`.
    JournalDate(i64),
    TabGroups(Vec<Uuid>),
    Type(DocumentType),
}

impl DocumentFilter {
    pub fn matches(&self, document: &NoteDocument) -> bool {
        match self {
            DocumentFilter::Title(title) => title_key(&document.title) == title_key(title),
            DocumentFilter::Id(id) => document.id == *id,
            DocumentFilter::Ids(ids) => ids.contains(&document.id),
            DocumentFilter::JournalDate(date) => document.journal_date == Some(*date),
            DocumentFilter::TabGroups(groups) => document
                .tab_group_id
                .is_some_and(|group| groups.contains(&group)),
            DocumentFilter::Type(kind) => document.document_type == *kind,
        }
    }

    /// Whether every filter in `filters` matches `document`.
    pub fn all_match(filters: &[DocumentFilter], document: &NoteDocument) -> bool {
        filters.iter().all(|f| f.matches(document))
    }
}

/// Versioned document storage with optimistic concurrency.
///
/// Fetch operations never return soft-deleted documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist `document`.
    ///
    /// `expected_version` is the version the caller last saw persisted
    /// (0 for a document never stored). The store rejects the write with
    /// [`Error::VersionConflict`](crate::Error::VersionConflict) when its
    /// stored version differs, and with
    /// [`Error::DuplicateTitle`](crate::Error::DuplicateTitle) when another
    /// live document already holds the title. Returns the stored version.
    async fn save(&self, document: NoteDocument, expected_version: i64) -> Result<i64>;

    /// First document matching all filters.
    async fn fetch_first(&self, filters: &[DocumentFilter]) -> Result<Option<NoteDocument>>;

    /// Ids of matching documents.
    async fn fetch_ids(&self, filters: &[DocumentFilter]) -> Result<Vec<Uuid>>;

    /// Titles of matching documents.
    async fn fetch_titles(&self, filters: &[DocumentFilter]) -> Result<Vec<String>>;

    /// Every matching document.
    async fn fetch_all(&self, filters: &[DocumentFilter]) -> Result<Vec<NoteDocument>>;

    /// Mark a document deleted by stamping `deleted_at`. Returns the
    /// tombstoned document.
    async fn soft_delete(&self, id: Uuid) -> Result<NoteDocument>;
}

// =============================================================================
// LINK INDEX
// =============================================================================

/// An element that links to some note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BidirectionalLink {
    pub source_note_id: Uuid,
    pub source_element_id: Uuid,
}

/// Column a phrase search runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchColumn {
    #[default]
    Text,
    Title,
}

/// One full-text hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub note_id: Uuid,
    pub note_title: String,
    pub element_id: Uuid,
    pub text: String,
    /// Char ranges of the element's link spans, when it has any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_ranges: Option<Vec<Range<usize>>>,
}

/// Full-text and backlink index over note elements.
#[async_trait]
pub trait LinkIndex: Send + Sync {
    /// Reindex every element of `note`, replacing its previous entries.
    async fn append_note(&self, note: &Note) -> Result<()>;

    /// Reindex a single element of note `note_id`.
    async fn append_element(&self, note_id: Uuid, note_title: &str, element: &Element)
        -> Result<()>;

    /// Drop every entry of `note`.
    async fn remove_note(&self, note: &Note) -> Result<()> {
        self.remove_note_id(note.id()).await
    }

    /// Drop every entry of the note with this id.
    async fn remove_note_id(&self, note_id: Uuid) -> Result<()>;

    /// Elements, in other notes, that link to `to_note_id`.
    async fn fetch_links(&self, to_note_id: Uuid) -> Result<Vec<BidirectionalLink>>;

    /// Elements whose `column` contains `phrase`, case-insensitively.
    async fn search(&self, phrase: &str, column: SearchColumn) -> Result<Vec<SearchResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_title_filter_is_case_insensitive() {
        let doc = NoteDocument::for_tests("Rust Notes");
        assert!(DocumentFilter::Title("rust notes".into()).matches(&doc));
        assert!(DocumentFilter::Title("  RUST NOTES ".into()).matches(&doc));
        assert!(!DocumentFilter::Title("Rust".into()).matches(&doc));
    }

    #[test]
    fn test_all_filters_must_match() {
        let doc = NoteDocument::for_tests("A");
        let filters = [
            DocumentFilter::Id(doc.id),
            DocumentFilter::Type(DocumentType::Note),
        ];
        assert!(DocumentFilter::all_match(&filters, &doc));
        let filters = [
            DocumentFilter::Id(doc.id),
            DocumentFilter::Type(DocumentType::Journal),
        ];
        assert!(!DocumentFilter::all_match(&filters, &doc));
        assert!(DocumentFilter::all_match(&[], &doc));
    }

    #[test]
    fn test_journal_and_tab_group_filters() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let note = Note::journal(date);
        let doc = NoteDocument::from_note(&note, 1, Uuid::nil(), "local").unwrap();
        assert!(DocumentFilter::JournalDate(20240309).matches(&doc));
        assert!(!DocumentFilter::JournalDate(20240310).matches(&doc));

        let group = Uuid::new_v4();
        let tab = Note::tab_group("Tabs", group);
        let doc = NoteDocument::from_note(&tab, 1, Uuid::nil(), "local").unwrap();
        assert!(DocumentFilter::TabGroups(vec![Uuid::new_v4(), group]).matches(&doc));
        assert!(!DocumentFilter::TabGroups(vec![]).matches(&doc));
    }

    #[test]
    fn test_filter_serialization() {
        let json = serde_json::to_value(DocumentFilter::JournalDate(20240101)).unwrap();
        assert_eq!(json["type"], "journalDate");
        assert_eq!(json["value"], 20240101);
    }
}
