//! Notes: titled, typed roots of an element tree.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::document;
use crate::element::{ChangeKind, Element, ElementChange};
use crate::error::{Error, Result};
use crate::references;

/// What a note represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoteType {
    #[default]
    Note,
    /// Daily journal page.
    Journal(NaiveDate),
    /// Note backing a tab group.
    TabGroup(Uuid),
}

impl NoteType {
    pub fn is_journal(&self) -> bool {
        matches!(self, NoteType::Journal(_))
    }

    pub fn journal_date(&self) -> Option<NaiveDate> {
        match self {
            NoteType::Journal(date) => Some(*date),
            _ => None,
        }
    }

    pub fn tab_group_id(&self) -> Option<Uuid> {
        match self {
            NoteType::TabGroup(id) => Some(*id),
            _ => None,
        }
    }
}

/// Pointer from an element of some note to another note. Used for
/// backlink display, never for ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteReference {
    #[serde(rename = "noteTitle", default, skip_serializing_if = "Option::is_none")]
    pub note_title: Option<String>,
    #[serde(rename = "noteID", default, skip_serializing_if = "Option::is_none")]
    pub note_id: Option<Uuid>,
    #[serde(rename = "elementID")]
    pub element_id: Uuid,
}

impl NoteReference {
    pub fn by_id(note_id: Uuid, element_id: Uuid) -> Self {
        Self {
            note_title: None,
            note_id: Some(note_id),
            element_id,
        }
    }

    pub fn by_title(title: impl Into<String>, element_id: Uuid) -> Self {
        Self {
            note_title: Some(title.into()),
            note_id: None,
            element_id,
        }
    }
}

/// User activity that raises a note's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserActivity {
    Created,
    Viewed,
    Referenced,
    Modified,
    Imported,
}

/// Trimmed title with line breaks folded into spaces.
pub fn valid_title(title: &str) -> String {
    title
        .split(['\n', '\r'])
        .filter(|part| !part.trim().is_empty())
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Default title of the journal page for `date`.
pub fn journal_title(date: NaiveDate) -> String {
    date.format("%-d %B %Y").to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A note: metadata plus the root element of its content tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    title: String,
    #[serde(rename = "type", default)]
    note_type: NoteType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    references: Vec<NoteReference>,
    #[serde(default)]
    search_queries: Vec<String>,
    #[serde(default)]
    visited_search_results: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    browsing_sessions: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    is_public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    database_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "is_false")]
    deleted: bool,
    #[serde(flatten)]
    root: Element,
}

impl Note {
    pub fn new(title: &str) -> Self {
        Self::with_type(title, NoteType::Note)
    }

    pub fn with_type(title: &str, note_type: NoteType) -> Self {
        Self {
            title: valid_title(title),
            note_type,
            references: Vec::new(),
            search_queries: Vec::new(),
            visited_search_results: Vec::new(),
            browsing_sessions: Vec::new(),
            is_public: false,
            database_id: None,
            deleted: false,
            root: Element::new(),
        }
    }

    pub fn journal(date: NaiveDate) -> Self {
        Self::with_type(&journal_title(date), NoteType::Journal(date))
    }

    pub fn tab_group(title: &str, tab_group_id: Uuid) -> Self {
        Self::with_type(title, NoteType::TabGroup(tab_group_id))
    }

    /// Decode a persisted note body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut note: Note =
            serde_json::from_slice(data).map_err(|e| Error::Decode(e.to_string()))?;
        note.title = valid_title(&note.title);
        Ok(note)
    }

    /// Encode to the persisted body format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        document::to_pretty_json(self)
    }

    // ─── Accessors ────────────────────────────────────────────────────────

    pub fn id(&self) -> Uuid {
        self.root.id()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Case-insensitive cache key of the title.
    pub fn title_key(&self) -> String {
        references::title_key(&self.title)
    }

    pub fn note_type(&self) -> NoteType {
        self.note_type
    }

    pub fn references(&self) -> &[NoteReference] {
        &self.references
    }

    pub fn search_queries(&self) -> &[String] {
        &self.search_queries
    }

    pub fn visited_search_results(&self) -> &[serde_json::Value] {
        &self.visited_search_results
    }

    pub fn browsing_sessions(&self) -> &[serde_json::Value] {
        &self.browsing_sessions
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    pub fn database_id(&self) -> Option<Uuid> {
        self.database_id
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Mutable access to the content tree. Mutations are recorded in the
    /// elements' change logs.
    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    pub fn find_element(&self, id: Uuid) -> Option<&Element> {
        self.root.find(id)
    }

    pub fn find_element_mut(&mut self, id: Uuid) -> Option<&mut Element> {
        self.root.find_mut(id)
    }

    // ─── Metadata mutators ────────────────────────────────────────────────

    pub fn set_title(&mut self, title: &str) {
        self.title = valid_title(title);
        self.root.record(ChangeKind::Text);
    }

    pub fn set_note_type(&mut self, note_type: NoteType) {
        self.note_type = note_type;
        self.root.record(ChangeKind::Meta);
    }

    pub fn set_public(&mut self, is_public: bool) {
        self.is_public = is_public;
        self.root.record(ChangeKind::Meta);
    }

    pub fn set_database_id(&mut self, database_id: Option<Uuid>) {
        self.database_id = database_id;
        self.root.record(ChangeKind::Meta);
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        self.deleted = deleted;
        self.root.record(ChangeKind::Meta);
    }

    /// Give the note a new identity.
    pub fn set_id(&mut self, id: Uuid) {
        self.root.id = id;
        self.root.record(ChangeKind::Meta);
    }

    /// Add a reference unless an equal one is already present.
    pub fn add_reference(&mut self, reference: NoteReference) -> bool {
        if self.references.contains(&reference) {
            return false;
        }
        self.references.push(reference);
        self.root.record(ChangeKind::Meta);
        true
    }

    pub fn remove_reference(&mut self, reference: &NoteReference) -> bool {
        let before = self.references.len();
        self.references.retain(|r| r != reference);
        let removed = self.references.len() != before;
        if removed {
            self.root.record(ChangeKind::Meta);
        }
        removed
    }

    pub fn remove_all_references(&mut self) {
        if !self.references.is_empty() {
            self.references.clear();
            self.root.record(ChangeKind::Meta);
        }
    }

    pub fn add_search_query(&mut self, query: impl Into<String>) {
        self.search_queries.push(query.into());
        self.root.record(ChangeKind::Meta);
    }

    pub fn add_visited_search_result(&mut self, result: serde_json::Value) {
        self.visited_search_results.push(result);
        self.root.record(ChangeKind::Meta);
    }

    pub fn add_browsing_session(&mut self, session: serde_json::Value) {
        self.browsing_sessions.push(session);
        self.root.record(ChangeKind::Meta);
    }

    /// Raise the note score for a user activity.
    pub fn record_activity(&mut self, activity: UserActivity) {
        let score = self.root.score() + defaults::USER_ACTIVITY_SCORE_BUMP;
        tracing::trace!(?activity, score, "Note activity recorded");
        self.root.set_score(score);
    }

    /// Copy every note-level field except identity and content from
    /// `other`. Nothing is recorded.
    pub fn adopt_metadata(&mut self, other: &Note) {
        self.title = other.title.clone();
        self.note_type = other.note_type;
        self.references = other.references.clone();
        self.search_queries = other.search_queries.clone();
        self.visited_search_results = other.visited_search_results.clone();
        self.browsing_sessions = other.browsing_sessions.clone();
        self.is_public = other.is_public;
        self.database_id = other.database_id;
        self.deleted = other.deleted;
    }

    // ─── Changes ──────────────────────────────────────────────────────────

    /// Drain every recorded change in the tree.
    pub fn take_changes(&mut self) -> Vec<ElementChange> {
        let mut changes = Vec::new();
        self.root.drain_changes(&mut changes);
        changes
    }

    /// Forget recorded changes.
    pub fn discard_changes(&mut self) {
        self.root.clear_changes();
    }

    pub fn has_pending_changes(&self) -> bool {
        self.root.has_pending_changes()
    }

    // ─── Content queries ──────────────────────────────────────────────────

    /// Whether the note has no text anywhere.
    pub fn is_entire_note_empty(&self) -> bool {
        self.root.is_empty_subtree()
    }

    /// Elements whose text links to the note titled `title`.
    pub fn elements_linking_to(&self, title: &str) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .root
            .flat_elements()
            .into_iter()
            .filter(|e| e.has_link_to_note(title))
            .map(Element::id)
            .collect();
        if self.root.has_link_to_note(title) {
            ids.insert(0, self.root.id());
        }
        ids
    }
}
