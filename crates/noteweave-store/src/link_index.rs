//! In-memory link and full-text index.
//!
//! Entries are kept per element. Backlinks are resolved through the title
//! each indexed note had when it was last appended, so a rename must look
//! up referrers before the renamed note is reindexed.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use noteweave_core::logging;
use noteweave_core::references::same_title;
use noteweave_core::{
    BidirectionalLink, Element, LinkIndex, Note, Result, SearchColumn, SearchResult,
};

#[derive(Debug, Clone)]
struct IndexedElement {
    element_id: Uuid,
    text: String,
    link_ranges: Vec<Range<usize>>,
    internal_links: Vec<String>,
}

impl IndexedElement {
    fn from_element(element: &Element) -> Self {
        Self {
            element_id: element.id(),
            text: element.text().text(),
            link_ranges: element.text().link_spans(),
            internal_links: element.text().internal_links(),
        }
    }
}

#[derive(Debug, Clone)]
struct IndexedNote {
    title: String,
    elements: Vec<IndexedElement>,
}

#[derive(Debug, Default)]
struct IndexState {
    notes: HashMap<Uuid, IndexedNote>,
    order: Vec<Uuid>,
}

impl IndexState {
    fn notes(&self) -> impl Iterator<Item = (Uuid, &IndexedNote)> {
        self.order
            .iter()
            .filter_map(|id| self.notes.get(id).map(|note| (*id, note)))
    }

    fn entry(&mut self, note_id: Uuid, title: &str) -> &mut IndexedNote {
        if !self.notes.contains_key(&note_id) {
            self.order.push(note_id);
        }
        let note = self.notes.entry(note_id).or_insert_with(|| IndexedNote {
            title: title.to_string(),
            elements: Vec::new(),
        });
        note.title = title.to_string();
        note
    }
}

/// Link index kept in process memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryLinkIndex {
    state: Arc<Mutex<IndexState>>,
}

impl MemoryLinkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of indexed notes.
    pub fn note_count(&self) -> usize {
        self.lock().notes.len()
    }

    /// Number of indexed elements across all notes.
    pub fn element_count(&self) -> usize {
        self.lock().notes.values().map(|n| n.elements.len()).sum()
    }

    pub fn contains_note(&self, note_id: Uuid) -> bool {
        self.lock().notes.contains_key(&note_id)
    }

    /// Title the note was last indexed under.
    pub fn indexed_title(&self, note_id: Uuid) -> Option<String> {
        self.lock().notes.get(&note_id).map(|n| n.title.clone())
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.notes.clear();
        state.order.clear();
    }
}

#[async_trait]
impl LinkIndex for MemoryLinkIndex {
    async fn append_note(&self, note: &Note) -> Result<()> {
        let mut elements = vec![IndexedElement::from_element(note.root())];
        elements.extend(
            note.root()
                .flat_elements()
                .into_iter()
                .map(IndexedElement::from_element),
        );
        let count = elements.len();
        self.lock().entry(note.id(), note.title()).elements = elements;
        tracing::debug!(
            subsystem = logging::SUBSYSTEM_STORE,
            component = logging::COMPONENT_LINK_INDEX,
            op = "append_note",
            note_id = %note.id(),
            count,
            "Note indexed"
        );
        Ok(())
    }

    async fn append_element(
        &self,
        note_id: Uuid,
        note_title: &str,
        element: &Element,
    ) -> Result<()> {
        let indexed = IndexedElement::from_element(element);
        let mut state = self.lock();
        let note = state.entry(note_id, note_title);
        match note
            .elements
            .iter_mut()
            .find(|e| e.element_id == indexed.element_id)
        {
            Some(existing) => *existing = indexed,
            None => note.elements.push(indexed),
        }
        Ok(())
    }

    async fn remove_note_id(&self, note_id: Uuid) -> Result<()> {
        let mut state = self.lock();
        if state.notes.remove(&note_id).is_some() {
            state.order.retain(|id| *id != note_id);
            tracing::debug!(
                subsystem = logging::SUBSYSTEM_STORE,
                component = logging::COMPONENT_LINK_INDEX,
                op = "remove",
                note_id = %note_id,
                "Note removed from index"
            );
        }
        Ok(())
    }

    async fn fetch_links(&self, to_note_id: Uuid) -> Result<Vec<BidirectionalLink>> {
        let state = self.lock();
        let Some(target) = state.notes.get(&to_note_id) else {
            return Ok(Vec::new());
        };
        let title = target.title.as_str();
        let links = state
            .notes()
            .filter(|(id, _)| *id != to_note_id)
            .flat_map(move |(id, note)| {
                note.elements
                    .iter()
                    .filter(move |e| e.internal_links.iter().any(|l| same_title(l, title)))
                    .map(move |e| BidirectionalLink {
                        source_note_id: id,
                        source_element_id: e.element_id,
                    })
            })
            .collect();
        Ok(links)
    }

    async fn search(&self, phrase: &str, column: SearchColumn) -> Result<Vec<SearchResult>> {
        let needle = phrase.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.lock();
        let mut results = Vec::new();
        for (note_id, note) in state.notes() {
            match column {
                SearchColumn::Title => {
                    if note.title.to_lowercase().contains(&needle) {
                        if let Some(root) = note.elements.first() {
                            results.push(result_for(note_id, note, root));
                        }
                    }
                }
                SearchColumn::Text => {
                    results.extend(
                        note.elements
                            .iter()
                            .filter(|e| e.text.to_lowercase().contains(&needle))
                            .map(|e| result_for(note_id, note, e)),
                    );
                }
            }
        }
        tracing::trace!(
            subsystem = logging::SUBSYSTEM_STORE,
            component = logging::COMPONENT_LINK_INDEX,
            op = "search",
            count = results.len(),
            "Search finished"
        );
        Ok(results)
    }
}

fn result_for(note_id: Uuid, note: &IndexedNote, element: &IndexedElement) -> SearchResult {
    SearchResult {
        note_id,
        note_title: note.title.clone(),
        element_id: element.element_id,
        text: element.text.clone(),
        link_ranges: (!element.link_ranges.is_empty()).then(|| element.link_ranges.clone()),
    }
}
