//! Test fixtures for save-protocol and index tests.
//!
//! Provides note builders and [`FlakyDocumentStore`], a wrapper around
//! [`MemoryDocumentStore`] that injects scripted failures into `save` calls.
//!
//! ## Usage
//!
//! ```rust
//! use noteweave_store::test_fixtures::{note_with_children, FlakyDocumentStore, ScriptedFailure};
//!
//! let store = FlakyDocumentStore::new();
//! store.push(ScriptedFailure::Unavailable);
//! let note = note_with_children("Inbox", &["first", "second"]);
//! assert_eq!(note.root().children().len(), 2);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::memory_store::MemoryDocumentStore;
use noteweave_core::{
    defaults, Attribute, DocumentFilter, DocumentStore, Element, Error, Note, NoteDocument,
    Result,
};

// =============================================================================
// NOTE BUILDERS
// =============================================================================

/// A note with one child element per text, change logs cleared.
pub fn note_with_children(title: &str, texts: &[&str]) -> Note {
    let mut note = Note::new(title);
    for text in texts {
        note.root_mut().add_child(Element::with_text(*text));
    }
    note.discard_changes();
    note
}

/// A note whose single child reads `see <target>`, with the target title
/// marked as an internal link.
pub fn linking_note(title: &str, target: &str) -> Note {
    let mut note = Note::new(title);
    let text = format!("see {target}");
    let end = text.chars().count();
    let mut element = Element::with_text(text.as_str());
    element.edit_text(|t| t.add_attributes(&[Attribute::InternalLink(target.to_string())], 4..end));
    note.root_mut().add_child(element);
    note.discard_changes();
    note
}

/// Encode `note` at `version` with the local source tag.
pub fn document_for(note: &Note, version: i64) -> NoteDocument {
    document_from(note, version, defaults::LOCAL_SOURCE)
}

/// Encode `note` at `version` as if written by device `source`.
pub fn document_from(note: &Note, version: i64, source: &str) -> NoteDocument {
    NoteDocument::from_note(note, version, Uuid::nil(), source)
        .unwrap_or_else(|e| panic!("fixture note failed to encode: {e}"))
}

// =============================================================================
// FLAKY STORE
// =============================================================================

/// Failure injected into the next `save` call.
#[derive(Debug, Clone)]
pub enum ScriptedFailure {
    /// Fail with a storage error.
    Unavailable,
    /// Fail with a version conflict against the currently stored version.
    VersionConflict,
    /// Sleep, then save normally.
    Delay(Duration),
    /// Wait for the notify, then save normally.
    WaitFor(Arc<Notify>),
}

/// Document store that replays scripted failures on `save`.
#[derive(Debug, Clone, Default)]
pub struct FlakyDocumentStore {
    inner: MemoryDocumentStore,
    script: Arc<Mutex<VecDeque<ScriptedFailure>>>,
    save_calls: Arc<AtomicUsize>,
}

impl FlakyDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing store; the wrapper shares its state.
    pub fn wrapping(inner: MemoryDocumentStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Queue a failure for a future `save` call, in order.
    pub fn push(&self, failure: ScriptedFailure) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(failure);
    }

    /// Queue the same failure `times` times.
    pub fn push_repeated(&self, failure: ScriptedFailure, times: usize) {
        for _ in 0..times {
            self.push(failure.clone());
        }
    }

    /// Scripted failures not consumed yet.
    pub fn remaining(&self) -> usize {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of `save` calls received, failed ones included.
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryDocumentStore {
        &self.inner
    }

    fn next_failure(&self) -> Option<ScriptedFailure> {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

#[async_trait]
impl DocumentStore for FlakyDocumentStore {
    async fn save(&self, document: NoteDocument, expected_version: i64) -> Result<i64> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        match self.next_failure() {
            Some(ScriptedFailure::Unavailable) => {
                tracing::debug!(note_id = %document.id, "Scripted outage");
                return Err(Error::Storage("scripted outage".to_string()));
            }
            Some(ScriptedFailure::VersionConflict) => {
                return Err(Error::VersionConflict {
                    id: document.id,
                    expected: expected_version,
                    stored: self.inner.version_of(document.id),
                });
            }
            Some(ScriptedFailure::Delay(delay)) => tokio::time::sleep(delay).await,
            Some(ScriptedFailure::WaitFor(gate)) => gate.notified().await,
            None => {}
        }
        self.inner.save(document, expected_version).await
    }

    async fn fetch_first(&self, filters: &[DocumentFilter]) -> Result<Option<NoteDocument>> {
        self.inner.fetch_first(filters).await
    }

    async fn fetch_ids(&self, filters: &[DocumentFilter]) -> Result<Vec<Uuid>> {
        self.inner.fetch_ids(filters).await
    }

    async fn fetch_titles(&self, filters: &[DocumentFilter]) -> Result<Vec<String>> {
        self.inner.fetch_titles(filters).await
    }

    async fn fetch_all(&self, filters: &[DocumentFilter]) -> Result<Vec<NoteDocument>> {
        self.inner.fetch_all(filters).await
    }

    async fn soft_delete(&self, id: Uuid) -> Result<NoteDocument> {
        self.inner.soft_delete(id).await
    }
}
