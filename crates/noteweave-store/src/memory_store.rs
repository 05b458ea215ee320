//! In-memory document store.
//!
//! Implements the storage contract the sync engine relies on: optimistic
//! concurrency on `expected_version`, title uniqueness among live documents,
//! soft deletion through `deleted_at`, and a broadcast feed of every accepted
//! write so other workspaces can play the role of remote devices.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use noteweave_core::{defaults, logging};
use noteweave_core::{title_key, DocumentFilter, DocumentStore, Error, NoteDocument, Result};

#[derive(Debug, Default)]
struct StoreState {
    documents: HashMap<Uuid, NoteDocument>,
    /// Insertion order, so fetches are deterministic.
    order: Vec<Uuid>,
    writes: u64,
}

impl StoreState {
    fn live(&self) -> impl Iterator<Item = &NoteDocument> {
        self.order
            .iter()
            .filter_map(|id| self.documents.get(id))
            .filter(|doc| !doc.is_deleted())
    }

    fn title_holder(&self, title: &str, except: Uuid) -> Option<&NoteDocument> {
        let key = title_key(title);
        self.live()
            .find(|doc| doc.id != except && title_key(&doc.title) == key)
    }

    fn put(&mut self, document: NoteDocument) {
        if !self.documents.contains_key(&document.id) {
            self.order.push(document.id);
        }
        self.documents.insert(document.id, document);
        self.writes += 1;
    }
}

/// Document store kept in process memory. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryDocumentStore {
    state: Arc<Mutex<StoreState>>,
    changes: broadcast::Sender<NoteDocument>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_capacity(defaults::EVENT_BUS_CAPACITY)
    }

    /// Create a store whose change feed buffers `capacity` documents.
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, document: NoteDocument) {
        let subscriber_count = self.changes.receiver_count();
        tracing::trace!(
            subsystem = logging::SUBSYSTEM_STORE,
            component = logging::COMPONENT_MEMORY_STORE,
            note_id = %document.id,
            version = document.version,
            subscriber_count,
            "Change feed publish"
        );
        let _ = self.changes.send(document);
    }

    /// Subscribe to every accepted write and soft delete.
    pub fn subscribe(&self) -> broadcast::Receiver<NoteDocument> {
        self.changes.subscribe()
    }

    /// Stored document by id, soft-deleted ones included.
    pub fn get(&self, id: Uuid) -> Option<NoteDocument> {
        self.lock().documents.get(&id).cloned()
    }

    /// Stored version of a document, 0 when absent.
    pub fn version_of(&self, id: Uuid) -> i64 {
        self.lock().documents.get(&id).map_or(0, |doc| doc.version)
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.lock().live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of accepted writes, soft deletes included.
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    /// Write a document the way another device would: no version or title
    /// checks. The write is published on the change feed.
    pub fn put_remote(&self, document: NoteDocument) {
        tracing::debug!(
            subsystem = logging::SUBSYSTEM_STORE,
            component = logging::COMPONENT_MEMORY_STORE,
            op = "put_remote",
            note_id = %document.id,
            version = document.version,
            "Remote write"
        );
        self.lock().put(document.clone());
        self.publish(document);
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn save(&self, document: NoteDocument, expected_version: i64) -> Result<i64> {
        if document.data.is_empty() {
            return Err(Error::EmptyDocument(document.id));
        }

        let stored_doc = {
            let mut state = self.lock();
            let stored = state.documents.get(&document.id).cloned();
            let stored_version = stored.as_ref().map_or(0, |doc| doc.version);

            if stored_version != expected_version {
                tracing::debug!(
                    subsystem = logging::SUBSYSTEM_STORE,
                    component = logging::COMPONENT_MEMORY_STORE,
                    op = "save",
                    note_id = %document.id,
                    expected = expected_version,
                    stored = stored_version,
                    "Version conflict"
                );
                return Err(Error::VersionConflict {
                    id: document.id,
                    expected: expected_version,
                    stored: stored_version,
                });
            }
            if document.version <= stored_version {
                return Err(Error::InvalidInput(format!(
                    "version {} of {} does not advance stored version {}",
                    document.version, document.id, stored_version
                )));
            }
            if let Some(existing) = state.title_holder(&document.title, document.id) {
                tracing::debug!(
                    subsystem = logging::SUBSYSTEM_STORE,
                    component = logging::COMPONENT_MEMORY_STORE,
                    op = "save",
                    note_id = %document.id,
                    existing_id = %existing.id,
                    note_title = %document.title,
                    "Duplicate title"
                );
                return Err(Error::DuplicateTitle {
                    title: document.title.clone(),
                    existing: Box::new(existing.clone()),
                });
            }

            let mut accepted = document;
            accepted.updated_at = Utc::now();
            match stored {
                Some(previous) if previous.checksum() == accepted.checksum() => {
                    tracing::debug!(
                        subsystem = logging::SUBSYSTEM_STORE,
                        component = logging::COMPONENT_MEMORY_STORE,
                        note_id = %accepted.id,
                        version = accepted.version,
                        "Identical checksum, only the version advances"
                    );
                    let mut bumped = previous;
                    bumped.version = accepted.version;
                    bumped.updated_at = accepted.updated_at;
                    bumped.deleted_at = None;
                    bumped.source = accepted.source;
                    accepted = bumped;
                }
                Some(previous) => accepted.created_at = previous.created_at,
                None => {}
            }
            state.put(accepted.clone());
            accepted
        };

        let version = stored_doc.version;
        self.publish(stored_doc);
        Ok(version)
    }

    async fn fetch_first(&self, filters: &[DocumentFilter]) -> Result<Option<NoteDocument>> {
        Ok(self
            .lock()
            .live()
            .find(|doc| DocumentFilter::all_match(filters, doc))
            .cloned())
    }

    async fn fetch_ids(&self, filters: &[DocumentFilter]) -> Result<Vec<Uuid>> {
        Ok(self
            .lock()
            .live()
            .filter(|doc| DocumentFilter::all_match(filters, doc))
            .map(|doc| doc.id)
            .collect())
    }

    async fn fetch_titles(&self, filters: &[DocumentFilter]) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .live()
            .filter(|doc| DocumentFilter::all_match(filters, doc))
            .map(|doc| doc.title.clone())
            .collect())
    }

    async fn fetch_all(&self, filters: &[DocumentFilter]) -> Result<Vec<NoteDocument>> {
        Ok(self
            .lock()
            .live()
            .filter(|doc| DocumentFilter::all_match(filters, doc))
            .cloned()
            .collect())
    }

    async fn soft_delete(&self, id: Uuid) -> Result<NoteDocument> {
        let tombstone = {
            let mut state = self.lock();
            let Some(document) = state.documents.get_mut(&id) else {
                return Err(Error::NoteNotFound(id));
            };
            if document.is_deleted() {
                return Ok(document.clone());
            }
            let now = Utc::now();
            document.deleted_at = Some(now);
            document.updated_at = now;
            document.version += 1;
            let tombstone = document.clone();
            state.writes += 1;
            tombstone
        };
        tracing::info!(
            subsystem = logging::SUBSYSTEM_STORE,
            component = logging::COMPONENT_MEMORY_STORE,
            op = "soft_delete",
            note_id = %id,
            version = tombstone.version,
            "Document soft-deleted"
        );
        self.publish(tombstone.clone());
        Ok(tombstone)
    }
}
