//! Workspace: the context object wiring a store, a link index, the note
//! registry, the saver and autosave together.
//!
//! Everything that would otherwise be process-wide state lives here, so
//! several workspaces (one per simulated device, say) can share a store in
//! the same process.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use noteweave_core::references::{same_title, title_occurrences};
use noteweave_core::{
    defaults, journal_date_key, logging, valid_title, BidirectionalLink, DocumentFilter, DocumentStore,
    DocumentType, Error, EventBus, EventEnvelope, LinkIndex, Note, NoteDocument, NoteEvent,
    Result, SearchColumn, SearchResult, SyncConfig, UnlinkedReferences, UserActivity,
};

use crate::autosave::{AutoSave, AutoSaveHandle};
use crate::handle::{NoteHandle, RemoteUpdate};
use crate::registry::NoteRegistry;
use crate::saver::{NoteSaver, SaveOutcome};

/// What [`Workspace::apply_remote`] did with a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteChange {
    /// The document came from this workspace's own source.
    OwnWrite,
    /// The note is live; see the inner result.
    Updated(RemoteUpdate),
    /// The note is not in memory; only the index was refreshed.
    NotLoaded,
    /// The note was deleted; `referrers` notes had their links rewritten.
    Deleted { referrers: usize },
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn LinkIndex>,
    registry: NoteRegistry,
    saver: NoteSaver,
    events: EventBus,
    config: Arc<SyncConfig>,
    autosave: Mutex<Option<AutoSaveHandle>>,
}

/// Note workspace. Clones share state.
#[derive(Clone)]
pub struct Workspace {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("config", &self.inner.config)
            .field("loaded", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Build a workspace over `store` and `index`.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn LinkIndex>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let events = EventBus::new(config.event_bus_capacity);
        let registry = NoteRegistry::new();
        let saver = NoteSaver::new(
            store.clone(),
            index.clone(),
            registry.clone(),
            config.clone(),
            events.clone(),
        );
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                index,
                registry,
                saver,
                events,
                config,
                autosave: Mutex::new(None),
            }),
        })
    }

    // ─── Accessors ────────────────────────────────────────────────────────

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.inner.events.subscribe()
    }

    pub fn registry(&self) -> &NoteRegistry {
        &self.inner.registry
    }

    pub fn saver(&self) -> &NoteSaver {
        &self.inner.saver
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    pub fn index(&self) -> &Arc<dyn LinkIndex> {
        &self.inner.index
    }

    // ─── Autosave ─────────────────────────────────────────────────────────

    fn autosave(&self) -> MutexGuard<'_, Option<AutoSaveHandle>> {
        self.inner
            .autosave
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start debounced autosave for every loaded note and every note
    /// loaded from now on. Must run inside a tokio runtime.
    pub fn start_autosave(&self) {
        let mut slot = self.autosave();
        if slot.is_some() {
            return;
        }
        let handle = AutoSave::new(
            self.inner.saver.clone(),
            self.inner.registry.clone(),
            self.inner.events.clone(),
            self.inner.config.autosave_debounce(),
        )
        .start();
        for id in self.inner.registry.ids() {
            handle.watch(id);
        }
        *slot = Some(handle);
    }

    /// Stop autosave. Edits made afterwards need explicit saves.
    pub fn stop_autosave(&self) {
        self.autosave().take();
    }

    /// Whether `note_id` is loaded and watched by autosave.
    pub fn is_autosaving(&self, note_id: Uuid) -> bool {
        let watched = self
            .autosave()
            .as_ref()
            .is_some_and(|autosave| autosave.is_watching(note_id));
        watched && self.inner.registry.contains(note_id)
    }

    fn register(&self, handle: Arc<NoteHandle>) -> Arc<NoteHandle> {
        let handle = self.inner.registry.get_or_insert(handle);
        if let Some(autosave) = self.autosave().as_ref() {
            autosave.watch(handle.id());
        }
        handle
    }

    // ─── Creation ─────────────────────────────────────────────────────────

    /// Create, register and save a plain note.
    pub async fn create(&self, title: &str) -> Result<Arc<NoteHandle>> {
        self.create_note(Note::new(title)).await
    }

    /// Create the journal note of `date`.
    pub async fn create_journal(&self, date: NaiveDate) -> Result<Arc<NoteHandle>> {
        self.create_note(Note::journal(date)).await
    }

    /// Create the note backing tab group `tab_group_id`.
    pub async fn create_tab_group(&self, title: &str, tab_group_id: Uuid) -> Result<Arc<NoteHandle>> {
        self.create_note(Note::tab_group(title, tab_group_id)).await
    }

    /// Register `note` and run its initial save.
    #[instrument(
        skip(self, note),
        fields(
            subsystem = logging::SUBSYSTEM_SYNC,
            component = logging::COMPONENT_WORKSPACE,
            op = "create",
            note_id = %note.id()
        )
    )]
    pub async fn create_note(&self, note: Note) -> Result<Arc<NoteHandle>> {
        let title = note.title().to_string();
        if title.is_empty() {
            return Err(Error::InvalidInput("note title must not be empty".into()));
        }
        if self.title_taken(&title, note.id()).await? {
            return Err(Error::InvalidInput(format!(
                "a note titled '{title}' already exists"
            )));
        }

        let handle = Arc::new(NoteHandle::new(
            note,
            defaults::INITIAL_VERSION,
            self.inner.events.clone(),
        ));
        handle.edit_silently(|n| n.record_activity(UserActivity::Created));
        let handle = self.register(handle);
        let note_id = handle.id();
        info!(note_title = %title, "Note created");
        self.inner.events.emit(NoteEvent::Created {
            note_id,
            title,
        });
        self.save(&handle).await?;
        Ok(handle)
    }

    async fn title_taken(&self, title: &str, except: Uuid) -> Result<bool> {
        if let Some(live) = self.inner.registry.get_by_title(title) {
            if live.id() != except {
                return Ok(true);
            }
        }
        let stored = self
            .inner
            .store
            .fetch_first(&[DocumentFilter::Title(title.to_string())])
            .await?;
        Ok(stored.is_some_and(|doc| doc.id != except))
    }

    // ─── Fetching ─────────────────────────────────────────────────────────

    /// Load the first stored note matching `filters`.
    ///
    /// A note already live in memory is returned as-is. With
    /// `keep_in_memory` a freshly decoded note is registered (and
    /// autosaved); without, the caller gets a detached copy.
    pub async fn fetch_with(
        &self,
        filters: &[DocumentFilter],
        keep_in_memory: bool,
    ) -> Result<Option<Arc<NoteHandle>>> {
        let Some(document) = self.inner.store.fetch_first(filters).await? else {
            return Ok(None);
        };
        if let Some(live) = self.inner.registry.get(document.id) {
            return Ok(Some(live));
        }
        let handle = Arc::new(NoteHandle::from_document(
            &document,
            self.inner.events.clone(),
        )?);
        if keep_in_memory {
            return Ok(Some(self.register(handle)));
        }
        Ok(Some(handle))
    }

    pub async fn fetch_by_id(&self, id: Uuid, keep_in_memory: bool) -> Result<Option<Arc<NoteHandle>>> {
        if let Some(live) = self.inner.registry.get(id) {
            return Ok(Some(live));
        }
        self.fetch_with(&[DocumentFilter::Id(id)], keep_in_memory)
            .await
    }

    pub async fn fetch_by_title(
        &self,
        title: &str,
        keep_in_memory: bool,
    ) -> Result<Option<Arc<NoteHandle>>> {
        if let Some(live) = self.inner.registry.get_by_title(title) {
            return Ok(Some(live));
        }
        self.fetch_with(&[DocumentFilter::Title(title.to_string())], keep_in_memory)
            .await
    }

    pub async fn fetch_journal(
        &self,
        date: NaiveDate,
        keep_in_memory: bool,
    ) -> Result<Option<Arc<NoteHandle>>> {
        self.fetch_with(
            &[
                DocumentFilter::Type(DocumentType::Journal),
                DocumentFilter::JournalDate(journal_date_key(date)),
            ],
            keep_in_memory,
        )
        .await
    }

    pub async fn fetch_tab_group(
        &self,
        tab_group_id: Uuid,
        keep_in_memory: bool,
    ) -> Result<Option<Arc<NoteHandle>>> {
        self.fetch_with(&[DocumentFilter::TabGroups(vec![tab_group_id])], keep_in_memory)
            .await
    }

    /// The live or stored note titled `title`, created when missing.
    pub async fn fetch_or_create(&self, title: &str) -> Result<Arc<NoteHandle>> {
        match self.fetch_by_title(title, true).await? {
            Some(handle) => Ok(handle),
            None => self.create(title).await,
        }
    }

    /// Journal note of `date`, created when missing.
    pub async fn fetch_or_create_journal(&self, date: NaiveDate) -> Result<Arc<NoteHandle>> {
        match self.fetch_journal(date, true).await? {
            Some(handle) => Ok(handle),
            None => self.create_journal(date).await,
        }
    }

    /// Titles of every stored note.
    pub async fn titles(&self) -> Result<Vec<String>> {
        self.inner.store.fetch_titles(&[]).await
    }

    // ─── Saving ───────────────────────────────────────────────────────────

    /// Save `handle` now.
    pub async fn save(&self, handle: &Arc<NoteHandle>) -> Result<SaveOutcome> {
        let outcome = self.inner.saver.save(handle).await?;
        if let SaveOutcome::AdoptedExisting { rejected_id, id, .. } = outcome {
            if let Some(autosave) = self.autosave().as_ref() {
                autosave.rewatch(rejected_id, id);
            }
        }
        Ok(outcome)
    }

    /// Save every loaded note with unsaved edits. Returns how many were
    /// saved; the first failure is returned after all saves ran.
    pub async fn flush(&self) -> Result<usize> {
        let dirty: Vec<Arc<NoteHandle>> = self
            .inner
            .registry
            .handles()
            .into_iter()
            .filter(|h| h.is_dirty() || h.saved_version() == defaults::INITIAL_VERSION)
            .collect();
        let results = join_all(dirty.iter().map(|h| self.save(h))).await;
        let mut saved = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(_) => saved += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }

    // ─── Remote changes ───────────────────────────────────────────────────

    /// Apply a document written elsewhere: merge it into the live note,
    /// purge a deletion, or refresh the index for a note not in memory.
    #[instrument(
        skip(self, document),
        fields(
            subsystem = logging::SUBSYSTEM_SYNC,
            component = logging::COMPONENT_WORKSPACE,
            op = "apply_remote",
            note_id = %document.id
        )
    )]
    pub async fn apply_remote(&self, document: &NoteDocument) -> Result<RemoteChange> {
        // Tombstones keep the source of the last write, so deletions are
        // purged whoever the source is.
        if document.is_deleted() {
            let referrers = self.purge_deleted(document).await?;
            return Ok(RemoteChange::Deleted { referrers });
        }
        if document.source == self.inner.config.source {
            debug!("Own write echoed back, ignored");
            return Ok(RemoteChange::OwnWrite);
        }

        let Some(handle) = self.inner.registry.get(document.id) else {
            match document.decode_note() {
                Ok(note) => self.reindex_note(&note).await,
                Err(e) => warn!(error = %e, "Undecodable remote document not indexed"),
            }
            return Ok(RemoteChange::NotLoaded);
        };

        let old_title = handle.title();
        let update = handle.update_with_document(document);
        if let RemoteUpdate::Applied { .. } = update {
            let new_title = handle.title();
            if old_title != new_title {
                self.inner.registry.rekey(document.id, &handle);
                self.inner.events.emit(NoteEvent::Renamed {
                    note_id: document.id,
                    old_title,
                    new_title,
                });
            }
            self.reindex_note(&handle.snapshot()).await;
        }
        Ok(RemoteChange::Updated(update))
    }

    /// Feed every document from `feed` into [`Workspace::apply_remote`]
    /// until the feed closes.
    pub fn spawn_remote_listener(&self, mut feed: broadcast::Receiver<NoteDocument>) -> JoinHandle<()> {
        let workspace = self.clone();
        tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(document) => {
                        if let Err(e) = workspace.apply_remote(&document).await {
                            warn!(note_id = %document.id, error = %e, "Remote change failed");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Remote feed lagged, rebuilding index");
                        if let Err(e) = workspace.reindex_all().await {
                            warn!(error = %e, "Reindex after lag failed");
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    // ─── Deletion ─────────────────────────────────────────────────────────

    /// Soft-delete a note in the store and purge it locally. Returns the
    /// number of referrers rewritten.
    pub async fn delete(&self, note_id: Uuid) -> Result<usize> {
        let tombstone = self.inner.store.soft_delete(note_id).await?;
        self.purge_deleted(&tombstone).await
    }

    /// Unload a deleted note and turn every internal link to it into plain
    /// text, saving the referrers. Returns the number of referrers
    /// rewritten.
    #[instrument(
        skip(self, tombstone),
        fields(
            subsystem = logging::SUBSYSTEM_SYNC,
            component = logging::COMPONENT_WORKSPACE,
            op = "purge",
            note_id = %tombstone.id
        )
    )]
    pub async fn purge_deleted(&self, tombstone: &NoteDocument) -> Result<usize> {
        let links = self.inner.index.fetch_links(tombstone.id).await?;

        if let Some(live) = self.inner.registry.get(tombstone.id) {
            live.edit_silently(|n| n.set_deleted(true));
        }
        self.unload_with(tombstone.id, NoteEvent::Deleted {
            note_id: tombstone.id,
        });
        if let Err(e) = self.inner.index.remove_note_id(tombstone.id).await {
            warn!(error = %e, "Index removal of deleted note failed");
        }

        let mut rewritten = 0;
        for referrer in referrer_ids(&links, tombstone.id) {
            let Some(handle) = self.fetch_by_id(referrer, false).await? else {
                continue;
            };
            let changed = handle.edit(|n| n.root_mut().unlink_note(&tombstone.title));
            if changed == 0 {
                continue;
            }
            match self.save(&handle).await {
                Ok(_) | Err(Error::SaveAlreadyRunning(_)) => rewritten += 1,
                Err(e) => return Err(e),
            }
        }
        info!(referrers = rewritten, "Deleted note purged");
        Ok(rewritten)
    }

    // ─── Rename ───────────────────────────────────────────────────────────

    /// Rename a note, retarget every internal link to it and save the
    /// note and its referrers.
    #[instrument(
        skip(self, handle),
        fields(
            subsystem = logging::SUBSYSTEM_SYNC,
            component = logging::COMPONENT_WORKSPACE,
            op = "rename",
            note_id = %handle.id()
        )
    )]
    pub async fn update_title(&self, handle: &Arc<NoteHandle>, new_title: &str) -> Result<SaveOutcome> {
        let new_title = valid_title(new_title);
        if new_title.is_empty() {
            return Err(Error::InvalidInput("note title must not be empty".into()));
        }
        let (note_id, old_title) = handle.read(|n| (n.id(), n.title().to_string()));
        if old_title == new_title {
            return self.save(handle).await;
        }
        if self.title_taken(&new_title, note_id).await? {
            return Err(Error::InvalidInput(format!(
                "a note titled '{new_title}' already exists"
            )));
        }

        // Referrers are found under the old title, before the note is
        // reindexed under the new one.
        let links = self.inner.index.fetch_links(note_id).await?;

        handle.edit(|n| {
            n.set_title(&new_title);
            n.root_mut().rename_internal_links(&old_title, &new_title);
        });
        self.inner.registry.rekey(note_id, handle);
        self.inner.events.emit(NoteEvent::Renamed {
            note_id,
            old_title: old_title.clone(),
            new_title: new_title.clone(),
        });
        let outcome = self.save(handle).await?;

        for referrer in referrer_ids(&links, note_id) {
            let Some(other) = self.fetch_by_id(referrer, false).await? else {
                continue;
            };
            let changed = other.edit(|n| n.root_mut().rename_internal_links(&old_title, &new_title));
            if changed > 0 {
                match self.save(&other).await {
                    Ok(_) | Err(Error::SaveAlreadyRunning(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        info!(old_title = %old_title, new_title = %new_title, "Note renamed");
        Ok(outcome)
    }

    // ─── Links ────────────────────────────────────────────────────────────

    /// Elements in other notes linking to `note_id`.
    pub async fn links_to(&self, note_id: Uuid) -> Result<Vec<BidirectionalLink>> {
        self.inner.index.fetch_links(note_id).await
    }

    /// Elements in other notes that mention the note's title without
    /// linking it.
    pub async fn unlinked_mentions(&self, handle: &NoteHandle) -> Result<Vec<SearchResult>> {
        let (note_id, title) = handle.read(|n| (n.id(), n.title().to_string()));
        let hits = self
            .inner
            .index
            .search(&title, SearchColumn::Text)
            .await?;
        Ok(hits
            .into_iter()
            .filter(|hit| hit.note_id != note_id)
            .filter(|hit| {
                let links = hit.link_ranges.as_deref().unwrap_or_default();
                title_occurrences(&hit.text, &title, true)
                    .iter()
                    .any(|span| !links.iter().any(|l| l.start < span.end && span.start < l.end))
            })
            .collect())
    }

    /// Mentions of other notes' titles inside this note that are not
    /// linked yet, grouped by title.
    pub async fn unlinked_references(&self, handle: &NoteHandle) -> Result<UnlinkedReferences> {
        let titles = self.other_titles(handle).await?;
        Ok(handle.read(|n| n.root().deep_unlinked_references(&titles)))
    }

    /// Link every literal mention of another note's title inside this
    /// note. Returns the number of spans linked.
    pub async fn fold_links(&self, handle: &NoteHandle) -> Result<usize> {
        let titles = self.other_titles(handle).await?;
        Ok(handle.edit(|n| n.root_mut().fold_internal_links(&titles)))
    }

    async fn other_titles(&self, handle: &NoteHandle) -> Result<Vec<String>> {
        let own = handle.title();
        Ok(self
            .titles()
            .await?
            .into_iter()
            .filter(|t| !same_title(t, &own))
            .collect())
    }

    // ─── Memory ───────────────────────────────────────────────────────────

    /// Drop a note from the registry and autosave. Nothing is saved.
    pub fn unload(&self, note_id: Uuid) -> bool {
        self.unload_with(note_id, NoteEvent::Unloaded { note_id })
    }

    fn unload_with(&self, note_id: Uuid, event: NoteEvent) -> bool {
        if let Some(autosave) = self.autosave().as_ref() {
            autosave.unwatch(note_id);
        }
        let removed = self.inner.registry.remove(note_id);
        self.inner.events.emit(event);
        removed
    }

    // ─── Index ────────────────────────────────────────────────────────────

    async fn reindex_note(&self, note: &Note) {
        if let Err(e) = self.inner.index.append_note(note).await {
            warn!(note_id = %note.id(), error = %e, "Reindex failed");
        }
    }

    /// Rebuild the index from every stored document. Live notes are
    /// indexed from memory. Returns the number of notes indexed.
    #[instrument(
        skip(self),
        fields(
            subsystem = logging::SUBSYSTEM_SYNC,
            component = logging::COMPONENT_WORKSPACE,
            op = "reindex"
        )
    )]
    pub async fn reindex_all(&self) -> Result<usize> {
        let documents = self.inner.store.fetch_all(&[]).await?;
        let notes: Vec<Note> = documents
            .iter()
            .filter_map(|doc| match self.inner.registry.get(doc.id) {
                Some(live) => Some(live.snapshot()),
                None => match doc.decode_note() {
                    Ok(note) => Some(note),
                    Err(e) => {
                        warn!(note_id = %doc.id, error = %e, "Skipping undecodable document");
                        None
                    }
                },
            })
            .collect();
        let results = join_all(notes.iter().map(|note| self.inner.index.append_note(note))).await;
        let mut indexed = 0;
        for result in results {
            result?;
            indexed += 1;
        }
        info!(count = indexed, "Index rebuilt");
        Ok(indexed)
    }
}

/// Distinct source notes of `links`, excluding `target`.
fn referrer_ids(links: &[BidirectionalLink], target: Uuid) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    links
        .iter()
        .map(|link| link.source_note_id)
        .filter(|id| *id != target && seen.insert(*id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referrer_ids_are_distinct_and_exclude_target() {
        let target = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let link = |note| BidirectionalLink {
            source_note_id: note,
            source_element_id: Uuid::new_v4(),
        };
        let links = vec![link(a), link(target), link(a), link(b)];
        assert_eq!(referrer_ids(&links, target), vec![a, b]);
    }
}
