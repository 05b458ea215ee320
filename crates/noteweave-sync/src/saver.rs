//! Optimistic-concurrency save protocol.
//!
//! A save bumps the note version, encodes the note and submits it with the
//! last persisted version as the expected one. On a version conflict the
//! competing stored version is absorbed (elements this side never saw are
//! adopted, local content wins), the counters realign with the store and
//! the merged tree is resubmitted.
//! Storage failures back off and retry. Before each save, literal mentions
//! of other notes' titles are folded into links. A duplicate-title rejection
//! replaces the local note with the stored holder of the title and
//! tombstones the rejected id.

use std::sync::Arc;
use std::time::Instant;

use tracing::instrument;
use uuid::Uuid;

use noteweave_core::logging;
use noteweave_core::references::same_title;
use noteweave_core::{
    DocumentFilter, DocumentStore, Error, EventBus, LinkIndex, NoteDocument, NoteEvent, Result,
    SyncConfig,
};

use crate::handle::{NoteHandle, SaveTicket};
use crate::registry::NoteRegistry;

/// How a save ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The store holds the note at `version`.
    Saved { version: i64 },
    /// The title was taken. The handle now holds the existing document
    /// `id`; the content submitted under `rejected_id` was discarded.
    AdoptedExisting {
        rejected_id: Uuid,
        id: Uuid,
        version: i64,
    },
}

impl SaveOutcome {
    pub fn version(&self) -> i64 {
        match self {
            SaveOutcome::Saved { version } | SaveOutcome::AdoptedExisting { version, .. } => {
                *version
            }
        }
    }
}

/// Runs saves against a [`DocumentStore`] and keeps the link index fresh.
#[derive(Clone)]
pub struct NoteSaver {
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn LinkIndex>,
    registry: NoteRegistry,
    config: Arc<SyncConfig>,
    events: EventBus,
}

impl std::fmt::Debug for NoteSaver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteSaver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl NoteSaver {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn LinkIndex>,
        registry: NoteRegistry,
        config: Arc<SyncConfig>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            index,
            registry,
            config,
            events,
        }
    }

    /// Save `handle`, then run one follow-up save for every batch of
    /// requests that arrived while it was in flight.
    ///
    /// Fails with [`Error::SaveAlreadyRunning`] when another save of the
    /// same note is in flight; that save picks the request up.
    #[instrument(
        skip(self, handle),
        fields(
            subsystem = logging::SUBSYSTEM_SYNC,
            component = logging::COMPONENT_SAVER,
            op = "save",
            note_id = %handle.id()
        )
    )]
    pub async fn save(&self, handle: &Arc<NoteHandle>) -> Result<SaveOutcome> {
        let (mut outcome, mut pending) = self.save_once(handle).await?;
        while pending > 0 {
            tracing::debug!(pending_save = pending, "Running follow-up save");
            match self.save_once(handle).await {
                Ok((next, next_pending)) => {
                    outcome = next;
                    pending = next_pending;
                }
                Err(Error::SaveAlreadyRunning(_)) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    /// Encode the note, along with the element ids the document carries.
    fn encode(&self, handle: &NoteHandle, version: i64) -> Result<(NoteDocument, Vec<Uuid>)> {
        let database_id = self.config.database_id.unwrap_or_else(Uuid::nil);
        handle.read(|note| {
            let document =
                NoteDocument::from_note(note, version, database_id, &self.config.source)?;
            Ok((document, note.root().subtree_ids()))
        })
    }

    /// Fold the stored version that beat this save into the live note.
    async fn absorb_stored(&self, handle: &NoteHandle, note_id: Uuid) {
        let stored = match self.store.fetch_first(&[DocumentFilter::Id(note_id)]).await {
            Ok(Some(stored)) if !stored.is_deleted() => stored,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(
                    note_id = %note_id,
                    error = %e,
                    "Could not fetch the conflicting version, resubmitting local tree"
                );
                return;
            }
        };
        match handle.absorb_document(&stored) {
            Ok(adopted) => tracing::debug!(
                note_id = %note_id,
                incoming_version = stored.version,
                count = adopted,
                "Absorbed conflicting version"
            ),
            Err(e) => tracing::warn!(
                note_id = %note_id,
                incoming_version = stored.version,
                error = %e,
                "Conflicting version undecodable, resubmitting local tree"
            ),
        }
    }

    /// Link mentions of other notes' titles. A failed title lookup leaves
    /// the note as it is.
    async fn fold_links(&self, handle: &NoteHandle) {
        if !self.config.fold_links_on_save {
            return;
        }
        let titles = match self.store.fetch_titles(&[]).await {
            Ok(titles) => titles,
            Err(e) => {
                tracing::warn!(
                    note_id = %handle.id(),
                    error = %e,
                    "Title lookup for link folding failed"
                );
                return;
            }
        };
        let own = handle.title();
        let titles: Vec<String> = titles
            .into_iter()
            .filter(|t| !same_title(t, &own))
            .collect();
        // Silent: the save below carries the result.
        let folded = handle.edit_silently(|n| n.root_mut().fold_internal_links(&titles));
        if folded > 0 {
            tracing::debug!(
                note_id = %handle.id(),
                count = folded,
                "Folded title mentions into links"
            );
        }
    }

    async fn save_once(&self, handle: &Arc<NoteHandle>) -> Result<(SaveOutcome, u32)> {
        let started = Instant::now();
        self.fold_links(handle).await;
        let mut ticket = handle.begin_save()?;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let (document, element_ids) = match self.encode(handle, ticket.version()) {
                Ok(encoded) => encoded,
                Err(e) => {
                    ticket.fail(false);
                    return Err(e);
                }
            };
            let note_id = document.id;
            if document.is_empty_body(self.config.min_document_bytes) {
                ticket.fail(false);
                tracing::error!(
                    note_id = %note_id,
                    bytes = document.data.len(),
                    "Refusing to persist an empty document"
                );
                return Err(Error::EmptyDocument(note_id));
            }

            match self.store.save(document, ticket.expected()).await {
                Ok(stored) => {
                    let pending = ticket.complete(stored);
                    handle.record_persisted(element_ids);
                    tracing::info!(
                        note_id = %note_id,
                        version = stored,
                        attempt,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Note saved"
                    );
                    self.reindex(handle).await;
                    self.events.emit(NoteEvent::Saved {
                        note_id,
                        version: stored,
                    });
                    return Ok((SaveOutcome::Saved { version: stored }, pending));
                }
                Err(Error::VersionConflict { stored, .. })
                    if attempt <= self.config.max_save_retries =>
                {
                    tracing::warn!(
                        note_id = %note_id,
                        saved_version = ticket.expected(),
                        stored,
                        attempt,
                        "Version conflict, merging the stored version and resubmitting"
                    );
                    self.absorb_stored(handle, note_id).await;
                    ticket.retry(Some(stored));
                }
                Err(Error::DuplicateTitle { existing, .. }) => {
                    let outcome = self.adopt_existing(handle, ticket, note_id, *existing).await?;
                    return Ok((outcome, 0));
                }
                Err(e) if e.is_retryable() && attempt <= self.config.max_save_retries => {
                    let backoff = self.config.retry_backoff(attempt);
                    tracing::warn!(
                        note_id = %note_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Save failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    ticket.retry(None);
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    ticket.fail(retryable);
                    tracing::error!(
                        note_id = %note_id,
                        attempt,
                        pending_save = handle.pending_save(),
                        error = %e,
                        "Save gave up"
                    );
                    self.events.emit(NoteEvent::SaveFailed {
                        note_id,
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
    }

    async fn adopt_existing(
        &self,
        handle: &Arc<NoteHandle>,
        ticket: SaveTicket<'_>,
        rejected_id: Uuid,
        existing: NoteDocument,
    ) -> Result<SaveOutcome> {
        let id = existing.id;
        let version = existing.version;
        if let Err(e) = ticket.adopt(&existing) {
            self.events.emit(NoteEvent::SaveFailed {
                note_id: rejected_id,
                error: e.to_string(),
            });
            return Err(e);
        }
        tracing::warn!(
            note_id = %rejected_id,
            existing_id = %id,
            note_title = %existing.title,
            version,
            "Title already taken, adopted the existing note and discarded local content"
        );

        if self.registry.remove(rejected_id) {
            self.registry.insert(handle);
        }
        match self.store.soft_delete(rejected_id).await {
            Ok(_) | Err(Error::NoteNotFound(_)) => {}
            Err(e) => tracing::warn!(
                note_id = %rejected_id,
                error = %e,
                "Could not tombstone rejected document"
            ),
        }
        if let Err(e) = self.index.remove_note_id(rejected_id).await {
            tracing::warn!(note_id = %rejected_id, error = %e, "Index removal failed");
        }
        self.reindex(handle).await;
        self.events.emit(NoteEvent::Saved {
            note_id: id,
            version,
        });
        Ok(SaveOutcome::AdoptedExisting {
            rejected_id,
            id,
            version,
        })
    }

    /// Best-effort reindex of the saved note.
    async fn reindex(&self, handle: &NoteHandle) {
        let snapshot = handle.snapshot();
        if let Err(e) = self.index.append_note(&snapshot).await {
            tracing::warn!(
                note_id = %snapshot.id(),
                error = %e,
                "Reindex after save failed"
            );
        }
    }
}
