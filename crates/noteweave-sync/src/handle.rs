//! Live, shareable note: the note behind a reader-writer lock plus its
//! optimistic-concurrency counters.
//!
//! Every element of the tree is reached through the note lock, so
//! background readers (indexing, link scans) run concurrently with each
//! other but never with a writer. Counter transitions happen under their
//! own mutex and are never held across an await.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use noteweave_core::{
    logging, merge, ElementChange, Error, EventBus, Note, NoteDocument, NoteEvent, Result,
};

/// Optimistic-concurrency counters of a note.
///
/// `saved_version <= version` holds at all times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaveState {
    /// Latest local generation.
    pub version: i64,
    /// Last generation confirmed persisted.
    pub saved_version: i64,
    /// A save is in flight.
    pub saving: bool,
    /// Save requests that arrived while one was in flight or failed.
    pub pending_save: u32,
    /// Published edits no save has picked up yet.
    pub dirty: bool,
}

/// Result of applying a remote document to a live note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteUpdate {
    /// Merged; the note now carries the incoming version.
    Applied { version: i64 },
    /// Incoming version not newer than the local one; nothing changed.
    Stale { local: i64, incoming: i64 },
    /// Payload could not be decoded; nothing changed.
    Dropped,
}

/// A note shared between editors, the save protocol and remote updates.
#[derive(Debug)]
pub struct NoteHandle {
    note: RwLock<Note>,
    state: Mutex<SaveState>,
    /// Element ids the store has seen from or sent to this handle.
    persisted: Mutex<HashSet<Uuid>>,
    events: EventBus,
}

impl NoteHandle {
    /// Wrap a note whose persisted version is `version` (0 when never
    /// saved).
    pub fn new(note: Note, version: i64, events: EventBus) -> Self {
        let persisted = note.root().subtree_ids().into_iter().collect();
        Self {
            note: RwLock::new(note),
            persisted: Mutex::new(persisted),
            state: Mutex::new(SaveState {
                version,
                saved_version: version,
                saving: false,
                pending_save: 0,
                dirty: false,
            }),
            events,
        }
    }

    /// Wrap the note stored in `document`.
    pub fn from_document(document: &NoteDocument, events: EventBus) -> Result<Self> {
        let note = document.decode_note()?;
        Ok(Self::new(note, document.version, events))
    }

    fn read_note(&self) -> RwLockReadGuard<'_, Note> {
        self.note.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_note(&self) -> RwLockWriteGuard<'_, Note> {
        self.note.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn counters(&self) -> MutexGuard<'_, SaveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persisted_ids(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        self.persisted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember the element ids of a tree the store now holds.
    pub(crate) fn record_persisted(&self, ids: Vec<Uuid>) {
        *self.persisted_ids() = ids.into_iter().collect();
    }

    // ─── Reading ──────────────────────────────────────────────────────────

    pub fn id(&self) -> Uuid {
        self.read_note().id()
    }

    pub fn title(&self) -> String {
        self.read_note().title().to_string()
    }

    /// Run `f` under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&Note) -> R) -> R {
        f(&self.read_note())
    }

    /// Hold the read lock. Do not keep the guard across an await.
    pub fn read_lock(&self) -> RwLockReadGuard<'_, Note> {
        self.read_note()
    }

    /// Independent copy of the current note.
    pub fn snapshot(&self) -> Note {
        self.read_note().clone()
    }

    pub fn save_state(&self) -> SaveState {
        *self.counters()
    }

    pub fn version(&self) -> i64 {
        self.counters().version
    }

    pub fn saved_version(&self) -> i64 {
        self.counters().saved_version
    }

    pub fn pending_save(&self) -> u32 {
        self.counters().pending_save
    }

    pub fn is_saving(&self) -> bool {
        self.counters().saving
    }

    /// Whether edits exist that no save has picked up.
    pub fn is_dirty(&self) -> bool {
        let state = self.save_state();
        state.dirty || state.pending_save > 0 || self.read_note().has_pending_changes()
    }

    // ─── Editing ──────────────────────────────────────────────────────────

    /// Mutate the note under the write lock and publish one
    /// [`NoteEvent::Changed`] per changed element and kind.
    pub fn edit<R>(&self, f: impl FnOnce(&mut Note) -> R) -> R {
        let (result, note_id, changes) = {
            let mut note = self.write_note();
            let result = f(&mut note);
            let changes = note.take_changes();
            (result, note.id(), changes)
        };
        if !changes.is_empty() {
            self.counters().dirty = true;
        }
        self.publish(note_id, changes);
        result
    }

    /// Mutate the note without publishing anything. Change logs are
    /// drained on every exit path.
    pub fn edit_silently<R>(&self, f: impl FnOnce(&mut Note) -> R) -> R {
        let mut guard = Drained(self.write_note());
        f(&mut *guard.0)
    }

    fn publish(&self, note_id: Uuid, changes: Vec<ElementChange>) {
        let mut seen = HashSet::new();
        for change in changes {
            if seen.insert((change.element_id, change.kind)) {
                self.events.emit(NoteEvent::Changed {
                    note_id,
                    element_id: change.element_id,
                    kind: change.kind,
                });
            }
        }
    }

    // ─── Remote updates ───────────────────────────────────────────────────

    /// Merge a newer remote document into the live note.
    ///
    /// Documents whose version is not above the local version are ignored,
    /// as are undecodable payloads. A merge publishes no change events.
    ///
    /// The version check, the merge and the counter update happen under one
    /// write lock, so concurrent documents apply in version order.
    pub fn update_with_document(&self, document: &NoteDocument) -> RemoteUpdate {
        if let Some(stale) = self.stale(document) {
            return stale;
        }

        let incoming = match document.decode_note() {
            Ok(note) => note,
            Err(e) => {
                tracing::error!(
                    subsystem = logging::SUBSYSTEM_SYNC,
                    component = logging::COMPONENT_HANDLE,
                    op = "apply_remote",
                    note_id = %document.id,
                    incoming_version = document.version,
                    error = %e,
                    "Undecodable remote document dropped"
                );
                return RemoteUpdate::Dropped;
            }
        };

        let applied = {
            let mut guard = Drained(self.write_note());
            // Another document may have landed while this one decoded.
            if let Some(stale) = self.stale(document) {
                return stale;
            }
            let note: &mut Note = &mut guard.0;
            note.adopt_metadata(&incoming);
            let applied = merge::plan(note.root(), incoming.root()).apply(note.root_mut());
            *self.persisted_ids() = note.root().subtree_ids().into_iter().collect();
            let mut state = self.counters();
            state.version = state.version.max(document.version);
            state.saved_version = state.saved_version.max(document.version);
            applied
        };
        tracing::debug!(
            subsystem = logging::SUBSYSTEM_SYNC,
            component = logging::COMPONENT_HANDLE,
            op = "apply_remote",
            note_id = %document.id,
            version = document.version,
            count = applied,
            "Remote document merged"
        );
        self.events.emit(NoteEvent::RemoteApplied {
            note_id: document.id,
            version: document.version,
        });
        RemoteUpdate::Applied {
            version: document.version,
        }
    }

    fn stale(&self, document: &NoteDocument) -> Option<RemoteUpdate> {
        let local = self.version();
        if document.version > local {
            return None;
        }
        tracing::debug!(
            subsystem = logging::SUBSYSTEM_SYNC,
            component = logging::COMPONENT_HANDLE,
            op = "apply_remote",
            note_id = %document.id,
            version = local,
            incoming_version = document.version,
            "Stale remote document skipped"
        );
        Some(RemoteUpdate::Stale {
            local,
            incoming: document.version,
        })
    }

    /// Take the elements of a competing stored version that this handle has
    /// never seen, keeping every local element as it is. Used when a save
    /// loses a version race; the counters are left to the save.
    pub fn absorb_document(&self, document: &NoteDocument) -> Result<usize> {
        let incoming = document.decode_note()?;
        let mut guard = Drained(self.write_note());
        let mut persisted = self.persisted_ids();
        let adopted = merge::absorb(guard.0.root_mut(), incoming.root(), &persisted);
        persisted.extend(incoming.root().subtree_ids());
        Ok(adopted)
    }

    /// Replace the whole note with `document`, identity included.
    pub(crate) fn replace_with_document(&self, document: &NoteDocument) -> Result<()> {
        let incoming = document.decode_note()?;
        self.record_persisted(incoming.root().subtree_ids());
        *self.write_note() = incoming;
        let mut state = self.counters();
        state.version = document.version;
        state.saved_version = document.version;
        Ok(())
    }

    // ─── Save counters ────────────────────────────────────────────────────

    /// Enter the saving state, bump the version and absorb earlier pending
    /// requests.
    ///
    /// Refused with [`Error::SaveAlreadyRunning`] while a save is in flight
    /// or the counters disagree; the refusal bumps `pending_save`.
    pub fn begin_save(&self) -> Result<SaveTicket<'_>> {
        let id = self.id();
        let mut state = self.counters();
        if state.saving || state.version != state.saved_version {
            state.pending_save += 1;
            tracing::debug!(
                subsystem = logging::SUBSYSTEM_SYNC,
                component = logging::COMPONENT_HANDLE,
                op = "save",
                note_id = %id,
                version = state.version,
                saved_version = state.saved_version,
                pending_save = state.pending_save,
                "Save already running"
            );
            return Err(Error::SaveAlreadyRunning(id));
        }
        state.saving = true;
        state.dirty = false;
        // This save covers every request made before it.
        state.pending_save = 0;
        state.version += 1;
        Ok(SaveTicket {
            handle: self,
            expected: state.saved_version,
            version: state.version,
            finished: false,
        })
    }

    /// Record a save request to be honoured later.
    pub fn mark_pending(&self) -> u32 {
        let mut state = self.counters();
        state.pending_save += 1;
        state.pending_save
    }
}

/// Write guard that drops the note's change log on release.
struct Drained<'a>(RwLockWriteGuard<'a, Note>);

impl Drop for Drained<'_> {
    fn drop(&mut self) {
        self.0.discard_changes();
    }
}

/// An in-flight save. Dropping an unfinished ticket rolls the version
/// back and leaves the saving state.
#[derive(Debug)]
pub struct SaveTicket<'a> {
    handle: &'a NoteHandle,
    expected: i64,
    version: i64,
    finished: bool,
}

impl SaveTicket<'_> {
    /// Version the store is expected to hold.
    pub fn expected(&self) -> i64 {
        self.expected
    }

    /// Version this attempt writes.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Prepare another attempt. With `stored`, the counters first align
    /// to the version the store reported.
    pub fn retry(&mut self, stored: Option<i64>) {
        let mut state = self.handle.counters();
        if let Some(stored) = stored {
            state.saved_version = stored;
        }
        state.version = state.saved_version + 1;
        self.expected = state.saved_version;
        self.version = state.version;
    }

    /// The store accepted `stored`. Returns the pending-save count that
    /// was reset.
    pub fn complete(mut self, stored: i64) -> u32 {
        self.finished = true;
        let mut state = self.handle.counters();
        state.saved_version = state.saved_version.max(stored);
        state.version = state.version.max(state.saved_version);
        state.saving = false;
        std::mem::take(&mut state.pending_save)
    }

    /// The note was replaced by `document`.
    pub fn adopt(mut self, document: &NoteDocument) -> Result<()> {
        self.finished = true;
        let replaced = self.handle.replace_with_document(document);
        let mut state = self.handle.counters();
        if replaced.is_err() {
            state.version = state.saved_version;
            state.dirty = true;
        } else {
            state.pending_save = 0;
            state.dirty = false;
        }
        state.saving = false;
        replaced
    }

    /// Give up. The version rolls back; with `keep_pending` the request is
    /// remembered for a later save.
    pub fn fail(mut self, keep_pending: bool) {
        self.finished = true;
        let mut state = self.handle.counters();
        state.version = state.saved_version;
        state.saving = false;
        state.dirty = true;
        if keep_pending {
            state.pending_save += 1;
        }
    }
}

impl Drop for SaveTicket<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let mut state = self.handle.counters();
            state.version = state.saved_version;
            state.saving = false;
            state.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noteweave_core::{ChangeKind, Element};

    fn handle(title: &str) -> NoteHandle {
        NoteHandle::new(Note::new(title), 0, EventBus::new(32))
    }

    #[test]
    fn test_begin_save_bumps_version() {
        let h = handle("A");
        let ticket = h.begin_save().unwrap();
        assert_eq!((ticket.expected(), ticket.version()), (0, 1));
        assert!(h.is_saving());
        assert_eq!(ticket.complete(1), 0);
        let state = h.save_state();
        assert_eq!((state.version, state.saved_version, state.saving), (1, 1, false));
    }

    #[test]
    fn test_second_save_is_refused_and_counted() {
        let h = handle("A");
        let ticket = h.begin_save().unwrap();
        let err = h.begin_save().unwrap_err();
        assert!(matches!(err, Error::SaveAlreadyRunning(_)));
        assert_eq!(h.pending_save(), 1);
        assert_eq!(ticket.complete(1), 1);
        assert_eq!(h.pending_save(), 0);
    }

    #[test]
    fn test_dropped_ticket_rolls_back() {
        let h = handle("A");
        {
            let _ticket = h.begin_save().unwrap();
            assert_eq!(h.version(), 1);
        }
        let state = h.save_state();
        assert_eq!((state.version, state.saved_version, state.saving), (0, 0, false));
    }

    #[test]
    fn test_retry_aligns_to_stored_version() {
        let h = handle("A");
        let mut ticket = h.begin_save().unwrap();
        ticket.retry(Some(7));
        assert_eq!((ticket.expected(), ticket.version()), (7, 8));
        ticket.complete(8);
        assert_eq!(h.saved_version(), 8);
        assert_eq!(h.version(), 8);
    }

    #[test]
    fn test_published_edits_mark_dirty_until_saved() {
        let h = handle("Dirty");
        assert!(!h.is_dirty());
        h.edit(|n| n.root_mut().add_child(Element::with_text("x")));
        assert!(h.is_dirty());

        let ticket = h.begin_save().unwrap();
        assert!(!h.is_dirty());
        drop(ticket);
        assert!(h.is_dirty());

        h.begin_save().unwrap().complete(1);
        assert!(!h.is_dirty());
    }

    #[test]
    fn test_fail_keeps_pending() {
        let h = handle("A");
        h.begin_save().unwrap().fail(true);
        let state = h.save_state();
        assert_eq!((state.version, state.pending_save, state.saving), (0, 1, false));
    }

    #[tokio::test]
    async fn test_edit_publishes_changes_once_per_element_and_kind() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let h = NoteHandle::new(Note::new("Edited"), 0, bus);

        let child = h.edit(|note| {
            let child = Element::with_text("x");
            let id = child.id();
            note.root_mut().add_child(child);
            let element = note.find_element_mut(id).unwrap();
            element.set_text("y");
            element.set_text("z");
            id
        });

        let mut seen = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            if let NoteEvent::Changed {
                element_id, kind, ..
            } = envelope.payload
            {
                seen.push((element_id, kind));
            }
        }
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&(h.id(), ChangeKind::Tree)));
        assert!(seen.contains(&(child, ChangeKind::Text)));
        assert!(!h.read(Note::has_pending_changes));
    }

    #[tokio::test]
    async fn test_edit_silently_publishes_nothing() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let h = NoteHandle::new(Note::new("Quiet"), 0, bus);
        h.edit_silently(|note| note.root_mut().add_child(Element::with_text("x")));
        assert!(rx.try_recv().is_err());
        assert!(!h.read(Note::has_pending_changes));
    }

    #[test]
    fn test_edit_silently_drains_on_panic() {
        let h = handle("Panicky");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            h.edit_silently(|note| {
                note.root_mut().add_child(Element::with_text("x"));
                panic!("boom");
            })
        }));
        assert!(result.is_err());
        assert!(!h.read(Note::has_pending_changes));
    }

    #[test]
    fn test_stale_document_leaves_note_untouched() {
        let h = NoteHandle::new(Note::new("Stale"), 5, EventBus::new(8));
        let before = h.read(|n| n.encode().unwrap());
        let mut remote = h.snapshot();
        remote.root_mut().add_child(Element::with_text("remote"));
        let doc = NoteDocument::from_note(&remote, 5, Uuid::nil(), "remote").unwrap();

        assert_eq!(
            h.update_with_document(&doc),
            RemoteUpdate::Stale {
                local: 5,
                incoming: 5
            }
        );
        assert_eq!(h.read(|n| n.encode().unwrap()), before);
    }

    #[test]
    fn test_undecodable_document_is_dropped() {
        let h = handle("Corrupt");
        let mut doc = NoteDocument::from_note(&h.snapshot(), 3, Uuid::nil(), "remote").unwrap();
        doc.data = b"not json".to_vec();
        assert_eq!(h.update_with_document(&doc), RemoteUpdate::Dropped);
        assert_eq!(h.version(), 0);
    }

    #[test]
    fn test_concurrent_documents_apply_in_version_order() {
        for _ in 0..200 {
            let mut base = Note::new("Race");
            base.root_mut().add_child(Element::with_text("five"));
            let child = base.root().children()[0].id();
            let document = |text: &str, version: i64| {
                let mut note = base.clone();
                note.find_element_mut(child).unwrap().set_text(text);
                NoteDocument::from_note(&note, version, Uuid::nil(), "remote").unwrap()
            };
            let six = document("six", 6);
            let seven = document("seven", 7);
            let h = NoteHandle::new(base.clone(), 5, EventBus::new(8));

            std::thread::scope(|scope| {
                scope.spawn(|| h.update_with_document(&six));
                scope.spawn(|| h.update_with_document(&seven));
            });

            assert_eq!(h.version(), 7);
            assert_eq!(
                h.read(|n| n.find_element(child).unwrap().text().text()),
                "seven"
            );
        }
    }
}
