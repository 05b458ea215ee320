//! Identity map of live notes.
//!
//! Entries are weak: the registry never keeps a note alive. While some
//! caller holds a handle, every lookup for that note returns the same
//! instance. Autosave wiring is separate (see [`crate::autosave`]).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use uuid::Uuid;

use noteweave_core::{logging, title_key};

use crate::handle::NoteHandle;

#[derive(Debug, Default)]
struct RegistryState {
    by_id: HashMap<Uuid, Weak<NoteHandle>>,
    /// Title key to note id.
    by_title: HashMap<String, Uuid>,
}

impl RegistryState {
    fn live(&self, id: Uuid) -> Option<Arc<NoteHandle>> {
        self.by_id.get(&id).and_then(Weak::upgrade)
    }

    fn forget(&mut self, id: Uuid) -> bool {
        self.by_title.retain(|_, v| *v != id);
        self.by_id.remove(&id).is_some()
    }
}

/// Weak identity map keyed by note id and title. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct NoteRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl NoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handle` under its id and title, replacing any previous
    /// entry for either key.
    pub fn insert(&self, handle: &Arc<NoteHandle>) {
        let (id, title) = handle.read(|n| (n.id(), n.title_key()));
        let mut state = self.lock();
        state.forget(id);
        state.by_id.insert(id, Arc::downgrade(handle));
        state.by_title.insert(title, id);
        tracing::trace!(
            subsystem = logging::SUBSYSTEM_SYNC,
            component = logging::COMPONENT_REGISTRY,
            note_id = %id,
            "Note registered"
        );
    }

    /// Register `handle` unless a live note with its id is already known,
    /// and return whichever instance is registered afterwards.
    pub fn get_or_insert(&self, handle: Arc<NoteHandle>) -> Arc<NoteHandle> {
        let (id, title) = handle.read(|n| (n.id(), n.title_key()));
        let mut state = self.lock();
        if let Some(live) = state.live(id) {
            return live;
        }
        state.forget(id);
        state.by_id.insert(id, Arc::downgrade(&handle));
        state.by_title.insert(title, id);
        handle
    }

    /// Live note by id. Dead entries are pruned on the way.
    pub fn get(&self, id: Uuid) -> Option<Arc<NoteHandle>> {
        let mut state = self.lock();
        let found = state.live(id);
        if found.is_none() && state.by_id.contains_key(&id) {
            state.forget(id);
        }
        found
    }

    /// Live note by title, case-insensitively.
    pub fn get_by_title(&self, title: &str) -> Option<Arc<NoteHandle>> {
        let id = *self.lock().by_title.get(&title_key(title))?;
        self.get(id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.get(id).is_some()
    }

    /// Drop the entry for `id`. Returns whether one existed.
    pub fn remove(&self, id: Uuid) -> bool {
        self.lock().forget(id)
    }

    /// Re-register a note whose id or title changed.
    pub fn rekey(&self, previous_id: Uuid, handle: &Arc<NoteHandle>) {
        self.lock().forget(previous_id);
        self.insert(handle);
    }

    /// Live handles, in no particular order.
    pub fn handles(&self) -> Vec<Arc<NoteHandle>> {
        self.lock().by_id.values().filter_map(Weak::upgrade).collect()
    }

    /// Ids of live notes.
    pub fn ids(&self) -> Vec<Uuid> {
        let state = self.lock();
        state
            .by_id
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of live notes.
    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove entries whose note was dropped. Returns how many went.
    pub fn prune(&self) -> usize {
        let mut state = self.lock();
        let dead: Vec<Uuid> = state
            .by_id
            .iter()
            .filter(|(_, weak)| weak.strong_count() == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            state.forget(*id);
        }
        dead.len()
    }
}
