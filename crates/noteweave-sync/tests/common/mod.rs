//! Shared workspace fixture for sync integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use noteweave_store::{FlakyDocumentStore, MemoryDocumentStore, MemoryLinkIndex};
use noteweave_sync::{NoteEvent, SyncConfig, Workspace};
use tokio::sync::broadcast;

/// A workspace over in-memory backends, with the backends kept reachable.
pub struct TestWorkspace {
    pub workspace: Workspace,
    pub store: FlakyDocumentStore,
    pub index: MemoryLinkIndex,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        Self::sharing(MemoryDocumentStore::new(), MemoryLinkIndex::new(), config)
    }

    /// A second device over the same store and index.
    pub fn sharing(store: MemoryDocumentStore, index: MemoryLinkIndex, config: SyncConfig) -> Self {
        let store = FlakyDocumentStore::wrapping(store);
        let workspace = Workspace::new(Arc::new(store.clone()), Arc::new(index.clone()), config)
            .expect("valid test config");
        Self {
            workspace,
            store,
            index,
        }
    }

    pub fn memory(&self) -> &MemoryDocumentStore {
        self.store.inner()
    }
}

/// Default config with a short backoff so retry tests stay quick.
pub fn fast_config() -> SyncConfig {
    SyncConfig::default()
        .with_retry_backoff_ms(1)
        .with_autosave_debounce_ms(500)
}

/// Drain every event currently buffered in `rx`.
pub fn drain(rx: &mut broadcast::Receiver<noteweave_sync::EventEnvelope>) -> Vec<NoteEvent> {
    let mut events = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        events.push(envelope.payload);
    }
    events
}
