//! Debounced autosave.
//!
//! Listens for [`NoteEvent::Changed`] on the event bus and saves each
//! watched note once its edits have been quiet for the debounce period.
//! Watching is an explicit registration, independent of the registry.
//! A note whose save fails with a retryable error is tried again without a
//! new edit, after a backoff that doubles with each failure.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use noteweave_core::{defaults, logging, Error, EventBus, NoteEvent, Result};

use crate::registry::NoteRegistry;
use crate::saver::{NoteSaver, SaveOutcome};

type Watched = Arc<Mutex<HashSet<Uuid>>>;

fn lock(watched: &Watched) -> MutexGuard<'_, HashSet<Uuid>> {
    watched.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Control handle of a running autosave loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct AutoSaveHandle {
    shutdown_tx: mpsc::Sender<()>,
    watched: Watched,
}

impl AutoSaveHandle {
    /// Start saving `note_id` after edits.
    pub fn watch(&self, note_id: Uuid) -> bool {
        lock(&self.watched).insert(note_id)
    }

    /// Stop saving `note_id`. Pending debounced saves are dropped.
    pub fn unwatch(&self, note_id: Uuid) -> bool {
        lock(&self.watched).remove(&note_id)
    }

    /// Move a watch to a note's new id.
    pub fn rewatch(&self, previous_id: Uuid, note_id: Uuid) {
        let mut watched = lock(&self.watched);
        if watched.remove(&previous_id) {
            watched.insert(note_id);
        }
    }

    pub fn is_watching(&self, note_id: Uuid) -> bool {
        lock(&self.watched).contains(&note_id)
    }

    /// Signal the loop to stop.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send autosave shutdown signal".into()))
    }
}

/// Debounced autosave loop.
pub struct AutoSave {
    saver: NoteSaver,
    registry: NoteRegistry,
    events: EventBus,
    debounce: Duration,
    watched: Watched,
}

impl AutoSave {
    pub fn new(saver: NoteSaver, registry: NoteRegistry, events: EventBus, debounce: Duration) -> Self {
        Self {
            saver,
            registry,
            events,
            debounce,
            watched: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Spawn the loop on the current runtime.
    pub fn start(self) -> AutoSaveHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = AutoSaveHandle {
            shutdown_tx,
            watched: self.watched.clone(),
        };
        // Subscribe before spawning so no edit made right after start is missed.
        let rx = self.events.subscribe();
        tokio::spawn(async move {
            self.run(rx, shutdown_rx).await;
        });
        handle
    }

    #[instrument(
        skip_all,
        fields(subsystem = logging::SUBSYSTEM_SYNC, component = logging::COMPONENT_AUTOSAVE)
    )]
    async fn run(
        self,
        mut rx: tokio::sync::broadcast::Receiver<noteweave_core::EventEnvelope>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!(debounce_ms = self.debounce.as_millis() as u64, "Autosave started");
        let mut deadlines: HashMap<Uuid, Instant> = HashMap::new();
        let mut failures: HashMap<Uuid, u32> = HashMap::new();

        loop {
            let next = deadlines.values().min().copied();
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                received = rx.recv() => match received {
                    Ok(envelope) => {
                        if let NoteEvent::Changed { note_id, .. } = envelope.payload {
                            if lock(&self.watched).contains(&note_id) {
                                deadlines.insert(note_id, Instant::now() + self.debounce);
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Autosave lagged, scheduling every watched note");
                        let due = Instant::now() + self.debounce;
                        for id in lock(&self.watched).iter() {
                            deadlines.insert(*id, due);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                    let now = Instant::now();
                    let due: Vec<Uuid> = deadlines
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(id, _)| *id)
                        .collect();
                    for id in due {
                        deadlines.remove(&id);
                        if !self.save_now(id).await {
                            failures.remove(&id);
                            continue;
                        }
                        let failed = failures.entry(id).or_insert(0);
                        *failed += 1;
                        let delay = self.retry_delay(*failed);
                        debug!(
                            note_id = %id,
                            attempt = *failed,
                            backoff_ms = delay.as_millis() as u64,
                            "Autosave rescheduled"
                        );
                        deadlines.insert(id, Instant::now() + delay);
                    }
                }
            }
        }
        info!("Autosave stopped");
    }

    /// Debounce window doubled per failure, capped.
    fn retry_delay(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.saturating_sub(1).min(16);
        self.debounce
            .saturating_mul(factor)
            .min(Duration::from_millis(defaults::AUTOSAVE_MAX_BACKOFF_MS))
    }

    /// Save a watched note. Returns whether it should be tried again.
    async fn save_now(&self, note_id: Uuid) -> bool {
        if !lock(&self.watched).contains(&note_id) {
            return false;
        }
        let Some(handle) = self.registry.get(note_id) else {
            debug!(note_id = %note_id, "Autosave skipped, note no longer loaded");
            return false;
        };
        match self.saver.save(&handle).await {
            Ok(SaveOutcome::Saved { version }) => {
                debug!(note_id = %note_id, version, "Autosaved");
                false
            }
            Ok(SaveOutcome::AdoptedExisting { rejected_id, id, .. }) => {
                let mut watched = lock(&self.watched);
                watched.remove(&rejected_id);
                watched.insert(id);
                false
            }
            Err(Error::SaveAlreadyRunning(_)) => {
                debug!(note_id = %note_id, "Autosave deferred to the running save");
                false
            }
            Err(e) => {
                warn!(note_id = %note_id, error = %e, "Autosave failed");
                e.is_retryable() && handle.is_dirty()
            }
        }
    }
}
