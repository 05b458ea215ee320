//! Note events and the event bus that fans them out.
//!
//! Element mutations, save completions and remote updates are published as
//! [`NoteEvent`]s wrapped in an [`EventEnvelope`]. Consumers (autosave,
//! index maintenance, UI bridges) subscribe independently; a slow consumer
//! only lags itself.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::element::ChangeKind;

// ============================================================================
// Events
// ============================================================================

/// Domain events about notes.
///
/// Serialized with a `type` tag, e.g.
/// `{"type":"Saved","note_id":"...","version":3}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum NoteEvent {
    /// A note was created locally.
    Created { note_id: Uuid, title: String },
    /// An element of a note changed through a published edit.
    Changed {
        note_id: Uuid,
        element_id: Uuid,
        kind: ChangeKind,
    },
    /// A save was confirmed by the store.
    Saved { note_id: Uuid, version: i64 },
    /// A save gave up.
    SaveFailed { note_id: Uuid, error: String },
    /// A remote document was merged into the in-memory note.
    RemoteApplied { note_id: Uuid, version: i64 },
    /// A note changed title.
    Renamed {
        note_id: Uuid,
        old_title: String,
        new_title: String,
    },
    /// A note was deleted and purged from memory.
    Deleted { note_id: Uuid },
    /// A note was dropped from the in-memory registry.
    Unloaded { note_id: Uuid },
}

impl NoteEvent {
    /// Dot-namespaced event name.
    pub fn event_type(&self) -> &'static str {
        match self {
            NoteEvent::Created { .. } => "note.created",
            NoteEvent::Changed { .. } => "note.changed",
            NoteEvent::Saved { .. } => "note.saved",
            NoteEvent::SaveFailed { .. } => "note.save_failed",
            NoteEvent::RemoteApplied { .. } => "note.remote_applied",
            NoteEvent::Renamed { .. } => "note.renamed",
            NoteEvent::Deleted { .. } => "note.deleted",
            NoteEvent::Unloaded { .. } => "note.unloaded",
        }
    }

    /// The note this event is about.
    pub fn note_id(&self) -> Uuid {
        match self {
            NoteEvent::Created { note_id, .. }
            | NoteEvent::Changed { note_id, .. }
            | NoteEvent::Saved { note_id, .. }
            | NoteEvent::SaveFailed { note_id, .. }
            | NoteEvent::RemoteApplied { note_id, .. }
            | NoteEvent::Renamed { note_id, .. }
            | NoteEvent::Deleted { note_id }
            | NoteEvent::Unloaded { note_id } => *note_id,
        }
    }
}

/// Envelope carrying an event with its identity and timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// UUIDv7, so envelopes sort by emission time.
    pub event_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: NoteEvent,
}

impl EventEnvelope {
    pub fn new(event: NoteEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.event_type().to_string(),
            occurred_at: Utc::now(),
            payload: event,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast bus for note events. Clones share the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    ///
    /// Recommended: 256 for production, 32 for tests.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event to all subscribers. Without subscribers the event is
    /// dropped.
    pub fn emit(&self, event: NoteEvent) {
        let envelope = EventEnvelope::new(event);
        let subscriber_count = self.tx.receiver_count();
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            note_id = %envelope.payload.note_id(),
            subscriber_count,
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to envelopes emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

// ============================================================================
// Tests
// ============================================================================
