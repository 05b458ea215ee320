//! # noteweave-core
//!
//! Document model for noteweave: attributed text, element trees, notes and
//! their persisted document form, the identity-based merge planner, and the
//! collaborator traits the sync engine is written against.
//!
//! This crate does no I/O. Storage and indexing live behind
//! [`DocumentStore`] and [`LinkIndex`].

pub mod config;
pub mod defaults;
pub mod document;
pub mod element;
pub mod error;
pub mod events;
pub mod logging;
pub mod merge;
pub mod note;
pub mod references;
pub mod text;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::SyncConfig;
pub use document::{checksum, journal_date_key, DocumentType, NoteDocument};
pub use element::{
    ChangeKind, ChildrenFormat, Element, ElementChange, ElementFields, ElementKind, MediaDisplay,
};
pub use error::{Error, Result};
pub use events::{EventBus, EventEnvelope, NoteEvent};
pub use merge::{ChildSlot, MergeOp, MergePlan};
pub use note::{journal_title, valid_title, Note, NoteReference, NoteType, UserActivity};
pub use references::{title_key, UnlinkedMention, UnlinkedReferences};
pub use text::{Attribute, RichText, TextRange};
pub use traits::*;
