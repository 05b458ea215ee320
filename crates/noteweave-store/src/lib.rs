//! # noteweave-store
//!
//! Reference backends for the noteweave collaborator traits.
//!
//! This crate provides:
//! - [`MemoryDocumentStore`]: versioned document storage with optimistic
//!   concurrency, duplicate-title detection, soft deletion and a change feed
//! - [`MemoryLinkIndex`]: element-level full-text and backlink index
//! - [`test_fixtures`]: note builders and a failure-injecting store wrapper
//!
//! ## Example
//!
//! ```rust
//! use noteweave_store::{DocumentStore, MemoryDocumentStore, Note, NoteDocument};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> noteweave_store::Result<()> {
//! let store = MemoryDocumentStore::new();
//! let note = Note::new("Inbox");
//! let doc = NoteDocument::from_note(&note, 1, uuid::Uuid::nil(), "local")?;
//! assert_eq!(store.save(doc, 0).await?, 1);
//! # Ok(())
//! # }
//! ```

pub mod link_index;
pub mod memory_store;

// Always compiled so integration tests in dependent crates can use it.
pub mod test_fixtures;

// Re-export core types
pub use noteweave_core::*;

pub use link_index::MemoryLinkIndex;
pub use memory_store::MemoryDocumentStore;
pub use test_fixtures::{FlakyDocumentStore, ScriptedFailure};
