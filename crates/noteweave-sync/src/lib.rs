//! # noteweave-sync
//!
//! Versioned sync engine for noteweave notes.
//!
//! This crate provides:
//! - [`NoteHandle`]: a live note with its save counters and remote merge
//! - [`NoteSaver`]: the optimistic-concurrency save protocol
//! - [`NoteRegistry`]: weak identity map of loaded notes
//! - [`AutoSave`]: debounced saving driven by change events
//! - [`Workspace`]: the context object tying store, index and the above
//!   together, with rename propagation and deletion purging
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use noteweave_sync::{SyncConfig, Workspace};
//! use noteweave_store::{MemoryDocumentStore, MemoryLinkIndex};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> noteweave_sync::Result<()> {
//! let workspace = Workspace::new(
//!     Arc::new(MemoryDocumentStore::new()),
//!     Arc::new(MemoryLinkIndex::new()),
//!     SyncConfig::default(),
//! )?;
//! let note = workspace.create("Reading list").await?;
//! assert_eq!(note.saved_version(), 1);
//! # Ok(())
//! # }
//! ```

pub mod autosave;
pub mod handle;
pub mod registry;
pub mod saver;
pub mod workspace;

// Re-export core types
pub use noteweave_core::*;

pub use autosave::{AutoSave, AutoSaveHandle};
pub use handle::{NoteHandle, RemoteUpdate, SaveState, SaveTicket};
pub use registry::NoteRegistry;
pub use saver::{NoteSaver, SaveOutcome};
pub use workspace::{RemoteChange, Workspace};
