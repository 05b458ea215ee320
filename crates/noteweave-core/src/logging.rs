//! Values for the structured identity fields of noteweave's log events.
//!
//! Every event carries `subsystem` and `component` fields; the values come
//! from the constants below so log queries can rely on them. Field keys are
//! written literally at the call site because `tracing` requires it. Library
//! crates never install a subscriber; that is the embedding application's
//! job.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded state, local data at risk |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (note created, renamed, deleted, saved) |
//! | DEBUG | Decision points (stale update skipped, retry scheduled) |
//! | TRACE | Per-element iteration |

// ─── Subsystems (`subsystem` field) ────────────────────────────────────────

/// Document store and link index collaborators.
pub const SUBSYSTEM_STORE: &str = "store";

/// Save protocol, autosave and remote updates.
pub const SUBSYSTEM_SYNC: &str = "sync";

// ─── Components (`component` field) ────────────────────────────────────────

pub const COMPONENT_MEMORY_STORE: &str = "memory_store";

pub const COMPONENT_LINK_INDEX: &str = "link_index";

pub const COMPONENT_HANDLE: &str = "handle";

pub const COMPONENT_SAVER: &str = "saver";

pub const COMPONENT_AUTOSAVE: &str = "autosave";

pub const COMPONENT_REGISTRY: &str = "registry";

pub const COMPONENT_WORKSPACE: &str = "workspace";
