//! Centralized default constants for noteweave.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration types and runtime services reference these constants
//! instead of defining their own magic numbers.

// =============================================================================
// SAVE PROTOCOL
// =============================================================================

/// Debounce window between the last edit and the autosave it triggers.
pub const AUTOSAVE_DEBOUNCE_MS: u64 = 2_000;

/// Longest wait before autosave tries a failed note again. Failed notes
/// are retried after the debounce window, doubling up to this cap.
pub const AUTOSAVE_MAX_BACKOFF_MS: u64 = 60_000;

/// Maximum attempts after the first one for a save that hits a version
/// conflict or a storage failure.
pub const MAX_SAVE_RETRIES: u32 = 3;

/// Base backoff between storage retries. Multiplied by the attempt number.
pub const RETRY_BACKOFF_MS: u64 = 50;

/// An encoded note body shorter than this many bytes counts as empty.
/// `{}` is the shortest valid JSON object, so anything below it is unusable.
pub const MIN_DOCUMENT_BYTES: usize = 2;

/// Whether saves link literal mentions of other notes' titles first.
pub const FOLD_LINKS_ON_SAVE: bool = true;

/// Version of a note that has never been saved.
pub const INITIAL_VERSION: i64 = 0;

// =============================================================================
// EVENTS
// =============================================================================

/// Broadcast buffer for the note event bus.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Smaller buffer recommended for tests.
pub const EVENT_BUS_CAPACITY_TEST: usize = 32;

// =============================================================================
// NOTE MODEL
// =============================================================================

/// Score bump applied for each user activity on a note.
pub const USER_ACTIVITY_SCORE_BUMP: f32 = 0.1;

/// Highest heading level supported by the element model.
pub const MAX_HEADING_LEVEL: u8 = 6;

/// Source identifier stamped on documents written by this process when none
/// is configured.
pub const LOCAL_SOURCE: &str = "local";

// =============================================================================
// ENVIRONMENT
// =============================================================================

/// Environment variable overriding [`AUTOSAVE_DEBOUNCE_MS`].
pub const ENV_AUTOSAVE_DEBOUNCE_MS: &str = "NOTEWEAVE_AUTOSAVE_DEBOUNCE_MS";

/// Environment variable overriding [`MAX_SAVE_RETRIES`].
pub const ENV_MAX_SAVE_RETRIES: &str = "NOTEWEAVE_MAX_SAVE_RETRIES";

/// Environment variable overriding [`RETRY_BACKOFF_MS`].
pub const ENV_RETRY_BACKOFF_MS: &str = "NOTEWEAVE_RETRY_BACKOFF_MS";

/// Environment variable overriding [`EVENT_BUS_CAPACITY`].
pub const ENV_EVENT_BUS_CAPACITY: &str = "NOTEWEAVE_EVENT_BUS_CAPACITY";

/// Environment variable holding the database id stamped on documents.
pub const ENV_DATABASE_ID: &str = "NOTEWEAVE_DATABASE_ID";
