//! Error types for noteweave.

use thiserror::Error;
use uuid::Uuid;

use crate::document::NoteDocument;

/// Result type alias using noteweave's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for noteweave operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Note not found
    #[error("Note not found: {0}")]
    NoteNotFound(Uuid),

    /// A save for this note is still in flight
    #[error("Save already running for note {0}")]
    SaveAlreadyRunning(Uuid),

    /// The note encoded to an empty body and was not submitted
    #[error("Refusing to persist an empty document for note {0}")]
    EmptyDocument(Uuid),

    /// The store holds a different version than the one the save expected
    #[error("Version conflict on {id}: expected {expected}, stored {stored}")]
    VersionConflict { id: Uuid, expected: i64, stored: i64 },

    /// Another document already owns this title
    #[error("Duplicate title: {title}")]
    DuplicateTitle {
        title: String,
        existing: Box<NoteDocument>,
    },

    /// Storage collaborator failed or is unreachable
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::VersionConflict { .. } | Error::Storage(_) | Error::SaveAlreadyRunning(_)
        )
    }

    /// Whether this is one of the optimistic-concurrency conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::VersionConflict { .. } | Error::DuplicateTitle { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_note_not_found() {
        let id = Uuid::nil();
        let err = Error::NoteNotFound(id);
        assert_eq!(err.to_string(), format!("Note not found: {}", id));
    }

    #[test]
    fn test_error_display_version_conflict() {
        let id = Uuid::nil();
        let err = Error::VersionConflict {
            id,
            expected: 3,
            stored: 5,
        };
        assert_eq!(
            err.to_string(),
            format!("Version conflict on {}: expected 3, stored 5", id)
        );
    }

    #[test]
    fn test_error_display_save_already_running() {
        let id = Uuid::new_v4();
        let err = Error::SaveAlreadyRunning(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_retryable_classification() {
        let id = Uuid::nil();
        assert!(Error::Storage("offline".into()).is_retryable());
        assert!(Error::VersionConflict {
            id,
            expected: 1,
            stored: 2
        }
        .is_retryable());
        assert!(!Error::EmptyDocument(id).is_retryable());
        assert!(!Error::Decode("bad".into()).is_retryable());
    }

    #[test]
    fn test_conflict_classification() {
        let existing = NoteDocument::for_tests("Existing");
        let err = Error::DuplicateTitle {
            title: "Existing".into(),
            existing: Box::new(existing),
        };
        assert!(err.is_conflict());
        assert!(!err.is_retryable());
        assert!(!Error::Storage("x".into()).is_conflict());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
