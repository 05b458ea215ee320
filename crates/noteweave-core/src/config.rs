//! Sync engine configuration.
//!
//! Configuration can be loaded from environment variables (`NOTEWEAVE_*`),
//! from a JSON document, or assembled with the `with_*` builder methods.
//!
//! ```rust
//! use noteweave_core::config::SyncConfig;
//!
//! let config = SyncConfig::default()
//!     .with_max_save_retries(5)
//!     .with_autosave_debounce_ms(500);
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

/// Tunables for the save protocol, autosave and event fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last edit before autosave runs.
    pub autosave_debounce_ms: u64,
    /// Retries after the first attempt for conflicts and storage failures.
    pub max_save_retries: u32,
    /// Base backoff between storage retries.
    pub retry_backoff_ms: u64,
    /// Broadcast buffer of the note event bus.
    pub event_bus_capacity: usize,
    /// Encoded bodies shorter than this are refused as empty.
    pub min_document_bytes: usize,
    /// Database id stamped on every document this process writes.
    pub database_id: Option<Uuid>,
    /// Source identifier stamped on outgoing documents. Remote notifications
    /// carrying the same source are ignored.
    pub source: String,
    /// Link literal mentions of other notes' titles before every save.
    pub fold_links_on_save: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            autosave_debounce_ms: defaults::AUTOSAVE_DEBOUNCE_MS,
            max_save_retries: defaults::MAX_SAVE_RETRIES,
            retry_backoff_ms: defaults::RETRY_BACKOFF_MS,
            event_bus_capacity: defaults::EVENT_BUS_CAPACITY,
            min_document_bytes: defaults::MIN_DOCUMENT_BYTES,
            database_id: None,
            source: defaults::LOCAL_SOURCE.to_string(),
            fold_links_on_save: defaults::FOLD_LINKS_ON_SAVE,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything missing or unparseable.
    pub fn from_env() -> Self {
        let autosave_debounce_ms = std::env::var(defaults::ENV_AUTOSAVE_DEBOUNCE_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::AUTOSAVE_DEBOUNCE_MS);

        let max_save_retries = std::env::var(defaults::ENV_MAX_SAVE_RETRIES)
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults::MAX_SAVE_RETRIES);

        let retry_backoff_ms = std::env::var(defaults::ENV_RETRY_BACKOFF_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::RETRY_BACKOFF_MS);

        let event_bus_capacity = std::env::var(defaults::ENV_EVENT_BUS_CAPACITY)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::EVENT_BUS_CAPACITY)
            .max(1);

        let database_id = std::env::var(defaults::ENV_DATABASE_ID)
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok());

        let config = Self {
            autosave_debounce_ms,
            max_save_retries,
            retry_backoff_ms,
            event_bus_capacity,
            database_id,
            ..Self::default()
        };
        debug!(?config, "Loaded sync config from environment");
        config
    }

    /// Parse configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.event_bus_capacity == 0 {
            return Err(Error::Config(
                "event_bus_capacity must be greater than zero".to_string(),
            ));
        }
        if self.min_document_bytes == 0 {
            return Err(Error::Config(
                "min_document_bytes must be greater than zero".to_string(),
            ));
        }
        if self.source.trim().is_empty() {
            return Err(Error::Config("source cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Debounce window as a [`Duration`].
    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    /// Backoff before the given retry attempt (1-based).
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(attempt.max(1) as u64))
    }

    /// Set the autosave debounce window.
    pub fn with_autosave_debounce_ms(mut self, ms: u64) -> Self {
        self.autosave_debounce_ms = ms;
        self
    }

    /// Set the retry limit.
    pub fn with_max_save_retries(mut self, retries: u32) -> Self {
        self.max_save_retries = retries;
        self
    }

    /// Set the base retry backoff.
    pub fn with_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    /// Set the event bus capacity.
    pub fn with_event_bus_capacity(mut self, capacity: usize) -> Self {
        self.event_bus_capacity = capacity;
        self
    }

    /// Set the smallest encoded body accepted for saving.
    pub fn with_min_document_bytes(mut self, bytes: usize) -> Self {
        self.min_document_bytes = bytes;
        self
    }

    /// Set the database id stamped on documents.
    pub fn with_database_id(mut self, id: Uuid) -> Self {
        self.database_id = Some(id);
        self
    }

    /// Set the source identifier stamped on documents.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Turn link folding before saves on or off.
    pub fn with_link_folding(mut self, enabled: bool) -> Self {
        self.fold_links_on_save = enabled;
        self
    }
}
