//! JSON configuration.
//!
//! ```
//! use transmission_store::config::Config;
//!
//! let config = Config::from_json_str(r#"{ "text_sms_max_chars": 70 }"#).unwrap();
//! assert_eq!(config.text_body_capacity_chars(), 47);
//! assert_eq!(config.binary_sms_max_bytes, 133);
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    core::store::{StoreResult, TransmissionStore},
    persist::{memory::MemoryRecordStore, sqlite::SqliteRecordStore},
    runtime::handle::RuntimeConfig,
    transmission::wire::{
        BINARY_HEADER_BITS, BINARY_SMS_MAX_BYTES, TEXT_HEADER_CHARS, TEXT_SMS_MAX_CHARS,
    },
};

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The document is not valid JSON for [`Config`].
    #[error("parsing config: {0}")]
    Json(#[from] serde_json::Error),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Transport unit sizes, storage location and runtime sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. `None` keeps records in memory.
    pub database_path: Option<PathBuf>,
    /// Maximum size of one binary SMS, header included.
    pub binary_sms_max_bytes: usize,
    /// Maximum length of one text SMS, header included.
    pub text_sms_max_chars: usize,
    /// Runtime service sizing.
    pub runtime: RuntimeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            binary_sms_max_bytes: BINARY_SMS_MAX_BYTES,
            text_sms_max_chars: TEXT_SMS_MAX_CHARS,
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Config {
    /// Parses and validates a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Checks that every unit leaves room for a body and that queues are
    /// non-empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.binary_sms_max_bytes * 8 <= BINARY_HEADER_BITS {
            return Err(ConfigError::Invalid(format!(
                "binary_sms_max_bytes {} leaves no room for a body",
                self.binary_sms_max_bytes
            )));
        }
        if self.text_sms_max_chars <= TEXT_HEADER_CHARS {
            return Err(ConfigError::Invalid(format!(
                "text_sms_max_chars {} leaves no room for a body",
                self.text_sms_max_chars
            )));
        }
        if self.runtime.command_queue_bound == 0 || self.runtime.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "runtime queue sizes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Body bits available in one binary SMS.
    pub fn binary_body_capacity_bits(&self) -> usize {
        (self.binary_sms_max_bytes * 8).saturating_sub(BINARY_HEADER_BITS)
    }

    /// Body characters available in one text SMS.
    pub fn text_body_capacity_chars(&self) -> usize {
        self.text_sms_max_chars.saturating_sub(TEXT_HEADER_CHARS)
    }

    /// Opens the configured SQLite database.
    pub fn open_sqlite_store(&self) -> StoreResult<Option<TransmissionStore<SqliteRecordStore>>> {
        let Some(path) = &self.database_path else {
            return Ok(None);
        };
        let records = SqliteRecordStore::open(path)?;
        TransmissionStore::with_default_model(records).map(Some)
    }

    /// Opens an in-memory store.
    pub fn open_memory_store(&self) -> StoreResult<TransmissionStore<MemoryRecordStore>> {
        TransmissionStore::with_default_model(MemoryRecordStore::new())
    }
}
