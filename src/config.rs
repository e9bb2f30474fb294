//! Store configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// How the read path reacts to malformed stored data.
///
/// Write-path validation is never relaxed; strictness only governs what
/// happens when already-stored strings fail to deserialize, reference
/// unknown fields, or name unregistered models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Fail the whole operation on the first read-path violation.
    Strict,
    /// Log a diagnostic and degrade: raw strings stand in for unparseable
    /// values, unknown filter clauses are skipped.
    Permissive,
}

impl Strictness {
    pub fn is_strict(self) -> bool {
        matches!(self, Strictness::Strict)
    }
}

/// Tunable behavior of a [`ModelStore`](crate::store::ModelStore).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Namespace prepended to every key. Must not contain `:`, `*` or `?`.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Read-path policy for malformed stored data.
    #[serde(default = "default_strictness")]
    pub strictness: Strictness,

    /// Fill fields missing from stored records with their cleaned defaults
    /// on every read.
    #[serde(default)]
    pub save_consistency: bool,

    /// Skip the read-back after writes; mutations return `{id}` stubs.
    #[serde(default)]
    pub economy: bool,

    /// Promise that no other process writes this prefix, allowing the id
    /// allocator to trust its in-memory high-water marks instead of
    /// rescanning the keyspace on every reservation.
    #[serde(default)]
    pub single_process: bool,

    /// How long a writer waits for the advisory busy flag before giving up.
    #[serde(default = "default_reserve_timeout_ms")]
    pub reserve_timeout_ms: u64,

    /// Pause between busy-flag polls.
    #[serde(default = "default_reserve_poll_ms")]
    pub reserve_poll_ms: u64,
}

fn default_prefix() -> String {
    "kvmodel".to_string()
}

fn default_strictness() -> Strictness {
    Strictness::Permissive
}

fn default_reserve_timeout_ms() -> u64 {
    5000
}

fn default_reserve_poll_ms() -> u64 {
    2
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            strictness: default_strictness(),
            save_consistency: false,
            economy: false,
            single_process: false,
            reserve_timeout_ms: default_reserve_timeout_ms(),
            reserve_poll_ms: default_reserve_poll_ms(),
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    #[must_use]
    pub fn with_save_consistency(mut self, enabled: bool) -> Self {
        self.save_consistency = enabled;
        self
    }

    #[must_use]
    pub fn with_economy(mut self, enabled: bool) -> Self {
        self.economy = enabled;
        self
    }

    #[must_use]
    pub fn with_single_process(mut self, enabled: bool) -> Self {
        self.single_process = enabled;
        self
    }

    #[must_use]
    pub fn with_reserve_timeout_ms(mut self, millis: u64) -> Self {
        self.reserve_timeout_ms = millis;
        self
    }

    #[must_use]
    pub fn with_reserve_poll_ms(mut self, millis: u64) -> Self {
        self.reserve_poll_ms = millis;
        self
    }
}

/// Errors raised while loading a [`StoreConfig`] from disk.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}
