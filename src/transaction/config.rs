//! Transaction manager configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Transaction manager configuration options.
///
/// Every field may be omitted in JSON; missing fields take their default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionManagerConfig {
    /// Reject joins whose isolation or read-only setting conflicts with the
    /// existing transaction instead of silently inheriting the outer settings.
    pub validate_existing_transactions: bool,
    /// Allow NESTED scopes and programmatic savepoints.
    pub nested_transaction_allowed: bool,
    /// A participating scope that rolls back dooms the whole physical transaction.
    pub global_rollback_on_participation_failure: bool,
    /// Roll the physical transaction back when its commit fails.
    pub rollback_on_commit_failure: bool,
    /// Timeout forwarded to the driver when a definition sets none.
    pub default_timeout_secs: Option<u64>,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self {
            validate_existing_transactions: false,
            nested_transaction_allowed: true,
            global_rollback_on_participation_failure: true,
            rollback_on_commit_failure: false,
            default_timeout_secs: None,
        }
    }
}

impl TransactionManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Set validate_existing_transactions flag.
    pub fn validate_existing_transactions(mut self, value: bool) -> Self {
        self.validate_existing_transactions = value;
        self
    }

    /// Set nested_transaction_allowed flag.
    pub fn nested_transaction_allowed(mut self, value: bool) -> Self {
        self.nested_transaction_allowed = value;
        self
    }

    /// Set global_rollback_on_participation_failure flag.
    pub fn global_rollback_on_participation_failure(mut self, value: bool) -> Self {
        self.global_rollback_on_participation_failure = value;
        self
    }

    /// Set rollback_on_commit_failure flag.
    pub fn rollback_on_commit_failure(mut self, value: bool) -> Self {
        self.rollback_on_commit_failure = value;
        self
    }

    pub fn default_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    /// Timeout forwarded when a definition does not set its own.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }
}
