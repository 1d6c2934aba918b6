//! Store configuration.
//!
//! Loaded from TOML by the host application, e.g.
//!
//! ```toml
//! location = { file = "/data/mentra/mentra.db" }
//! max_read_connections = 4
//! busy_retries = 3
//! reset_on_schema_mismatch = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreLocation {
    /// A database file on durable storage
    File(PathBuf),
    /// A private in-memory database (tests, scratch stores)
    Memory,
}

/// Tunables for opening a [`MentraDb`](crate::MentraDb).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub location: StoreLocation,

    /// Pooled connections available to concurrent readers. In-memory
    /// stores always use a single connection.
    pub max_read_connections: u32,

    /// SQLite-level wait on a locked database before reporting busy
    pub busy_timeout_ms: u64,

    /// Internal retries for busy/locked results on idempotent operations
    pub busy_retries: u32,

    /// Base backoff between busy retries, doubled per attempt
    pub busy_backoff_ms: u64,

    /// Prepared statements kept per connection and in the write cache
    pub statement_cache_capacity: usize,

    /// Results buffered per live query before the evaluator waits
    pub subscription_buffer: usize,

    /// Drop and recreate every table when the persisted fingerprint differs
    pub reset_on_schema_mismatch: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: StoreLocation::Memory,
            max_read_connections: 4,
            busy_timeout_ms: 5_000,
            busy_retries: 3,
            busy_backoff_ms: 25,
            statement_cache_capacity: 64,
            subscription_buffer: 16,
            reset_on_schema_mismatch: false,
        }
    }
}

impl StoreConfig {
    /// Config for a database file at `path` with default tunables.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::File(path.into()),
            ..Self::default()
        }
    }

    /// Config for an in-memory database with default tunables.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file.
    pub async fn load_from_file(path: &Path) -> DbResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DbError::config(path.display().to_string(), e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> DbResult<Self> {
        let config: StoreConfig =
            toml::from_str(content).map_err(|e| DbError::config("content", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the store cannot run with.
    pub fn validate(&self) -> DbResult<()> {
        if self.max_read_connections == 0 {
            return Err(DbError::config(
                "max_read_connections",
                "at least one connection is required",
            ));
        }
        if self.subscription_buffer == 0 {
            return Err(DbError::config(
                "subscription_buffer",
                "live queries need room for at least one result",
            ));
        }
        if self.statement_cache_capacity == 0 {
            return Err(DbError::config(
                "statement_cache_capacity",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn busy_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(8);
        Duration::from_millis(self.busy_backoff_ms.saturating_mul(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml_over_defaults() {
        let config = StoreConfig::from_toml(
            r#"
            location = { file = "/tmp/mentra.db" }
            busy_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(
            config.location,
            StoreLocation::File(PathBuf::from("/tmp/mentra.db"))
        );
        assert_eq!(config.busy_retries, 5);
        assert_eq!(config.max_read_connections, 4);
        assert!(!config.reset_on_schema_mismatch);
    }

    #[test]
    fn memory_location_parses() {
        let config = StoreConfig::from_toml(r#"location = "memory""#).unwrap();
        assert_eq!(config.location, StoreLocation::Memory);
    }

    #[test]
    fn rejects_zero_buffer() {
        let err = StoreConfig::from_toml("subscription_buffer = 0").unwrap_err();
        assert!(matches!(err, DbError::Config { ref field, .. } if field == "subscription_buffer"));
    }

    #[test]
    fn backoff_doubles() {
        let config = StoreConfig::default();
        assert_eq!(config.busy_backoff(1), Duration::from_millis(25));
        assert_eq!(config.busy_backoff(3), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        tokio::fs::write(&path, "statement_cache_capacity = 8\n")
            .await
            .unwrap();
        let config = StoreConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.statement_cache_capacity, 8);
    }
}
