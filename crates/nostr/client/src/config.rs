//! Pool configuration

use crate::error::{ClientError, Result};
use nostr_store::DatabaseConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A relay seeded into an empty relay table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultRelay {
    pub uri: String,
    #[serde(default)]
    pub priority: i64,
}

impl DefaultRelay {
    pub fn new(uri: impl Into<String>, priority: i64) -> Self {
        Self {
            uri: uri.into(),
            priority,
        }
    }
}

/// Pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Floor for the number of concurrently live relay connections
    pub min_relays: usize,
    /// Exact number of live connections, overriding the processor count
    pub max_connections: Option<usize>,
    /// Wait before a disconnected relay is queued again
    pub requeue_delay_secs: u64,
    /// How long a relay gets no new subscriptions after a rate-limit notice
    pub rate_limit_cooldown_secs: u64,
    pub connect_timeout_secs: u64,
    /// Period of the unprocessed-event retry and detail refresh pass
    pub processing_interval_secs: u64,
    /// Profiles and channels older than this are requested again
    pub detail_refresh_minutes: u64,
    /// SQLite file; defaults under the user data directory
    pub database_path: Option<PathBuf>,
    pub max_reader_connections: u32,
    /// Buffer of the notification broadcast channel
    pub notification_capacity: usize,
    /// Relays inserted when the relay table is empty
    pub default_relays: Vec<DefaultRelay>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_relays: 4,
            max_connections: None,
            requeue_delay_secs: 10,
            rate_limit_cooldown_secs: 60,
            connect_timeout_secs: 10,
            processing_interval_secs: 15,
            detail_refresh_minutes: 60,
            database_path: None,
            max_reader_connections: 8,
            notification_capacity: 1024,
            default_relays: vec![
                DefaultRelay::new("wss://relay.damus.io", 10),
                DefaultRelay::new("wss://nos.lol", 10),
                DefaultRelay::new("wss://relay.nostr.band", 5),
                DefaultRelay::new("wss://nostr.wine", 0),
            ],
        }
    }
}

impl PoolConfig {
    /// Load config from the default location, or defaults if there is none.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save config to the default location.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ClientError::Config("Could not determine config directory".to_string()))?;
        Ok(config_dir.join("nostr-pool").join("config.toml"))
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.database_path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| ClientError::Config("Could not determine data directory".to_string()))?;
        Ok(data_dir.join("nostr-pool").join("events.db"))
    }

    pub fn database_config(&self) -> Result<DatabaseConfig> {
        Ok(DatabaseConfig {
            path: self.database_path()?,
            max_reader_connections: self.max_reader_connections,
        })
    }

    /// Number of connection workers: the explicit override, else
    /// `max(min_relays, available parallelism)`.
    pub fn worker_count(&self) -> usize {
        if let Some(n) = self.max_connections {
            return n.max(1);
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.min_relays.max(cpus).max(1)
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_secs(self.requeue_delay_secs)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn processing_interval(&self) -> Duration {
        Duration::from_secs(self.processing_interval_secs.max(1))
    }

    pub fn detail_refresh(&self) -> Duration {
        Duration::from_secs(self.detail_refresh_minutes * 60)
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn with_max_connections(mut self, n: usize) -> Self {
        self.max_connections = Some(n);
        self
    }

    pub fn with_default_relays(mut self, relays: Vec<DefaultRelay>) -> Self {
        self.default_relays = relays;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.requeue_delay(), Duration::from_secs(10));
        assert_eq!(config.rate_limit_cooldown(), Duration::from_secs(60));
        assert!(config.worker_count() >= 4);
        for relay in &config.default_relays {
            assert!(relay.uri.starts_with("wss://"));
        }
    }

    #[test]
    fn test_max_connections_overrides_worker_count() {
        assert_eq!(PoolConfig::default().with_max_connections(2).worker_count(), 2);
        assert_eq!(PoolConfig::default().with_max_connections(0).worker_count(), 1);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "requeue_delay_secs = 3\n").unwrap();

        let config = PoolConfig::load_from(&path).unwrap();
        assert_eq!(config.requeue_delay_secs, 3);
        assert_eq!(config.min_relays, 4);
        assert_eq!(config.default_relays, PoolConfig::default().default_relays);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = PoolConfig::default()
            .with_database_path(dir.path().join("events.db"))
            .with_max_connections(3)
            .with_default_relays(vec![DefaultRelay::new("ws://127.0.0.1:7777", 1)]);

        config.save_to(&path).unwrap();
        assert_eq!(PoolConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default_and_bad_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            PoolConfig::load_from(&dir.path().join("none.toml")).unwrap(),
            PoolConfig::default()
        );

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "min_relays = \"four\"").unwrap();
        assert!(matches!(PoolConfig::load_from(&bad), Err(ClientError::Config(_))));
    }
}
