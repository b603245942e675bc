//! Configuration management for the catalog client.

use catalog_engine::Backoff;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Path value that selects the in-memory record store.
pub const IN_MEMORY: &str = ":memory:";

/// Sync reconciler tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Pause between scheduled pull cycles
    pub interval: Duration,
    /// Pause between full resyncs, which also drop products deleted remotely
    pub resync_interval: Duration,
    /// Remote changes fetched per request
    pub page_size: usize,
    /// Retry delays for failed pushes and pulls
    pub backoff: Backoff,
    /// Consecutive failed cycles before the outage is logged as an error
    pub alert_after: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            resync_interval: Duration::from_secs(3600),
            page_size: 200,
            backoff: Backoff::default(),
            alert_after: 5,
        }
    }
}

/// Change feed tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// Quiet period used to coalesce bursts of writes into one snapshot
    pub debounce: Duration,
    /// Undelivered snapshots buffered per subscription
    pub buffer: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(25),
            buffer: 4,
        }
    }
}

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite file backing the record store, or `:memory:`
    pub db_path: String,
    /// Identity of this device in logs
    pub node_id: String,
    /// Base URL of the remote document, blob and procedure gateway
    pub remote_url: Option<String>,
    /// Bearer token for remote calls
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
    pub sync: SyncSettings,
    pub feed: FeedSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "catalog.db".to_string(),
            node_id: uuid::Uuid::new_v4().to_string(),
            remote_url: None,
            auth_token: None,
            request_timeout: Duration::from_secs(15),
            sync: SyncSettings::default(),
            feed: FeedSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = var("CATALOG_DB_PATH").unwrap_or(defaults.db_path);
        let node_id = var("CATALOG_NODE_ID").unwrap_or(defaults.node_id);
        let remote_url = var("CATALOG_REMOTE_URL");
        let auth_token = var("CATALOG_AUTH_TOKEN");

        let interval = parse(&var, "CATALOG_SYNC_INTERVAL_SECS", 30u64)?;
        let resync_interval = parse(&var, "CATALOG_RESYNC_INTERVAL_SECS", 3600u64)?;
        let page_size: usize = parse(&var, "CATALOG_PULL_PAGE_SIZE", 200usize)?;
        let base_ms = parse(&var, "CATALOG_RETRY_BASE_MS", 1_000u64)?;
        let max_ms = parse(&var, "CATALOG_RETRY_MAX_MS", 300_000u64)?;
        let alert_after = parse(&var, "CATALOG_RETRY_ALERT_AFTER", 5u32)?;
        let debounce_ms = parse(&var, "CATALOG_FEED_DEBOUNCE_MS", 25u64)?;
        let timeout_secs = parse(&var, "CATALOG_REQUEST_TIMEOUT_SECS", 15u64)?;

        if interval == 0 {
            return Err(ConfigError::invalid("CATALOG_SYNC_INTERVAL_SECS", "0"));
        }
        if max_ms < base_ms {
            return Err(ConfigError::invalid("CATALOG_RETRY_MAX_MS", max_ms));
        }

        Ok(Self {
            db_path,
            node_id,
            remote_url,
            auth_token,
            request_timeout: Duration::from_secs(timeout_secs),
            sync: SyncSettings {
                interval: Duration::from_secs(interval),
                resync_interval: Duration::from_secs(resync_interval),
                page_size: page_size.clamp(1, 1000),
                backoff: Backoff::new(base_ms, max_ms),
                alert_after: alert_after.max(1),
            },
            feed: FeedSettings {
                debounce: Duration::from_millis(debounce_ms),
                ..defaults.feed
            },
        })
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path == IN_MEMORY
    }
}

fn parse<T, F>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(key, raw)),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

impl ConfigError {
    fn invalid(key: &str, value: impl ToString) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.db_path, "catalog.db");
        assert!(config.remote_url.is_none());
        assert_eq!(config.sync.interval, Duration::from_secs(30));
        assert_eq!(config.sync.page_size, 200);
        assert_eq!(config.sync.backoff, Backoff::new(1_000, 300_000));
        assert_eq!(config.sync.alert_after, 5);
        assert_eq!(config.feed.debounce, Duration::from_millis(25));
        assert!(!config.node_id.is_empty());
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("CATALOG_DB_PATH", ":memory:"),
            ("CATALOG_NODE_ID", "till-2"),
            ("CATALOG_REMOTE_URL", "https://pos.example.com/api"),
            ("CATALOG_SYNC_INTERVAL_SECS", "5"),
            ("CATALOG_PULL_PAGE_SIZE", "5000"),
            ("CATALOG_FEED_DEBOUNCE_MS", "0"),
        ])
        .unwrap();

        assert!(config.is_in_memory());
        assert_eq!(config.node_id, "till-2");
        assert_eq!(config.remote_url.as_deref(), Some("https://pos.example.com/api"));
        assert_eq!(config.sync.interval, Duration::from_secs(5));
        assert_eq!(config.sync.page_size, 1000);
        assert!(config.feed.debounce.is_zero());
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[("CATALOG_REMOTE_URL", "  "), ("CATALOG_PULL_PAGE_SIZE", "")]).unwrap();
        assert!(config.remote_url.is_none());
        assert_eq!(config.sync.page_size, 200);
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = load(&[("CATALOG_RETRY_BASE_MS", "soon")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { ref key, ref value } if key == "CATALOG_RETRY_BASE_MS" && value == "soon"
        ));

        assert!(load(&[("CATALOG_SYNC_INTERVAL_SECS", "0")]).is_err());
        assert!(load(&[("CATALOG_RETRY_BASE_MS", "10"), ("CATALOG_RETRY_MAX_MS", "5")]).is_err());
    }
}
