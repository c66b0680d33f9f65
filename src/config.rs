//! Configuration for the economy ledger

use serde::{Deserialize, Serialize};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name (for logging)
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// History configuration
    pub history: HistoryConfig,

    /// Locking configuration
    pub locking: LockingConfig,

    /// Default rate limiting (per-currency config overrides this)
    pub rate_limit: RateLimitConfig,

    /// Change event configuration
    pub events: EventConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "economy-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            history: HistoryConfig::default(),
            locking: LockingConfig::default(),
            rate_limit: RateLimitConfig::default(),
            events: EventConfig::default(),
        }
    }
}

/// History ring buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Retained records per entity (oldest evicted FIFO)
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Lock acquisition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingConfig {
    /// Bound on the wait for a full key set (milliseconds)
    pub acquire_timeout_ms: u64,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 5_000,
        }
    }
}

/// Default sliding-window rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window duration (seconds)
    pub window_secs: u64,

    /// Maximum operations per window; `None` disables the default limit
    pub max_ops: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_ops: None, // opt-in: only currencies with a configured limit are throttled
        }
    }
}

/// Change event broadcast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Broadcast channel capacity; slow subscribers lose oldest events
    pub buffer: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { buffer: 1_024 }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to read config: {}", e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(capacity) = std::env::var("ECONOMY_HISTORY_CAPACITY") {
            config.history.capacity = capacity
                .parse()
                .map_err(|e| crate::Error::InvalidConfig(format!("ECONOMY_HISTORY_CAPACITY: {}", e)))?;
        }

        if let Ok(timeout) = std::env::var("ECONOMY_LOCK_TIMEOUT_MS") {
            config.locking.acquire_timeout_ms = timeout
                .parse()
                .map_err(|e| crate::Error::InvalidConfig(format!("ECONOMY_LOCK_TIMEOUT_MS: {}", e)))?;
        }

        if let Ok(window) = std::env::var("ECONOMY_RATE_WINDOW_SECS") {
            config.rate_limit.window_secs = window
                .parse()
                .map_err(|e| crate::Error::InvalidConfig(format!("ECONOMY_RATE_WINDOW_SECS: {}", e)))?;
        }

        Ok(config)
    }
}
