use std::time::Duration;

pub const SAVE_GRACE_ENV: &str = "RTL_BRIDGE_SAVE_GRACE_MS";
pub const GUARD_ENV: &str = "RTL_BRIDGE_GUARD_MS";
pub const DEBOUNCE_ENV: &str = "RTL_BRIDGE_DEBOUNCE_MS";

/// Bridge timing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// How long the internal-save flag stays raised after a save completes
    pub save_grace: Duration,
    /// Minimum mtime advance for a watcher event to count as external
    pub guard_interval: Duration,
    /// Debounce period of the file watcher
    pub watch_debounce: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            save_grace: Duration::from_millis(500),
            guard_interval: rtl_core::watch::DEFAULT_GUARD_INTERVAL,
            watch_debounce: Duration::from_millis(200),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Optional environment variables (milliseconds):
    /// - `RTL_BRIDGE_SAVE_GRACE_MS`
    /// - `RTL_BRIDGE_GUARD_MS`
    /// - `RTL_BRIDGE_DEBOUNCE_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            save_grace: millis(&lookup, SAVE_GRACE_ENV)?.unwrap_or(defaults.save_grace),
            guard_interval: millis(&lookup, GUARD_ENV)?.unwrap_or(defaults.guard_interval),
            watch_debounce: millis(&lookup, DEBOUNCE_ENV)?.unwrap_or(defaults.watch_debounce),
        })
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|ms| Some(Duration::from_millis(ms)))
        .map_err(|_| ConfigError::InvalidMillis { key, value: raw })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a whole number of milliseconds, got {value:?}")]
    InvalidMillis { key: &'static str, value: String },
}
