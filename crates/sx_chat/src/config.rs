//! Chat configuration.
//!
//! Every field has a default; a config file only needs the values it
//! changes. Timings are stored in milliseconds so the file stays plain JSON.

use std::{path::Path, time::Duration};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

pub const KEY_POLL_INTERVAL: Duration = Duration::from_millis(1_500);
pub const KEY_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(15);
pub const TYPING_THROTTLE: Duration = Duration::from_millis(1_500);
pub const TYPING_WINDOW: Duration = Duration::from_secs(4);
pub const NOTIFICATION_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_PENDING_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub key_poll_interval_ms: u64,
    pub key_exchange_timeout_ms: u64,
    pub typing_throttle_ms: u64,
    pub typing_window_ms: u64,
    pub notification_poll_interval_ms: u64,
}

impl TimingConfig {
    pub fn key_poll_interval(&self) -> Duration {
        Duration::from_millis(self.key_poll_interval_ms)
    }

    pub fn key_exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.key_exchange_timeout_ms)
    }

    pub fn typing_throttle(&self) -> Duration {
        Duration::from_millis(self.typing_throttle_ms)
    }

    pub fn typing_window(&self) -> Duration {
        Duration::from_millis(self.typing_window_ms)
    }

    pub fn notification_poll_interval(&self) -> Duration {
        Duration::from_millis(self.notification_poll_interval_ms)
    }

    /// Poll intervals drive `tokio::time::interval`, which cannot tick at zero.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, ms) in [
            ("key_poll_interval_ms", self.key_poll_interval_ms),
            ("notification_poll_interval_ms", self.notification_poll_interval_ms),
        ] {
            if ms == 0 {
                bail!("timing.{name} must be greater than zero");
            }
        }
        Ok(())
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            key_poll_interval_ms: KEY_POLL_INTERVAL.as_millis() as u64,
            key_exchange_timeout_ms: KEY_EXCHANGE_TIMEOUT.as_millis() as u64,
            typing_throttle_ms: TYPING_THROTTLE.as_millis() as u64,
            typing_window_ms: TYPING_WINDOW.as_millis() as u64,
            notification_poll_interval_ms: NOTIFICATION_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    /// Plaintexts a session holds while waiting for the peer key.
    pub pending_queue_capacity: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            pending_queue_capacity: DEFAULT_PENDING_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreSettings {
    /// Row name in the key vault. One device can hold keys for several
    /// local accounts (the simulator uses one slot per user).
    pub device_slot: String,
    /// Vault file name inside the data directory.
    pub database_file: String,
}

impl Default for KeyStoreSettings {
    fn default() -> Self {
        Self {
            device_slot: "primary".into(),
            database_file: "device-keys.db".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub timing: TimingConfig,
    pub limits: SessionLimits,
    pub key_store: KeyStoreSettings,
}

/// Load the config at `path`, or defaults if no path is given or the file
/// does not exist.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ChatConfig> {
    let Some(path) = path else {
        return Ok(ChatConfig::default());
    };
    if !path.exists() {
        return Ok(ChatConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: ChatConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing config {}", path.display()))?;
    config
        .timing
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &ChatConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json).with_context(|| format!("writing config {}", path.display()))?;
    Ok(())
}
