use crate::persistence::config_root;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const CONFIG_FILE: &str = "config.toml";

/// Daemon tunables read from `config.toml`; every field is optional
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub device_retry_secs: u64,
    pub window_poll_ms: u64,
    pub watch_debounce_ms: u64,
    pub event_queue: usize,
    pub subscriber_capacity: usize,
    pub input_dir: PathBuf,
    pub output_name_prefix: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            device_retry_secs: 2,
            window_poll_ms: 300,
            watch_debounce_ms: 50,
            event_queue: 128,
            subscriber_capacity: 32,
            input_dir: PathBuf::from("/dev/input/by-id"),
            output_name_prefix: "remapd".to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn default_path() -> PathBuf {
        config_root().join(CONFIG_FILE)
    }

    /// Missing file means defaults; a file that does not parse is an error.
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check config file {}: {}", path.display(), e))?
        {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

        config
            .validate()
            .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;

        debug!("Loaded config: {:?}", config);
        Ok(config)
    }

    /// Intervals and queue sizes must be non-zero.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("device_retry_secs", self.device_retry_secs),
            ("window_poll_ms", self.window_poll_ms),
            ("watch_debounce_ms", self.watch_debounce_ms),
            ("event_queue", self.event_queue as u64),
            ("subscriber_capacity", self.subscriber_capacity as u64),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(eyre!("{} must be greater than 0", field));
            }
        }
        Ok(())
    }

    pub fn device_retry(&self) -> Duration {
        Duration::from_secs(self.device_retry_secs)
    }

    pub fn window_poll(&self) -> Duration {
        Duration::from_millis(self.window_poll_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}
