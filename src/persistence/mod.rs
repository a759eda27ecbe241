//! # Persistence Module
//!
//! Owns everything that lives on disk for one device: its profile documents,
//! the `active` pointer and the device-level [`Metadata`].
//!
//! ## Layout
//! ```text
//! $XDG_CONFIG_HOME/remapd/
//! ├── config.toml
//! └── devices/<serial or product id>/
//!     ├── metadata.json
//!     └── profiles/
//!         ├── active ──► default.json
//!         └── default.json
//! ```
//!
//! ## Key Abstractions
//! - [`store::ProfileStore`]: in-memory registry of all profiles, published as
//!   immutable snapshots
//! - [`store::Resolver`]: the single owner of the press/release state, bound to
//!   the store's active profile
//! - [`watcher`]: turns directory changes into store reloads

pub mod error;
pub mod storage;
pub mod store;
pub mod templates;
pub mod watcher;

pub use error::StoreError;
pub use store::{
    ActiveProfile, ProfileSnapshot, ProfileStore, ProfileSummary, Resolver, WindowRule,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const APP_DIR: &str = "remapd";
const DEVICES_DIR: &str = "devices";
const PROFILES_DIR: &str = "profiles";
const METADATA_FILE: &str = "metadata.json";

/// Device-level settings shared by all profiles of one device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub is_opposite_hand: bool,
    /// Grab the input device so the raw events do not reach other readers
    #[serde(default)]
    pub exclusive_access: bool,
    #[serde(default)]
    pub invert_axes: bool,
}

/// `$XDG_CONFIG_HOME/remapd`, falling back to `~/.config/remapd`
pub fn config_root() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join(APP_DIR)
}

/// All on-disk locations for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePaths {
    pub device_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub metadata_file: PathBuf,
}

impl DevicePaths {
    pub fn new(root: &Path, device_identifier: &str) -> Self {
        let device_dir = root.join(DEVICES_DIR).join(device_identifier);
        Self {
            profiles_dir: device_dir.join(PROFILES_DIR),
            metadata_file: device_dir.join(METADATA_FILE),
            device_dir,
        }
    }

    pub fn active_link(&self) -> PathBuf {
        self.profiles_dir.join(storage::ACTIVE_LINK)
    }

    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.profiles_dir).await
    }
}
