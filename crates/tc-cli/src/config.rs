//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use tc_core::{PlatformTag, SnapshotStore};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the interval database.
    pub database_path: PathBuf,
    /// Path to the tracker snapshot. Defaults to `<database_path>.state`.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    /// Form factor of this device; selects indexes and retention.
    #[serde(default)]
    pub platform: PlatformTag,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("snapshot_path", &self.snapshot_path)
            .field("platform", &self.platform)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("activity.db"),
            snapshot_path: None,
            platform: PlatformTag::Desktop,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (TABCLOCK_*)
        figment = figment.merge(Env::prefixed("TABCLOCK_"));

        figment.extract()
    }

    /// Snapshot store for the configured tracker.
    pub fn snapshot_store(&self) -> SnapshotStore {
        self.snapshot_path.as_ref().map_or_else(
            || SnapshotStore::beside(&self.database_path),
            SnapshotStore::new,
        )
    }
}

/// Returns the platform-specific config directory for tabclock.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tabclock"))
}

/// Returns the platform-specific data directory for tabclock.
///
/// On Linux: `~/.local/share/tabclock`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("tabclock"))
}
