use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the durability layer. Everything has a default so a
/// shell can construct the services with `SyncConfig::default()` and only
/// override the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Domain write endpoint replayed mutations are POSTed to.
    pub activity_endpoint: String,

    /// Tag used when registering with the deferred-execution facility.
    pub sync_tag: String,

    /// Path of the sqlite durable store. Supports a leading `~`. When
    /// absent, callers typically fall back to an in-memory store.
    pub database_path: Option<PathBuf>,

    /// Age limit for tracked pending mutations, milliseconds. Entries at or
    /// past this age are evicted instead of replayed.
    pub max_pending_age_ms: i64,

    /// Store key the tracker persists its pending list under.
    pub pending_store_key: String,

    /// Store key the sync manager persists its request queue under.
    pub queue_store_key: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            activity_endpoint: "https://api.cradle.app/api/activities".to_string(),
            sync_tag: crate::background_sync::DEFAULT_SYNC_TAG.to_string(),
            database_path: None,
            max_pending_age_ms: crate::tracker::MAX_AGE_MS,
            pending_store_key: crate::tracker::PENDING_KEY.to_string(),
            queue_store_key: crate::background_sync::QUEUE_KEY.to_string(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, toml_str)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Database path with `~` expanded against the home directory.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        let raw = self.database_path.as_ref()?;
        let raw_str = raw.to_string_lossy();
        if raw_str.starts_with('~') {
            if let Some(home) = dirs::home_dir() {
                let without_tilde = raw_str
                    .trim_start_matches('~')
                    .trim_start_matches(std::path::MAIN_SEPARATOR);
                return Some(home.join(without_tilde));
            }
        }
        Some(raw.clone())
    }
}
