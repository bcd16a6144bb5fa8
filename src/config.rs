//! Settings: cache tuning plus application-level knobs.
//!
//! Stored as JSON. Every field has a default, so partial files load fine.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::paths::{CONFIG_DIR_ENV, PathConfig, SETTINGS_FILE, config_file, ensure_dirs};

/// Per-cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Fetch granularity (items per chunk)
    pub chunk_size: usize,
    /// Maximum number of items exposed (0 = unlimited)
    pub limit: usize,
    /// Index of the first item of the window in the backing collection
    pub offset: usize,
    /// Detect moved runs when reconciling a reload
    pub use_move: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            limit: 0,
            offset: 0,
            use_move: false,
        }
    }
}

impl CacheSettings {
    /// Clamp values the cache can't work with.
    pub fn normalized(mut self) -> Self {
        self.chunk_size = self.chunk_size.max(1);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub cache: CacheSettings,
    /// Loader threads (0 = auto)
    pub workers: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            workers: 0,
        }
    }
}

/// Load settings from a JSON file.
pub fn load_settings(path: &Path) -> Result<AppSettings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings: {}", path.display()))?;
    let settings: AppSettings = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
    debug!("Loaded settings from {}: {:?}", path.display(), settings);
    Ok(settings)
}

/// Load settings, falling back to defaults when the file does not exist.
pub fn load_or_default(path: &Path) -> Result<AppSettings> {
    if !path.exists() {
        info!("No settings at {}, using defaults", path.display());
        return Ok(AppSettings::default());
    }
    load_settings(path)
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<()> {
    let text = serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;
    std::fs::write(path, text).with_context(|| format!("Failed to write settings: {}", path.display()))?;
    Ok(())
}
