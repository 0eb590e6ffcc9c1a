//! Runtime configuration for a gallery session

use crate::GalleryError;
use folder_cache::ScanOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thumbnail_cache::ThumbnailConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    /// JSON index mapping folder paths to their records
    pub index_path: PathBuf,
    /// Parent of every folder's cache and backup directories
    pub cache_root: PathBuf,
    pub thumbnail: ThumbnailConfig,
    /// Most update records applied per tick
    pub tick_batch_size: usize,
    pub tick_interval_ms: u64,
    /// Also list `.JPG`, `.PNG`, ... when scanning a new folder
    pub case_insensitive_extensions: bool,
    /// Cancel runs of the previous folder when another folder is opened
    pub cancel_superseded_runs: bool,
    /// Re-encode every thumbnail on open, even when a file already exists
    pub regenerate_existing: bool,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gallery");
        Self::rooted_at(&base)
    }
}

impl GalleryConfig {
    /// Defaults with all on-disk state under `base`
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            index_path: base.join("index.json"),
            cache_root: base.join("cache"),
            thumbnail: ThumbnailConfig::default(),
            tick_batch_size: 32,
            tick_interval_ms: 50,
            case_insensitive_extensions: false,
            cancel_superseded_runs: true,
            regenerate_existing: false,
        }
    }

    /// Read a JSON config file; absent keys keep their defaults
    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        let config_error = |reason: String| GalleryError::Config {
            path: path.to_path_buf(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| config_error(e.to_string()))?;
        if config.tick_batch_size == 0 {
            return Err(config_error("tick_batch_size must be at least 1".to_string()));
        }
        if config.tick_interval_ms == 0 {
            return Err(config_error("tick_interval_ms must be at least 1".to_string()));
        }
        Ok(config)
    }

    /// Never zero, even for configs built in code
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            case_insensitive: self.case_insensitive_extensions,
        }
    }
}
