//! Background thumbnail generation and caching for the folder gallery
//!
//! This crate turns a folder's source images into small PNG thumbnails stored
//! in a per-folder cache directory, without ever blocking the caller.
//!
//! # Features
//!
//! - **Codec**: decode JPEG/PNG, downsize within a bounding box, write atomically
//! - **Worker pool**: per-folder runs that fan out with rayon as batches grow
//! - **Update channel**: multi-producer queue of completion records drained by
//!   the foreground loop with non-blocking polls
//! - **Cancellation**: every run hands back a handle with a cancel token
//! - **Resize**: back up and re-encode originals in place, on the same pool

pub mod channel;
pub mod generate;
pub mod pool;
pub mod resize;

pub use channel::{update_channel, UpdateReceiver, UpdateRecord, UpdateSender};
pub use generate::{generate_thumbnail, image_dimensions, thumbnail_path};
pub use pool::{
    spawn_resize_run, spawn_thumbnail_run, CancelToken, ResizeRequest, RunHandle, RunProgress,
    ThumbnailRequest,
};
pub use resize::{backup_original, resize_in_place, MAX_RESIZED_PIXELS};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Standard configuration for thumbnail generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Prefix of every thumbnail file name, e.g. `S_beach.png`
    pub size_tag: String,
    /// Long-edge bound in pixels
    pub max_dimension: u32,
    /// Batches smaller than this run sequentially on the run thread
    pub inline_threshold: usize,
    /// Batches smaller than this use `medium_threads` workers
    pub medium_threshold: usize,
    pub medium_threads: usize,
    pub large_threads: usize,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            size_tag: "S".to_string(),
            max_dimension: 400,
            inline_threshold: 8,
            medium_threshold: 64,
            medium_threads: 4,
            large_threads: 8,
        }
    }
}

impl ThumbnailConfig {
    /// Number of worker threads for a batch of `work` images; 0 means inline
    pub fn parallelism(&self, work: usize) -> usize {
        if work < self.inline_threshold {
            0
        } else if work < self.medium_threshold {
            self.medium_threads.max(1)
        } else {
            self.large_threads.max(1)
        }
    }
}

/// Per-image failure raised by the codec
#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("cannot decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("cannot encode {path}: {reason}")]
    Encode { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ThumbnailError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        ThumbnailError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn decode(path: &Path, err: image::ImageError) -> Self {
        ThumbnailError::Decode {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }

    /// True when the source image itself is unreadable
    pub fn is_decode(&self) -> bool {
        matches!(self, ThumbnailError::Decode { .. })
    }
}
