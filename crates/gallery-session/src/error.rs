use folder_cache::CacheError;
use std::path::PathBuf;

/// Errors reported back to the presentation layer
#[derive(Debug, thiserror::Error)]
pub enum GalleryError {
    /// Rejected before any work was started
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no folder is open")]
    NoFolderOpen,

    #[error("image {0} is not in the open folder")]
    UnknownImage(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("cannot load config {path}: {reason}")]
    Config { path: PathBuf, reason: String },
}

impl GalleryError {
    /// The cache index is unusable and every open will be refused
    pub fn is_cache_corrupt(&self) -> bool {
        matches!(self, GalleryError::Cache(e) if e.is_corrupt())
    }
}

pub type Result<T> = std::result::Result<T, GalleryError>;
