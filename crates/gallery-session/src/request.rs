//! Requests the presentation layer sends to the controller

use folder_cache::Rating;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    OpenFolder { path: PathBuf },
    Rate { image: String, value: i64 },
    Sort { by_rating: bool },
    /// `percent` is raw user input; it is validated before any work starts
    Resize { images: Vec<String>, percent: String },
    Rescan,
    Tick,
}

/// Result of applying one batch of update records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Cells that just became ready and need repainting
    pub ready: Vec<String>,
    /// Records dropped because their folder is no longer open
    pub stale: usize,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.stale == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Opened { folder: PathBuf, id: String, images: usize },
    Rated { image: String, rating: Rating },
    Sorted { order: Vec<String> },
    ResizeStarted { images: usize },
    Rescanned { images: usize },
    Ticked(TickReport),
}
