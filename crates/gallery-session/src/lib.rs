//! Gallery session: the integration point between the presentation layer,
//! the persistent folder index and the background thumbnail pipeline.
//!
//! A [`Session`] is built once per process and owns the [`folder_cache::CacheStore`]
//! and the update channel. The [`Controller`] owns the session, tracks which
//! folder is open and turns update records into cell refreshes on every tick.

pub mod config;
pub mod controller;
pub mod error;
pub mod request;
pub mod session;
pub mod view;

pub use config::GalleryConfig;
pub use controller::{Controller, OpenFolder, SessionState, MAX_RESIZE_PERCENT};
pub use error::{GalleryError, Result};
pub use request::{Request, Response, TickReport};
pub use session::Session;
pub use view::{Cell, CellState, GalleryView, SortMode};

pub use folder_cache::{FolderRecord, Rating};
pub use thumbnail_cache::{RunProgress, ThumbnailConfig};
