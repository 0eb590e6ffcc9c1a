//! Gallery session controller
//!
//! Owns the currently open folder and is the only consumer of the update
//! channel. State machine:
//!
//! ```text
//! NoFolderOpen --select_folder--> FolderOpen --select_folder--> FolderOpen
//!                                    |  ^
//!                 tick/rate/sort/resize  |
//!                                    +--+
//! ```
//!
//! Every operation returns without waiting on background work. Thumbnail
//! and resize runs report through the update channel and their effect shows
//! up in a later `tick()`.

use crate::request::{Request, Response, TickReport};
use crate::session::Session;
use crate::view::{CellState, GalleryView, SortMode};
use crate::{GalleryError, Result};
use folder_cache::{FolderRecord, Rating};
use std::path::{Path, PathBuf};
use thumbnail_cache::{
    spawn_resize_run, spawn_thumbnail_run, ResizeRequest, RunHandle, ThumbnailRequest,
};
use tracing::{debug, info, warn};

/// The folder currently shown to the user.
///
/// `id` and the directories are a snapshot of the folder record taken when
/// the folder was opened; the store stays the source of truth.
#[derive(Debug)]
pub struct OpenFolder {
    pub id: String,
    pub cache_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub view: GalleryView,
}

impl OpenFolder {
    fn new(record: &FolderRecord) -> Self {
        Self {
            id: record.id.clone(),
            cache_dir: record.cache_dir.clone(),
            backup_dir: record.backup_dir.clone(),
            view: GalleryView::from_record(record),
        }
    }

    pub fn path(&self) -> &Path {
        self.view.folder()
    }
}

#[derive(Debug, Default)]
pub enum SessionState {
    #[default]
    NoFolderOpen,
    FolderOpen(OpenFolder),
}

pub struct Controller {
    session: Session,
    state: SessionState,
    runs: Vec<RunHandle>,
    stale_dropped: u64,
}

impl Controller {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            state: SessionState::NoFolderOpen,
            runs: Vec::new(),
            stale_dropped: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn open_folder(&self) -> Option<&OpenFolder> {
        match &self.state {
            SessionState::FolderOpen(open) => Some(open),
            SessionState::NoFolderOpen => None,
        }
    }

    pub fn current_folder(&self) -> Option<&Path> {
        self.open_folder().map(OpenFolder::path)
    }

    pub fn view(&self) -> Option<&GalleryView> {
        self.open_folder().map(|open| &open.view)
    }

    fn open_folder_mut(&mut self) -> Result<&mut OpenFolder> {
        match &mut self.state {
            SessionState::FolderOpen(open) => Ok(open),
            SessionState::NoFolderOpen => Err(GalleryError::NoFolderOpen),
        }
    }

    /// Runs that have not finished yet
    pub fn active_runs(&self) -> impl Iterator<Item = &RunHandle> {
        self.runs.iter().filter(|run| !run.is_finished())
    }

    /// Total records dropped because their folder was no longer open
    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }

    /// True once every started run has finished. Records they sent may still
    /// be waiting for the next tick.
    pub fn is_idle(&self) -> bool {
        self.active_runs().next().is_none()
    }

    /// Dispatch a request from the presentation layer
    pub fn handle(&mut self, request: Request) -> Result<Response> {
        match request {
            Request::OpenFolder { path } => {
                let open = self.select_folder(&path)?;
                Ok(Response::Opened {
                    folder: open.path().to_path_buf(),
                    id: open.id.clone(),
                    images: open.view.len(),
                })
            }
            Request::Rate { image, value } => {
                let rating = self.rate(&image, value)?;
                Ok(Response::Rated { image, rating })
            }
            Request::Sort { by_rating } => {
                self.sort(by_rating)?;
                let order = self.view().map(GalleryView::ordered_names).unwrap_or_default();
                Ok(Response::Sorted { order })
            }
            Request::Resize { images, percent } => {
                let count = self.resize(&images, &percent)?;
                Ok(Response::ResizeStarted { images: count })
            }
            Request::Rescan => {
                let images = self.rescan()?;
                Ok(Response::Rescanned { images })
            }
            Request::Tick => Ok(Response::Ticked(self.tick())),
        }
    }

    /// Open `path`, making it the current folder, and start thumbnailing it.
    ///
    /// On failure the previous state is left untouched.
    pub fn select_folder(&mut self, path: &Path) -> Result<&OpenFolder> {
        let record = match self.session.store_mut().open(path) {
            Ok(record) => record.clone(),
            Err(e) => {
                if e.is_corrupt() {
                    warn!(folder = %path.display(), error = %e, "refusing to open folder");
                }
                return Err(e.into());
            }
        };

        if self.session.config().cancel_superseded_runs {
            for run in self.runs.iter().filter(|run| run.folder() != record.path) {
                if !run.is_finished() {
                    debug!(folder = %run.folder().display(), "cancelling superseded run");
                }
                run.cancel();
            }
        }
        self.runs.retain(|run| !run.is_finished());

        let open = OpenFolder::new(&record);
        info!(
            folder = %record.path.display(),
            id = %record.id,
            images = open.view.len(),
            "folder opened"
        );

        let images = open.view.ordered_names();
        let force = self.session.config().regenerate_existing;
        self.start_thumbnail_run(&open, images, force);
        self.state = SessionState::FolderOpen(open);

        self.open_folder().ok_or(GalleryError::NoFolderOpen)
    }

    /// Apply up to `tick_batch_size` pending update records.
    pub fn tick(&mut self) -> TickReport {
        let batch_size = self.session.config().tick_batch_size.max(1);
        let records = self.session.receiver().drain(batch_size);
        let mut report = TickReport::default();

        for record in records {
            let open = match &mut self.state {
                SessionState::FolderOpen(open) if record.is_for(open.path()) => open,
                _ => {
                    debug!(
                        target: "gallery_session::stale",
                        image = %record.image,
                        folder = %record.folder.display(),
                        "dropping update for a folder that is no longer open"
                    );
                    report.stale += 1;
                    continue;
                }
            };
            if open.view.mark_ready(&record.image) {
                report.ready.push(record.image);
            }
        }

        self.stale_dropped += report.stale as u64;
        self.runs.retain(|run| !run.is_finished());
        report
    }

    /// Rate an image of the open folder and persist the index
    pub fn rate(&mut self, image: &str, value: i64) -> Result<Rating> {
        let folder = {
            let open = self.open_folder_mut()?;
            if !open.view.contains(image) {
                return Err(GalleryError::UnknownImage(image.to_string()));
            }
            open.path().to_path_buf()
        };
        let rating = Rating::new(value)
            .map_err(|_| GalleryError::InvalidInput(format!("rating must be -1..=3, got {value}")))?;

        let store = self.session.store_mut();
        store.set_rating(&folder, image, Some(rating))?;
        store.persist()?;

        self.open_folder_mut()?.view.set_rating(image, Some(rating));
        debug!(image, rating = rating.value(), "image rated");
        Ok(rating)
    }

    /// Switch between listing order and rating order.
    ///
    /// Cells still waiting for a thumbnail get a new run unless one is
    /// already in flight for this folder.
    pub fn sort(&mut self, by_rating: bool) -> Result<()> {
        let mode = if by_rating {
            SortMode::RatingDesc
        } else {
            SortMode::Listing
        };
        let open = self.open_folder_mut()?;
        open.view.set_sort(mode);
        let missing = open.view.loading();
        let folder = open.path().to_path_buf();

        let busy = self.active_runs().any(|run| run.folder() == folder);
        if !missing.is_empty() && !busy {
            if let SessionState::FolderOpen(open) = &self.state {
                let run = self.thumbnail_run(open, missing, false);
                self.runs.push(run);
            }
        }
        Ok(())
    }

    /// Back up, shrink or enlarge, and re-thumbnail the selected images.
    ///
    /// `percent` must parse as a number in `(0, MAX_RESIZE_PERCENT]`;
    /// otherwise nothing is started and `InvalidInput` is returned. Returns the number of images
    /// queued.
    pub fn resize(&mut self, images: &[String], percent: &str) -> Result<usize> {
        let percent = parse_percent(percent)?;
        if images.is_empty() {
            return Err(GalleryError::InvalidInput("no images selected".to_string()));
        }

        let open = self.open_folder_mut()?;
        if let Some(unknown) = images.iter().find(|name| !open.view.contains(name)) {
            return Err(GalleryError::UnknownImage(unknown.clone()));
        }
        for name in images {
            open.view.mark_loading(name);
        }

        let request = ResizeRequest {
            folder: open.path().to_path_buf(),
            source_dir: open.path().to_path_buf(),
            cache_dir: open.cache_dir.clone(),
            backup_dir: open.backup_dir.clone(),
            images: images.to_vec(),
            percent,
        };
        info!(
            folder = %request.folder.display(),
            images = images.len(),
            percent,
            "starting resize"
        );

        let run = spawn_resize_run(
            request,
            self.session.config().thumbnail.clone(),
            self.session.sender(),
        );
        self.runs.push(run);
        Ok(images.len())
    }

    /// Pick up images added to or removed from the open folder since it was
    /// registered. Ratings and ready cells carry over.
    pub fn rescan(&mut self) -> Result<usize> {
        let folder = self.open_folder_mut()?.path().to_path_buf();
        let record = self.session.store_mut().rescan(&folder)?.clone();

        let open = self.open_folder_mut()?;
        let mut rebuilt = OpenFolder::new(&record);
        rebuilt.view.set_sort(open.view.sort_mode());
        for name in record.images.keys() {
            if open.view.cell(name).map(|c| c.state) == Some(CellState::Ready) {
                rebuilt.view.mark_ready(name);
            }
        }
        let missing = rebuilt.view.loading();
        let count = rebuilt.view.len();
        *open = rebuilt;

        if !missing.is_empty() {
            if let SessionState::FolderOpen(open) = &self.state {
                let run = self.thumbnail_run(open, missing, false);
                self.runs.push(run);
            }
        }
        Ok(count)
    }

    /// Signal every in-flight run to stop
    pub fn cancel_all(&self) {
        for run in &self.runs {
            run.cancel();
        }
    }

    /// Block until every started run has exited. For headless drivers and
    /// tests; an interactive loop keeps ticking instead.
    pub fn wait_for_runs(&self) {
        for run in &self.runs {
            run.join();
        }
    }

    fn start_thumbnail_run(&mut self, open: &OpenFolder, images: Vec<String>, force: bool) {
        let run = self.thumbnail_run(open, images, force);
        self.runs.push(run);
    }

    fn thumbnail_run(&self, open: &OpenFolder, images: Vec<String>, force: bool) -> RunHandle {
        let request = ThumbnailRequest {
            folder: open.path().to_path_buf(),
            source_dir: open.path().to_path_buf(),
            cache_dir: open.cache_dir.clone(),
            images,
            force,
        };
        spawn_thumbnail_run(
            request,
            self.session.config().thumbnail.clone(),
            self.session.sender(),
        )
    }
}

/// Largest accepted resize factor, in percent
pub const MAX_RESIZE_PERCENT: f64 = 1000.0;

fn parse_percent(input: &str) -> Result<f64> {
    let invalid = || {
        GalleryError::InvalidInput(format!(
            "resize percentage must be above 0 and at most {MAX_RESIZE_PERCENT}, got {input:?}"
        ))
    };
    let percent: f64 = input.trim().parse().map_err(|_| invalid())?;
    if percent.is_finite() && percent > 0.0 && percent <= MAX_RESIZE_PERCENT {
        Ok(percent)
    } else {
        Err(invalid())
    }
}
