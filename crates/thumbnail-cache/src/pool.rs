//! Background runs that generate thumbnails or resize originals
//!
//! Each run is scoped to one folder and executes on its own thread. Images
//! that already have a thumbnail are reported straight away; the rest are
//! handed to the codec, inline for small batches and on a dedicated rayon
//! pool for larger ones. Every finished image produces one [`UpdateRecord`],
//! sent strictly after its file write completed. Failures are logged and
//! counted but never stop the batch.

use crate::channel::{UpdateRecord, UpdateSender};
use crate::generate::{generate_thumbnail, thumbnail_path};
use crate::resize::{backup_original, resize_in_place};
use crate::{ThumbnailConfig, ThumbnailError};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Shared flag telling a run to stop picking up new images
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Thumbnail generation for a set of images in one folder
#[derive(Debug, Clone)]
pub struct ThumbnailRequest {
    /// Folder key stamped on every emitted record
    pub folder: PathBuf,
    pub source_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub images: Vec<String>,
    /// Regenerate even when a thumbnail file already exists
    pub force: bool,
}

/// Backup, rescale and re-thumbnail a set of images in one folder
#[derive(Debug, Clone)]
pub struct ResizeRequest {
    pub folder: PathBuf,
    pub source_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub images: Vec<String>,
    pub percent: f64,
}

/// Snapshot of a run's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunProgress {
    pub total: usize,
    /// Images processed by the codec
    pub completed: usize,
    /// Images skipped because their thumbnail already existed
    pub cached: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub finished: bool,
}

impl RunProgress {
    pub fn completion_percentage(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            ((self.completed + self.cached + self.failed) as f64 / self.total as f64) * 100.0
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: usize,
    completed: AtomicUsize,
    cached: AtomicUsize,
    failed: AtomicUsize,
    finished: AtomicBool,
    failures: Mutex<Vec<String>>,
}

enum Outcome {
    Generated,
    Failed,
}

/// Handle to an in-flight run.
///
/// Dropping the handle does not stop or wait for the run.
#[derive(Debug)]
pub struct RunHandle {
    folder: PathBuf,
    cancel: CancelToken,
    counters: Arc<Counters>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl RunHandle {
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Ask the run to stop; images already being encoded still finish
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.counters.finished.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> RunProgress {
        RunProgress {
            total: self.counters.total,
            completed: self.counters.completed.load(Ordering::Relaxed),
            cached: self.counters.cached.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.cancel.is_cancelled(),
            finished: self.is_finished(),
        }
    }

    /// Names of images that could not be processed
    pub fn failures(&self) -> Vec<String> {
        self.counters.failures.lock().clone()
    }

    /// Wait for the run thread to exit
    pub fn join(&self) {
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!(folder = %self.folder.display(), "run thread panicked");
            }
        }
    }
}

/// Start a thumbnail run for one folder and return immediately
pub fn spawn_thumbnail_run(
    request: ThumbnailRequest,
    config: ThumbnailConfig,
    sender: UpdateSender,
) -> RunHandle {
    let folder = request.folder.clone();
    let total = request.images.len();
    spawn_run(folder, total, move |cancel, counters| {
        execute_thumbnail_run(&request, &config, &sender, cancel, counters);
    })
}

/// Start a resize run for one folder and return immediately
pub fn spawn_resize_run(
    request: ResizeRequest,
    config: ThumbnailConfig,
    sender: UpdateSender,
) -> RunHandle {
    let folder = request.folder.clone();
    let total = request.images.len();
    spawn_run(folder, total, move |cancel, counters| {
        info!(
            folder = %request.folder.display(),
            images = request.images.len(),
            percent = request.percent,
            "resize run started"
        );
        let threads = config.parallelism(request.images.len());
        process(&request.images, threads, cancel, counters, |name| {
            match resize_one(&request, &config, name) {
                Ok(()) => {
                    sender.send(UpdateRecord::new(name, &request.folder));
                    Outcome::Generated
                }
                Err(e) => {
                    warn!(image = name, error = %e, "resize failed, skipping");
                    // The original is untouched; let its old thumbnail show again
                    if thumbnail_path(&request.cache_dir, name, &config).exists() {
                        sender.send(UpdateRecord::new(name, &request.folder));
                    }
                    Outcome::Failed
                }
            }
        });
        info!(folder = %request.folder.display(), "resize run finished");
    })
}

/// Marks the run finished when dropped, including while unwinding
struct FinishOnDrop<'a>(&'a Counters);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finished.store(true, Ordering::Release);
    }
}

fn spawn_run<F>(folder: PathBuf, total: usize, body: F) -> RunHandle
where
    F: FnOnce(&CancelToken, &Counters) + Send + 'static,
{
    let counters = Arc::new(Counters {
        total,
        ..Counters::default()
    });
    let cancel = CancelToken::new();

    let thread = {
        let counters = Arc::clone(&counters);
        let cancel = cancel.clone();
        thread::spawn(move || {
            let _finished = FinishOnDrop(&counters);
            body(&cancel, &counters);
        })
    };

    RunHandle {
        folder,
        cancel,
        counters,
        thread: Mutex::new(Some(thread)),
    }
}

fn execute_thumbnail_run(
    request: &ThumbnailRequest,
    config: &ThumbnailConfig,
    sender: &UpdateSender,
    cancel: &CancelToken,
    counters: &Counters,
) {
    let mut pending = Vec::new();
    for name in &request.images {
        if cancel.is_cancelled() {
            break;
        }
        let target = thumbnail_path(&request.cache_dir, name, config);
        if !request.force && target.exists() {
            // Cache hit: the view still needs to hear about it
            counters.cached.fetch_add(1, Ordering::Relaxed);
            sender.send(UpdateRecord::new(name.as_str(), &request.folder));
        } else {
            pending.push(name.clone());
        }
    }

    let threads = config.parallelism(pending.len());
    info!(
        folder = %request.folder.display(),
        cached = counters.cached.load(Ordering::Relaxed),
        pending = pending.len(),
        threads,
        "thumbnail run started"
    );

    process(&pending, threads, cancel, counters, |name| {
        let source = request.source_dir.join(name);
        match generate_thumbnail(&source, &request.cache_dir, config) {
            Ok(path) => {
                debug!(image = name, thumbnail = %path.display(), "thumbnail written");
                sender.send(UpdateRecord::new(name, &request.folder));
                Outcome::Generated
            }
            Err(e) if e.is_decode() => {
                warn!(image = name, error = %e, "undecodable image, skipping");
                Outcome::Failed
            }
            Err(e) => {
                warn!(image = name, error = %e, "thumbnail generation failed");
                Outcome::Failed
            }
        }
    });

    info!(
        folder = %request.folder.display(),
        generated = counters.completed.load(Ordering::Relaxed),
        failed = counters.failed.load(Ordering::Relaxed),
        cancelled = cancel.is_cancelled(),
        "thumbnail run finished"
    );
}

fn resize_one(
    request: &ResizeRequest,
    config: &ThumbnailConfig,
    name: &str,
) -> Result<(), ThumbnailError> {
    let source = request.source_dir.join(name);
    backup_original(&source, &request.backup_dir)?;
    resize_in_place(&source, request.percent)?;
    generate_thumbnail(&source, &request.cache_dir, config)?;
    Ok(())
}

/// Run `job` over `images`, sequentially when `threads` is 0
fn process<F>(images: &[String], threads: usize, cancel: &CancelToken, counters: &Counters, job: F)
where
    F: Fn(&str) -> Outcome + Sync,
{
    let run_one = |name: &String| {
        if cancel.is_cancelled() {
            return;
        }
        match job(name.as_str()) {
            Outcome::Generated => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Failed => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                counters.failures.lock().push(name.clone());
            }
        }
    };

    if threads == 0 {
        images.iter().for_each(run_one);
        return;
    }

    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(|| images.par_iter().for_each(run_one)),
        Err(e) => {
            warn!(error = %e, "could not build worker pool, running inline");
            images.iter().for_each(run_one);
        }
    }
}
