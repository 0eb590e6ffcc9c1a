//! Update channel between background runs and the foreground loop
//!
//! Any number of worker threads hold an [`UpdateSender`]; exactly one
//! foreground consumer owns the [`UpdateReceiver`] and drains it with
//! non-blocking polls. Senders outliving the receiver is harmless: sends to a
//! closed channel are dropped.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

/// Completion notice for one image of one folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    pub image: String,
    pub folder: PathBuf,
}

impl UpdateRecord {
    pub fn new(image: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            folder: folder.into(),
        }
    }

    pub fn is_for(&self, folder: &Path) -> bool {
        self.folder == folder
    }
}

#[derive(Debug, Clone)]
pub struct UpdateSender {
    inner: Sender<UpdateRecord>,
}

impl UpdateSender {
    /// Returns false once the receiving side is gone
    pub fn send(&self, record: UpdateRecord) -> bool {
        self.inner.send(record).is_ok()
    }
}

#[derive(Debug)]
pub struct UpdateReceiver {
    inner: Receiver<UpdateRecord>,
}

impl UpdateReceiver {
    /// Take up to `max` pending records without blocking
    pub fn drain(&self, max: usize) -> Vec<UpdateRecord> {
        let mut batch = Vec::new();
        while batch.len() < max {
            match self.inner.try_recv() {
                Ok(record) => batch.push(record),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        batch
    }

    /// Block until `count` records have arrived or `timeout` elapses.
    /// Intended for tests and headless drivers, never the UI loop.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<UpdateRecord> {
        let deadline = Instant::now() + timeout;
        let mut batch = Vec::new();
        while batch.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.inner.recv_timeout(remaining) {
                Ok(record) => batch.push(record),
                Err(_) => break,
            }
        }
        batch
    }
}

/// Create a connected sender/receiver pair
pub fn update_channel() -> (UpdateSender, UpdateReceiver) {
    let (tx, rx) = mpsc::channel();
    (UpdateSender { inner: tx }, UpdateReceiver { inner: rx })
}
