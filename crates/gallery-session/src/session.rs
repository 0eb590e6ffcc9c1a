//! Process-wide state shared by the controller and its background runs

use crate::GalleryConfig;
use folder_cache::CacheStore;
use thumbnail_cache::{update_channel, UpdateReceiver, UpdateSender};

/// Owns the folder index and the update channel.
///
/// Built once at startup. Background runs receive a clone of the sender;
/// only the controller drains the receiver.
#[derive(Debug)]
pub struct Session {
    config: GalleryConfig,
    store: CacheStore,
    sender: UpdateSender,
    receiver: UpdateReceiver,
}

impl Session {
    /// Does no I/O; the index is read on first use
    pub fn new(config: GalleryConfig) -> Self {
        let store = CacheStore::new(&config.index_path, &config.cache_root)
            .with_scan_options(config.scan_options());
        let (sender, receiver) = update_channel();
        Self {
            config,
            store,
            sender,
            receiver,
        }
    }

    pub fn config(&self) -> &GalleryConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut CacheStore {
        &mut self.store
    }

    pub fn sender(&self) -> UpdateSender {
        self.sender.clone()
    }

    pub fn receiver(&self) -> &UpdateReceiver {
        &self.receiver
    }
}
