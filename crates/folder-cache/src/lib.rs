//! Persistent per-folder index for the gallery.
//!
//! Every folder the user has opened gets one record in a single JSON index:
//!   {index_path} = { "version": 1, "folders": { "/abs/path": FolderRecord } }
//!
//! A record holds the folder's stable id, the cache and backup directories
//! named after that id, and the rating of every image found when the folder
//! was first scanned. The index is loaded lazily on first access and rewritten
//! in full by `persist()`. Single-process use only; there is no file locking.

pub mod scan;

pub use scan::{is_image_name, list_images, ScanOptions, IMAGE_EXTENSIONS};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

const INDEX_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The index file exists but cannot be read or parsed. Never recovered
    /// automatically; the operator has to repair or remove the file.
    #[error("cache index {path} is unusable: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize cache index: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("folder {0} is not in the cache index")]
    UnknownFolder(PathBuf),

    #[error("image {image} is not part of folder {folder}")]
    UnknownImage { folder: PathBuf, image: String },

    #[error("rating {0} is outside -1..=3")]
    InvalidRating(i64),
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, CacheError::Corrupt { .. })
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// A user rating in `-1..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub struct Rating(i8);

impl Rating {
    pub const MIN: i8 = -1;
    pub const MAX: i8 = 3;

    pub fn new(value: i64) -> Result<Self> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Ok(Rating(value as i8))
        } else {
            Err(CacheError::InvalidRating(value))
        }
    }

    pub fn value(self) -> i8 {
        self.0
    }
}

impl TryFrom<i8> for Rating {
    type Error = CacheError;

    fn try_from(value: i8) -> Result<Self> {
        Rating::new(value as i64)
    }
}

impl From<Rating> for i8 {
    fn from(rating: Rating) -> i8 {
        rating.0
    }
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted image entry. `rating` is `None` until the user rates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub name: String,
    pub rating: Option<Rating>,
}

impl ImageRecord {
    fn unrated(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rating: None,
        }
    }
}

/// A persisted folder entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub path: PathBuf,
    /// Stable id, assigned once when the folder is first registered
    pub id: String,
    pub cache_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Keyed by file name; key order is the folder's listing order
    pub images: BTreeMap<String, ImageRecord>,
}

impl FolderRecord {
    /// Image names in listing order
    pub fn image_names(&self) -> Vec<String> {
        self.images.keys().cloned().collect()
    }

    pub fn rating(&self, image: &str) -> Option<Rating> {
        self.images.get(image).and_then(|r| r.rating)
    }
}

/// The whole persisted state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheIndex {
    pub version: u32,
    pub folders: BTreeMap<PathBuf, FolderRecord>,
}

impl CacheIndex {
    fn empty() -> Self {
        Self {
            version: INDEX_VERSION,
            folders: BTreeMap::new(),
        }
    }

    /// Read an index file. A missing file is a cold start, not an error.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no cache index yet, starting empty");
                return Ok(Self::empty());
            }
            Err(e) => {
                return Err(CacheError::Corrupt {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Owner of the cache index and of the folders' cache directories.
#[derive(Debug)]
pub struct CacheStore {
    index_path: PathBuf,
    cache_root: PathBuf,
    scan_options: ScanOptions,
    index: Option<CacheIndex>,
}

impl CacheStore {
    /// Nothing is read until the first operation that needs the index.
    pub fn new(index_path: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            cache_root: cache_root.into(),
            scan_options: ScanOptions::default(),
            index: None,
        }
    }

    pub fn with_scan_options(mut self, scan_options: ScanOptions) -> Self {
        self.scan_options = scan_options;
        self
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Load the index on first use. A failed load is retried on the next
    /// call, so repairing the file takes effect without a restart.
    fn index_mut(&mut self) -> Result<&mut CacheIndex> {
        let index = match self.index.take() {
            Some(index) => index,
            None => {
                let index = CacheIndex::load(&self.index_path)?;
                info!(
                    path = %self.index_path.display(),
                    folders = index.folders.len(),
                    "cache index loaded"
                );
                index
            }
        };
        Ok(self.index.insert(index))
    }

    /// Return the record for `folder`, registering it on first sight.
    ///
    /// Registration assigns a new id, creates the cache and backup
    /// directories, records every image currently in the folder as unrated
    /// and persists the index.
    pub fn open(&mut self, folder: &Path) -> Result<&FolderRecord> {
        let key = absolute(folder)?;
        let cache_root = self.cache_root.clone();
        let scan_options = self.scan_options;

        let index = self.index_mut()?;
        if !index.folders.contains_key(&key) {
            let names = list_images(&key, scan_options).map_err(|e| CacheError::io(&key, e))?;
            let id = generate_folder_id(&key);
            let cache_dir = cache_root.join(&id);
            let backup_dir = cache_root.join(format!("{id}_backup"));

            for dir in [&cache_dir, &backup_dir] {
                fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;
            }

            let record = FolderRecord {
                path: key.clone(),
                id,
                cache_dir,
                backup_dir,
                created_at: Utc::now(),
                images: names
                    .iter()
                    .map(|name| (name.clone(), ImageRecord::unrated(name)))
                    .collect(),
            };
            info!(
                folder = %key.display(),
                id = %record.id,
                images = record.images.len(),
                "registered new folder"
            );
            index.folders.insert(key.clone(), record);
            if let Err(e) = self.persist() {
                // Only what is on disk counts as registered
                if let Some(index) = self.index.as_mut() {
                    index.folders.remove(&key);
                }
                return Err(e);
            }
        }

        self.get(&key)?.ok_or(CacheError::UnknownFolder(key))
    }

    /// Look up a folder without registering it
    pub fn get(&mut self, folder: &Path) -> Result<Option<&FolderRecord>> {
        let key = absolute(folder)?;
        Ok(self.index_mut()?.folders.get(&key))
    }

    /// All registered folders, ordered by path
    pub fn folders(&mut self) -> Result<Vec<&FolderRecord>> {
        Ok(self.index_mut()?.folders.values().collect())
    }

    /// Change a rating in memory. Call `persist()` to write it out.
    pub fn set_rating(&mut self, folder: &Path, image: &str, rating: Option<Rating>) -> Result<()> {
        let key = absolute(folder)?;
        let record = self
            .index_mut()?
            .folders
            .get_mut(&key)
            .ok_or_else(|| CacheError::UnknownFolder(key.clone()))?;
        let entry = record
            .images
            .get_mut(image)
            .ok_or_else(|| CacheError::UnknownImage {
                folder: key.clone(),
                image: image.to_string(),
            })?;
        entry.rating = rating;
        Ok(())
    }

    pub fn rating(&mut self, folder: &Path, image: &str) -> Result<Option<Rating>> {
        let key = absolute(folder)?;
        let record = self
            .index_mut()?
            .folders
            .get(&key)
            .ok_or_else(|| CacheError::UnknownFolder(key.clone()))?;
        record
            .images
            .get(image)
            .map(|r| r.rating)
            .ok_or(CacheError::UnknownImage {
                folder: key,
                image: image.to_string(),
            })
    }

    /// Re-list a registered folder: new images are added unrated, vanished
    /// ones are dropped, existing ratings are kept. Persists the index.
    pub fn rescan(&mut self, folder: &Path) -> Result<&FolderRecord> {
        let key = absolute(folder)?;
        let names = list_images(&key, self.scan_options).map_err(|e| CacheError::io(&key, e))?;

        let record = self
            .index_mut()?
            .folders
            .get_mut(&key)
            .ok_or_else(|| CacheError::UnknownFolder(key.clone()))?;
        let before = record.images.len();
        record.images.retain(|name, _| names.contains(name));
        for name in &names {
            record
                .images
                .entry(name.clone())
                .or_insert_with(|| ImageRecord::unrated(name));
        }
        debug!(
            folder = %key.display(),
            before,
            after = record.images.len(),
            "folder rescanned"
        );

        self.persist()?;
        self.get(&key)?.ok_or(CacheError::UnknownFolder(key))
    }

    /// Overwrite the index file with the in-memory index.
    ///
    /// The file is replaced atomically. Does nothing if the index has never
    /// been loaded.
    pub fn persist(&self) -> Result<()> {
        let Some(index) = self.index.as_ref() else {
            return Ok(());
        };

        let data = serde_json::to_vec_pretty(index)?;
        let dir = match self.index_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| CacheError::io(&dir, e))?;
        tmp.write_all(&data)
            .map_err(|e| CacheError::io(&self.index_path, e))?;
        tmp.persist(&self.index_path)
            .map_err(|e| CacheError::io(&self.index_path, e.error))?;
        debug!(path = %self.index_path.display(), "cache index persisted");
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .map_err(|e| CacheError::io(path, e))
    }
}

/// Generate a fresh opaque folder id (32 hex chars).
///
/// Hashes the path together with the current time and a process-wide
/// counter, so re-registering the same path after removal yields a new id.
fn generate_folder_id(path: &Path) -> String {
    use sha2::{Digest, Sha256};

    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let now = Utc::now();

    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(now.timestamp().to_le_bytes());
    hasher.update(now.timestamp_subsec_nanos().to_le_bytes());
    hasher.update(seq.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());

    let result = hasher.finalize();
    hex::encode(&result[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _root: tempfile::TempDir,
        photos: PathBuf,
        index_path: PathBuf,
        cache_root: PathBuf,
    }

    impl Fixture {
        fn new(images: &[&str]) -> Self {
            let root = tempfile::tempdir().unwrap();
            let photos = root.path().join("photos");
            fs::create_dir(&photos).unwrap();
            for name in images {
                fs::write(photos.join(name), b"x").unwrap();
            }
            Self {
                index_path: root.path().join("state").join("index.json"),
                cache_root: root.path().join("cache"),
                photos,
                _root: root,
            }
        }

        fn store(&self) -> CacheStore {
            CacheStore::new(&self.index_path, &self.cache_root)
        }
    }

    #[test]
    fn test_cold_start_creates_index() {
        let fx = Fixture::new(&["a.jpg", "b.png"]);
        assert!(!fx.index_path.exists());

        let mut store = fx.store();
        let record = store.open(&fx.photos).unwrap().clone();

        assert_eq!(record.path, fx.photos);
        assert_eq!(record.id.len(), 32);
        assert_eq!(record.image_names(), vec!["a.jpg", "b.png"]);
        assert!(record.images.values().all(|img| img.rating.is_none()));
        assert!(record.cache_dir.is_dir());
        assert!(record.backup_dir.is_dir());
        assert_eq!(record.cache_dir.parent(), Some(fx.cache_root.as_path()));

        let on_disk = CacheIndex::load(&fx.index_path).unwrap();
        assert_eq!(on_disk.folders.len(), 1);
        assert_eq!(on_disk.folders[&fx.photos], record);
    }

    #[test]
    fn test_open_is_idempotent() {
        let fx = Fixture::new(&["a.jpg", "b.png"]);
        let mut store = fx.store();
        let first = store.open(&fx.photos).unwrap().clone();

        // A new image appearing later does not change the registered set
        fs::write(fx.photos.join("c.jpeg"), b"x").unwrap();
        let second = store.open(&fx.photos).unwrap().clone();
        assert_eq!(first, second);

        // Nor does reopening through a fresh store
        let mut reloaded = fx.store();
        let third = reloaded.open(&fx.photos).unwrap().clone();
        assert_eq!(first.id, third.id);
        assert_eq!(first.images, third.images);
    }

    #[test]
    fn test_distinct_folders_get_distinct_ids() {
        let fx = Fixture::new(&["a.jpg"]);
        let other = fx.photos.parent().unwrap().join("other");
        fs::create_dir(&other).unwrap();

        let mut store = fx.store();
        let a = store.open(&fx.photos).unwrap().id.clone();
        let b = store.open(&other).unwrap().id.clone();
        assert_ne!(a, b);
        assert_eq!(store.folders().unwrap().len(), 2);
    }

    #[test]
    fn test_existing_cache_dir_is_tolerated() {
        let fx = Fixture::new(&["a.jpg"]);
        fs::create_dir_all(&fx.cache_root).unwrap();
        let mut store = fx.store();
        let record = store.open(&fx.photos).unwrap().clone();
        // Creating the same directories again is fine
        fs::create_dir_all(&record.cache_dir).unwrap();
        assert!(store.open(&fx.photos).is_ok());
    }

    #[test]
    fn test_open_missing_folder_fails_without_registering() {
        let fx = Fixture::new(&[]);
        let mut store = fx.store();
        let missing = fx.photos.join("nope");
        assert!(matches!(store.open(&missing), Err(CacheError::Io { .. })));
        assert!(store.folders().unwrap().is_empty());
    }

    #[test]
    fn test_failed_persist_does_not_register() {
        let fx = Fixture::new(&["a.jpg"]);
        let mut store = fx.store();
        assert!(store.folders().unwrap().is_empty());

        // The index directory cannot be created while a file sits in its place
        let state_dir = fx.index_path.parent().unwrap().to_path_buf();
        fs::write(&state_dir, b"not a directory").unwrap();

        assert!(matches!(store.open(&fx.photos), Err(CacheError::Io { .. })));
        assert!(matches!(store.open(&fx.photos), Err(CacheError::Io { .. })));
        assert!(store.get(&fx.photos).unwrap().is_none());
        assert!(store.folders().unwrap().is_empty());
        assert!(!fx.index_path.exists());

        fs::remove_file(&state_dir).unwrap();
        let record = store.open(&fx.photos).unwrap().clone();
        let on_disk = CacheIndex::load(&fx.index_path).unwrap();
        assert_eq!(on_disk.folders[&fx.photos], record);
    }

    #[test]
    fn test_rating_round_trip() {
        let fx = Fixture::new(&["a.jpg"]);
        let mut store = fx.store();
        store.open(&fx.photos).unwrap();

        for value in -1..=3 {
            let rating = Rating::new(value).unwrap();
            store.set_rating(&fx.photos, "a.jpg", Some(rating)).unwrap();
            assert_eq!(store.rating(&fx.photos, "a.jpg").unwrap(), Some(rating));

            store.persist().unwrap();
            let mut reloaded = fx.store();
            assert_eq!(reloaded.rating(&fx.photos, "a.jpg").unwrap(), Some(rating));
        }
    }

    #[test]
    fn test_set_rating_is_not_persisted_until_persist() {
        let fx = Fixture::new(&["a.jpg"]);
        let mut store = fx.store();
        store.open(&fx.photos).unwrap();
        store
            .set_rating(&fx.photos, "a.jpg", Some(Rating::new(2).unwrap()))
            .unwrap();

        let mut other = fx.store();
        assert_eq!(other.rating(&fx.photos, "a.jpg").unwrap(), None);
    }

    #[test]
    fn test_rating_errors() {
        let fx = Fixture::new(&["a.jpg"]);
        let mut store = fx.store();
        store.open(&fx.photos).unwrap();

        assert!(matches!(Rating::new(4), Err(CacheError::InvalidRating(4))));
        assert!(matches!(Rating::new(-2), Err(CacheError::InvalidRating(-2))));
        assert!(matches!(
            store.set_rating(&fx.photos, "zzz.jpg", None),
            Err(CacheError::UnknownImage { .. })
        ));
        assert!(matches!(
            store.rating(Path::new("/never/opened"), "a.jpg"),
            Err(CacheError::UnknownFolder(_))
        ));
    }

    #[test]
    fn test_corrupt_index_is_reported_not_replaced() {
        let fx = Fixture::new(&["a.jpg"]);
        fs::create_dir_all(fx.index_path.parent().unwrap()).unwrap();
        fs::write(&fx.index_path, b"{\"version\": 1, \"folders\": {").unwrap();

        let mut store = fx.store();
        let err = store.open(&fx.photos).unwrap_err();
        assert!(err.is_corrupt(), "unexpected error: {err}");
        // Retrying does not silently recreate the index
        assert!(store.open(&fx.photos).unwrap_err().is_corrupt());
        assert_eq!(
            fs::read(&fx.index_path).unwrap(),
            b"{\"version\": 1, \"folders\": {"
        );
        assert!(!fx.cache_root.exists());

        // Once the operator removes the file the store recovers
        fs::remove_file(&fx.index_path).unwrap();
        assert!(store.open(&fx.photos).is_ok());
    }

    #[test]
    fn test_invalid_rating_in_file_is_corrupt() {
        let fx = Fixture::new(&[]);
        fs::create_dir_all(fx.index_path.parent().unwrap()).unwrap();
        let json = format!(
            r#"{{"version":1,"folders":{{"{p}":{{"path":"{p}","id":"x","cache_dir":"/c","backup_dir":"/b","created_at":"2024-01-01T00:00:00Z","images":{{"a.jpg":{{"name":"a.jpg","rating":9}}}}}}}}}}"#,
            p = fx.photos.display()
        );
        fs::write(&fx.index_path, json).unwrap();

        assert!(CacheIndex::load(&fx.index_path).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_rescan_keeps_ratings() {
        let fx = Fixture::new(&["a.jpg", "b.png"]);
        let mut store = fx.store();
        store.open(&fx.photos).unwrap();
        store
            .set_rating(&fx.photos, "a.jpg", Some(Rating::new(3).unwrap()))
            .unwrap();

        fs::remove_file(fx.photos.join("b.png")).unwrap();
        fs::write(fx.photos.join("c.jpg"), b"x").unwrap();
        let record = store.rescan(&fx.photos).unwrap();

        assert_eq!(record.image_names(), vec!["a.jpg", "c.jpg"]);
        assert_eq!(record.rating("a.jpg"), Some(Rating::new(3).unwrap()));
        assert_eq!(record.rating("c.jpg"), None);
    }

    #[test]
    fn test_case_insensitive_scan_option() {
        let fx = Fixture::new(&["a.jpg", "B.JPG"]);
        let mut store = fx.store();
        assert_eq!(store.open(&fx.photos).unwrap().images.len(), 1);

        let fx = Fixture::new(&["a.jpg", "B.JPG"]);
        let mut store = fx.store().with_scan_options(ScanOptions {
            case_insensitive: true,
        });
        assert_eq!(store.open(&fx.photos).unwrap().images.len(), 2);
    }
}
