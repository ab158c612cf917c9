//! Physical cache store boundary
//!
//! A [`BuildCacheService`] is the narrow transport interface a backend
//! handle drives: fetch a packed blob by key, persist an already-packed
//! file under a key, release resources. The wire protocol or on-disk
//! layout behind it is the implementation's business.

use crate::error::{Error, Result};
use crate::key::CacheKey;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Uniform load/store capability over one physical store
pub trait BuildCacheService: Send + Sync {
    /// Fetch the packed blob stored under `key`, or `None` on a miss
    ///
    /// Transport errors are returned, never swallowed; distinguishing a
    /// miss from a failure is the whole point of the `Option`.
    fn load(&self, key: &CacheKey) -> Result<Option<Box<dyn Read + Send>>>;

    /// Persist the already-packed file at `entry` under `key`
    ///
    /// Local implementations must commit atomically; a reader never
    /// observes a half-written entry.
    fn store(&self, key: &CacheKey, entry: &Path) -> Result<()>;

    /// Release backend resources (connections, file handles)
    ///
    /// Called at most once by the owning handle.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Local directory-backed cache store
///
/// Entries live under a two-level fan-out (`ab/cd/<hex key>`) to avoid
/// large flat directories. Stores copy into a temp sibling and commit with
/// an atomic rename, so concurrent writers of the same key are safe and
/// readers never see partial content.
#[derive(Debug, Clone)]
pub struct DirectoryCacheService {
    root: PathBuf,
}

impl DirectoryCacheService {
    /// Open (creating if needed) a store rooted at `root`
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::io(e, &root, "create_dir_all"))?;
        Ok(Self { root })
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let hex = key.to_hex();
        self.root.join(&hex[0..2]).join(&hex[2..4]).join(hex)
    }

    /// Whether an entry exists for `key`
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entry_path(key).exists()
    }
}

impl BuildCacheService for DirectoryCacheService {
    fn load(&self, key: &CacheKey) -> Result<Option<Box<dyn Read + Send>>> {
        let path = self.entry_path(key);
        match fs::File::open(&path) {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(e, &path, "open")),
        }
    }

    fn store(&self, key: &CacheKey, entry: &Path) -> Result<()> {
        let path = self.entry_path(key);
        if path.exists() {
            // Entries are immutable and content-addressed; the existing
            // entry is as good as the new one.
            debug!(key = %key, "Cache entry already present, skipping store");
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }

        // Copy to a unique temp sibling, sync, then atomically rename into
        // place. Concurrent stores of the same key each get their own temp
        // file; the last rename wins with identical content.
        let temp = tempfile::Builder::new()
            .prefix(".incoming-")
            .tempfile_in(path.parent().unwrap_or(&self.root))
            .map_err(|e| Error::io(e, &self.root, "create temp"))?;
        let mut source = fs::File::open(entry).map_err(|e| Error::io(e, entry, "open"))?;
        let mut writer = temp.as_file();
        std::io::copy(&mut source, &mut writer).map_err(|e| Error::io(e, temp.path(), "copy"))?;
        writer
            .sync_all()
            .map_err(|e| Error::io(e, temp.path(), "sync"))?;
        temp.persist(&path)
            .map_err(|e| Error::io(e.error, &path, "rename"))?;
        Ok(())
    }
}

/// In-memory cache store, for wiring a remote tier in tests and demos
#[derive(Debug, Default)]
pub struct InMemoryCacheService {
    entries: std::sync::Mutex<std::collections::HashMap<CacheKey, Vec<u8>>>,
}

impl InMemoryCacheService {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BuildCacheService for InMemoryCacheService {
    fn load(&self, key: &CacheKey) -> Result<Option<Box<dyn Read + Send>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::configuration("In-memory cache lock poisoned"))?;
        Ok(entries
            .get(key)
            .cloned()
            .map(|bytes| Box::new(std::io::Cursor::new(bytes)) as Box<dyn Read + Send>))
    }

    fn store(&self, key: &CacheKey, entry: &Path) -> Result<()> {
        let bytes = fs::read(entry).map_err(|e| Error::io(e, entry, "read"))?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::configuration("In-memory cache lock poisoned"))?;
        entries.entry(*key).or_insert(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KEY_LENGTH;
    use tempfile::TempDir;

    fn key(byte: u8) -> CacheKey {
        CacheKey::from_bytes([byte; KEY_LENGTH])
    }

    fn write_source(dir: &TempDir, content: &[u8]) -> PathBuf {
        let path = dir.path().join("packed.entry");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn store_and_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let service = DirectoryCacheService::open(tmp.path().join("cache")).unwrap();
        let source = write_source(&tmp, b"packed bytes");

        service.store(&key(1), &source).unwrap();
        assert!(service.contains(&key(1)));

        let mut reader = service.load(&key(1)).unwrap().unwrap();
        let mut loaded = Vec::new();
        reader.read_to_end(&mut loaded).unwrap();
        assert_eq!(loaded, b"packed bytes");
    }

    #[test]
    fn load_miss_returns_none() {
        let tmp = TempDir::new().unwrap();
        let service = DirectoryCacheService::open(tmp.path()).unwrap();
        assert!(service.load(&key(2)).unwrap().is_none());
    }

    #[test]
    fn entries_use_two_level_fan_out() {
        let tmp = TempDir::new().unwrap();
        let service = DirectoryCacheService::open(tmp.path()).unwrap();
        let source = write_source(&tmp, b"x");
        let k = key(0xab);
        service.store(&k, &source).unwrap();

        let hex = k.to_hex();
        let expected = tmp.path().join(&hex[0..2]).join(&hex[2..4]).join(&hex);
        assert!(expected.is_file());
    }

    #[test]
    fn store_is_idempotent_for_existing_keys() {
        let tmp = TempDir::new().unwrap();
        let service = DirectoryCacheService::open(tmp.path()).unwrap();
        let first = write_source(&tmp, b"first");
        service.store(&key(3), &first).unwrap();

        // A second store under the same key is a no-op; the entry is
        // immutable.
        let second = tmp.path().join("second.entry");
        fs::write(&second, b"second").unwrap();
        service.store(&key(3), &second).unwrap();

        let mut reader = service.load(&key(3)).unwrap().unwrap();
        let mut loaded = Vec::new();
        reader.read_to_end(&mut loaded).unwrap();
        assert_eq!(loaded, b"first");
    }

    #[test]
    fn no_temp_files_left_behind_after_store() {
        let tmp = TempDir::new().unwrap();
        let service = DirectoryCacheService::open(tmp.path()).unwrap();
        let source = write_source(&tmp, b"bytes");
        let k = key(4);
        service.store(&k, &source).unwrap();

        let parent = service.entry_path(&k);
        let entries: Vec<_> = fs::read_dir(parent.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec![k.to_hex()]);
    }

    #[test]
    fn in_memory_round_trip() {
        let tmp = TempDir::new().unwrap();
        let service = InMemoryCacheService::new();
        let source = write_source(&tmp, b"remote bytes");

        assert!(service.is_empty());
        service.store(&key(5), &source).unwrap();
        assert_eq!(service.len(), 1);

        let mut reader = service.load(&key(5)).unwrap().unwrap();
        let mut loaded = Vec::new();
        reader.read_to_end(&mut loaded).unwrap();
        assert_eq!(loaded, b"remote bytes");
        assert!(service.load(&key(6)).unwrap().is_none());
    }
}
