//! Scoped temp-file staging for packed entries
//!
//! Every pack and every remote download goes through a staged file that is
//! deleted on all exit paths. Backends only ever see a complete file.

use crate::error::{Error, Result};
use crate::key::CacheKey;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Hands out per-key staging files inside one scratch directory
///
/// Allocation is safe from multiple threads: every call produces a fresh
/// uniquely-named file, including for the same key.
#[derive(Debug, Clone)]
pub struct TempFileStore {
    directory: PathBuf,
}

impl TempFileStore {
    /// Create a store writing staging files under `directory`
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|e| Error::io(e, &directory, "create_dir_all"))?;
        Ok(Self { directory })
    }

    /// Allocate a fresh staging file for `key`
    ///
    /// # Errors
    ///
    /// Returns an error if the temp file cannot be created.
    pub fn allocate(&self, key: &CacheKey) -> Result<StagedEntry> {
        let hex = key.to_hex();
        let file = tempfile::Builder::new()
            .prefix(&format!("{}-", &hex[0..12]))
            .suffix(".staging")
            .tempfile_in(&self.directory)
            .map_err(|e| Error::io(e, &self.directory, "create temp"))?;
        Ok(StagedEntry { file })
    }
}

/// One staged entry file, deleted when dropped
///
/// Holding the value keeps the file alive; dropping it on any path,
/// including error returns and panics, removes it.
#[derive(Debug)]
pub struct StagedEntry {
    file: NamedTempFile,
}

impl StagedEntry {
    /// Path of the staging file
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Size of the staged content in bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the file metadata cannot be read.
    pub fn size(&self) -> Result<u64> {
        let metadata = self
            .file
            .as_file()
            .metadata()
            .map_err(|e| Error::io(e, self.path(), "metadata"))?;
        Ok(metadata.len())
    }
}
