//! Snapshotting of file system locations

use crate::error::{Error, Result};
use crate::snapshot::FileSystemLocationSnapshot;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

/// Describes file system locations as immutable snapshots
///
/// Implementations own content hashing; consumers (such as the build cache)
/// never hash file content themselves.
pub trait Snapshotter: Send + Sync {
    /// Snapshot the location at `path`
    ///
    /// A location where nothing exists yields a `Missing` snapshot, not an
    /// error.
    fn snapshot(&self, path: &Path) -> Result<FileSystemLocationSnapshot>;
}

/// Production [`Snapshotter`] backed by the real file system
///
/// Directories are walked depth-first with children sorted by file name, so
/// two snapshots of identical content are structurally equal. Symlinks are
/// not followed and are rejected as unsupported entries.
#[derive(Debug, Clone, Default)]
pub struct FsSnapshotter;

impl FsSnapshotter {
    /// Create a new file system snapshotter
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn snapshot_file(path: &Path) -> Result<FileSystemLocationSnapshot> {
        let mut file = fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let read = file
                .read(&mut buffer)
                .map_err(|e| Error::io(e, path, "read"))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            size += read as u64;
        }
        Ok(FileSystemLocationSnapshot::RegularFile {
            path: path.to_path_buf(),
            hash: hex::encode(hasher.finalize()),
            size,
        })
    }

    fn snapshot_directory(root: &Path) -> Result<FileSystemLocationSnapshot> {
        let mut stack: Vec<(PathBuf, Vec<FileSystemLocationSnapshot>)> = Vec::new();

        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                match e.into_io_error() {
                    Some(io) => Error::io(io, &path, "walk"),
                    None => Error::unsupported(&path),
                }
            })?;

            // Entries are yielded depth-first; a shallower entry means every
            // deeper directory frame is complete.
            while stack.len() > entry.depth() {
                let Some((path, children)) = stack.pop() else {
                    break;
                };
                let finished = FileSystemLocationSnapshot::Directory { path, children };
                match stack.last_mut() {
                    Some((_, siblings)) => siblings.push(finished),
                    // The root is yielded first, so a finished directory has
                    // a parent frame while entries remain.
                    None => return Ok(finished),
                }
            }

            let file_type = entry.file_type();
            if file_type.is_dir() {
                stack.push((entry.into_path(), Vec::new()));
            } else if file_type.is_file() {
                let snapshot = Self::snapshot_file(entry.path())?;
                if let Some((_, children)) = stack.last_mut() {
                    children.push(snapshot);
                }
            } else {
                return Err(Error::unsupported(entry.path()));
            }
        }

        let mut current = None;
        while let Some((path, mut children)) = stack.pop() {
            if let Some(finished) = current.take() {
                children.push(finished);
            }
            current = Some(FileSystemLocationSnapshot::Directory { path, children });
        }
        current.ok_or_else(|| {
            Error::io(
                std::io::Error::new(std::io::ErrorKind::NotFound, "directory disappeared"),
                root,
                "walk",
            )
        })
    }
}

impl Snapshotter for FsSnapshotter {
    fn snapshot(&self, path: &Path) -> Result<FileSystemLocationSnapshot> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(path = %path.display(), "Snapshotting missing location");
                return Ok(FileSystemLocationSnapshot::Missing {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(Error::io(e, path, "metadata")),
        };

        if metadata.is_file() {
            Self::snapshot_file(path)
        } else if metadata.is_dir() {
            Self::snapshot_directory(path)
        } else {
            Err(Error::unsupported(path))
        }
    }
}
