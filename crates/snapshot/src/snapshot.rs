//! Snapshot descriptions of file system locations

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The kind of file system entry a snapshot describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// A regular file
    RegularFile,
    /// A directory
    Directory,
    /// Nothing exists at the location
    Missing,
}

/// Immutable description of a file system location at a point in time
///
/// Directory snapshots own their children; child paths are absolute and
/// always extend the parent path. A `Missing` snapshot is an explicit
/// "verified absent" marker, distinct from a location that was never
/// examined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FileSystemLocationSnapshot {
    /// A regular file with its content hash
    #[serde(rename = "file")]
    RegularFile {
        /// Absolute path of the file
        path: PathBuf,
        /// Lowercase hex SHA-256 of the file contents
        hash: String,
        /// File size in bytes
        size: u64,
    },
    /// A directory and its recursive contents
    Directory {
        /// Absolute path of the directory
        path: PathBuf,
        /// Child snapshots, sorted by file name
        children: Vec<FileSystemLocationSnapshot>,
    },
    /// Nothing exists at the location
    Missing {
        /// Absolute path that was examined
        path: PathBuf,
    },
}

impl FileSystemLocationSnapshot {
    /// The absolute path this snapshot describes
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::RegularFile { path, .. } | Self::Directory { path, .. } | Self::Missing { path } => {
                path
            }
        }
    }

    /// The kind of entry this snapshot describes
    #[must_use]
    pub fn kind(&self) -> FileKind {
        match self {
            Self::RegularFile { .. } => FileKind::RegularFile,
            Self::Directory { .. } => FileKind::Directory,
            Self::Missing { .. } => FileKind::Missing,
        }
    }

    /// Whether this is an explicit absence marker
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }

    /// Total number of locations described, including this one
    #[must_use]
    pub fn location_count(&self) -> usize {
        match self {
            Self::RegularFile { .. } | Self::Missing { .. } => 1,
            Self::Directory { children, .. } => {
                1 + children.iter().map(Self::location_count).sum::<usize>()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_accessor_covers_all_variants() {
        let file = FileSystemLocationSnapshot::RegularFile {
            path: PathBuf::from("/out/log.txt"),
            hash: "ab".repeat(32),
            size: 3,
        };
        let dir = FileSystemLocationSnapshot::Directory {
            path: PathBuf::from("/out/classes"),
            children: vec![],
        };
        let missing = FileSystemLocationSnapshot::Missing {
            path: PathBuf::from("/out/report"),
        };

        assert_eq!(file.path(), Path::new("/out/log.txt"));
        assert_eq!(dir.path(), Path::new("/out/classes"));
        assert_eq!(missing.path(), Path::new("/out/report"));

        assert_eq!(file.kind(), FileKind::RegularFile);
        assert_eq!(dir.kind(), FileKind::Directory);
        assert_eq!(missing.kind(), FileKind::Missing);
        assert!(missing.is_missing());
        assert!(!dir.is_missing());
    }

    #[test]
    fn location_count_is_recursive() {
        let tree = FileSystemLocationSnapshot::Directory {
            path: PathBuf::from("/out"),
            children: vec![
                FileSystemLocationSnapshot::RegularFile {
                    path: PathBuf::from("/out/a"),
                    hash: "00".repeat(32),
                    size: 1,
                },
                FileSystemLocationSnapshot::Directory {
                    path: PathBuf::from("/out/sub"),
                    children: vec![FileSystemLocationSnapshot::RegularFile {
                        path: PathBuf::from("/out/sub/b"),
                        hash: "11".repeat(32),
                        size: 2,
                    }],
                },
            ],
        };
        assert_eq!(tree.location_count(), 4);
    }

    #[test]
    fn snapshot_serde_round_trip() {
        let snapshot = FileSystemLocationSnapshot::Directory {
            path: PathBuf::from("/out"),
            children: vec![FileSystemLocationSnapshot::Missing {
                path: PathBuf::from("/out/gone"),
            }],
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: FileSystemLocationSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
