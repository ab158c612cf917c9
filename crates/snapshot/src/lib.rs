//! File system snapshots for the quarry build cache
//!
//! This crate describes file system locations as immutable snapshots:
//! - A regular file with its SHA-256 content hash
//! - A directory with its recursive, name-sorted contents
//! - An explicit "missing" marker for locations where nothing exists
//!
//! Consumers such as the build cache depend only on the [`Snapshotter`]
//! trait; [`FsSnapshotter`] is the production implementation over the real
//! file system.

mod error;
mod snapshot;
mod snapshotter;

pub use error::{Error, Result};
pub use snapshot::{FileKind, FileSystemLocationSnapshot};
pub use snapshotter::{FsSnapshotter, Snapshotter};
