//! Error types for the snapshot crate

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for snapshot operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while reading the file system
    #[error("I/O {operation} failed: {}", path.display())]
    #[diagnostic(
        code(quarry::snapshot::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error
        path: Box<Path>,
        /// Operation that failed (e.g., "read", "metadata", "walk")
        operation: String,
    },

    /// Encountered a file system entry that cannot be snapshotted
    #[error("Unsupported file system entry: {}", path.display())]
    #[diagnostic(code(quarry::snapshot::unsupported))]
    Unsupported {
        /// Path of the offending entry
        path: Box<Path>,
    },
}

impl Error {
    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: path.as_ref().into(),
            operation: operation.into(),
        }
    }

    /// Create an unsupported-entry error
    #[must_use]
    pub fn unsupported(path: impl AsRef<Path>) -> Self {
        Self::Unsupported {
            path: path.as_ref().into(),
        }
    }
}

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, Error>;
