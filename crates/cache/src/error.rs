//! Error types for the build cache

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for build cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(quarry::cache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename")
        operation: String,
    },

    /// A backend failed while loading an entry
    #[error("Could not load from {tier} cache")]
    #[diagnostic(code(quarry::cache::load))]
    Load {
        /// Which tier failed ("local" or "remote")
        tier: &'static str,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// A backend failed while storing an entry
    #[error("Could not store in {tier} cache")]
    #[diagnostic(code(quarry::cache::store))]
    Store {
        /// Which tier failed ("local" or "remote")
        tier: &'static str,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// A packed entry violates the container format
    ///
    /// Corrupt content under a trusted key is a real defect; it is never
    /// silently downgraded to a miss.
    #[error("Cached entry format error: {message}")]
    #[diagnostic(code(quarry::cache::format))]
    Format {
        /// Description of the violation
        message: String,
    },

    /// A packed entry was written by an incompatible format version
    ///
    /// Unlike [`Error::Format`], this is expected across upgrades; the
    /// controller treats it as a cache miss.
    #[error("Cached entry has unsupported format version {found} (supported: {supported})")]
    #[diagnostic(code(quarry::cache::version))]
    UnsupportedVersion {
        /// Version tag found in the entry
        found: String,
        /// Version this build can read
        supported: &'static str,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(quarry::cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(quarry::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// One or more backends failed while closing the cache
    #[error("Could not close the build cache: {}", failures.join("; "))]
    #[diagnostic(code(quarry::cache::close))]
    Close {
        /// Messages of the individual close failures
        failures: Vec<String>,
    },

    /// Snapshotting a materialized output failed
    #[error("Could not snapshot unpacked output")]
    #[diagnostic(code(quarry::cache::snapshot))]
    Snapshot {
        /// The underlying snapshot error
        #[source]
        source: quarry_snapshot::Error,
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
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Wrap a backend failure during load with the failing tier
    #[must_use]
    pub fn load(tier: &'static str, source: Self) -> Self {
        Self::Load {
            tier,
            source: Box::new(source),
        }
    }

    /// Wrap a backend failure during store with the failing tier
    #[must_use]
    pub fn store(tier: &'static str, source: Self) -> Self {
        Self::Store {
            tier,
            source: Box::new(source),
        }
    }

    /// Create a container format error
    #[must_use]
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Whether this error means "written by another format version"
    #[must_use]
    pub fn is_unsupported_version(&self) -> bool {
        matches!(self, Self::UnsupportedVersion { .. })
    }
}

impl From<quarry_snapshot::Error> for Error {
    fn from(source: quarry_snapshot::Error) -> Self {
        Self::Snapshot { source }
    }
}

/// Result type for build cache operations
pub type Result<T> = std::result::Result<T, Error>;
