//! Backend handles: per-tier gatekeepers over a physical cache service
//!
//! The controller never talks to a [`BuildCacheService`] directly; it goes
//! through a handle that knows whether the tier is enabled at all, whether
//! it accepts pushes, and which tier name to blame in error chains. The
//! closed set of variants replaces any need for null-object singletons or
//! runtime type checks.

use crate::error::Result;
use crate::key::CacheKey;
use crate::service::BuildCacheService;
use std::fmt;
use std::io::Read;
use std::path::Path;
use tracing::{debug, trace};

/// The storage tier a handle fronts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// The machine-local store
    Local,
    /// The shared remote store
    Remote,
}

impl Tier {
    /// Tier name as used in error messages and log fields
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A tier's cache backend, or the disabled placeholder when none was
/// configured
pub enum BackendHandle {
    /// No backend configured for this tier; every operation is a soft miss
    Disabled,
    /// A live backend
    Enabled {
        /// Which tier this handle fronts
        tier: Tier,
        /// The physical store
        service: Box<dyn BuildCacheService>,
        /// Whether this tier accepts pushes
        push: bool,
        /// Set once [`BackendHandle::close`] has run
        closed: bool,
    },
}

impl BackendHandle {
    /// The always-disabled handle
    #[must_use]
    pub fn disabled() -> Self {
        Self::Disabled
    }

    /// A live handle over `service`
    #[must_use]
    pub fn enabled(tier: Tier, service: Box<dyn BuildCacheService>, push: bool) -> Self {
        Self::Enabled {
            tier,
            service,
            push,
            closed: false,
        }
    }

    /// Whether this tier is enabled for reads
    #[must_use]
    pub fn can_load(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    /// Whether this tier accepts pushes
    #[must_use]
    pub fn can_store(&self) -> bool {
        matches!(self, Self::Enabled { push: true, .. })
    }

    /// The tier this handle fronts, if any
    #[must_use]
    pub fn tier(&self) -> Option<Tier> {
        match self {
            Self::Disabled => None,
            Self::Enabled { tier, .. } => Some(*tier),
        }
    }

    /// Fetch the blob for `key` and run `unpack` on a hit
    ///
    /// A disabled tier and an absent key are both reported as `None`.
    /// Transport and unpack errors propagate untouched; the controller
    /// wraps them with the tier name.
    ///
    /// # Errors
    ///
    /// Returns the service's fetch error or the unpack closure's error.
    pub fn maybe_load<T>(
        &self,
        key: &CacheKey,
        unpack: impl FnOnce(Box<dyn Read + Send>) -> Result<T>,
    ) -> Result<Option<T>> {
        let Self::Enabled { tier, service, .. } = self else {
            return Ok(None);
        };
        match service.load(key)? {
            Some(reader) => {
                debug!(key = %key, tier = %tier, "Build cache hit");
                unpack(reader).map(Some)
            }
            None => {
                debug!(key = %key, tier = %tier, "Build cache miss");
                Ok(None)
            }
        }
    }

    /// Persist the packed file at `entry` under `key`, if pushes are
    /// allowed
    ///
    /// # Errors
    ///
    /// Returns the service's store error.
    pub fn maybe_store(&self, key: &CacheKey, entry: &Path) -> Result<()> {
        let Self::Enabled {
            tier,
            service,
            push: true,
            ..
        } = self
        else {
            trace!(key = %key, "Tier not enabled for push, skipping store");
            return Ok(());
        };
        service.store(key, entry)?;
        debug!(key = %key, tier = %tier, "Stored build cache entry");
        Ok(())
    }

    /// Release the backend's resources; safe to call more than once
    ///
    /// # Errors
    ///
    /// Returns the service's close error, on the first call only.
    pub fn close(&mut self) -> Result<()> {
        if let Self::Enabled {
            service, closed, ..
        } = self
            && !*closed
        {
            *closed = true;
            return service.close();
        }
        Ok(())
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("BackendHandle::Disabled"),
            Self::Enabled {
                tier, push, closed, ..
            } => f
                .debug_struct("BackendHandle")
                .field("tier", tier)
                .field("push", push)
                .field("closed", closed)
                .finish_non_exhaustive(),
        }
    }
}
