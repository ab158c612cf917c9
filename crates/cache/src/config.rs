//! Build cache configuration
//!
//! Deserializable settings for both tiers plus the wiring that turns them
//! into a [`BuildCacheController`]. Tier enablement and push permission are
//! independent toggles; a remote transport is injected by the caller since
//! this crate does not speak any particular wire protocol.

use crate::controller::BuildCacheController;
use crate::error::{Error, Result};
use crate::handle::{BackendHandle, Tier};
use crate::origin::JsonOriginCodec;
use crate::service::{BuildCacheService, DirectoryCacheService};
use crate::staging::TempFileStore;
use quarry_snapshot::FsSnapshotter;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Settings for the whole build cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfiguration {
    /// Local directory tier
    pub local: LocalCacheConfig,
    /// Remote tier
    pub remote: RemoteCacheConfig,
}

/// Settings for the local directory tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LocalCacheConfig {
    /// Whether the local tier participates at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether new entries are written to the local tier
    #[serde(default = "default_true")]
    pub push: bool,
    /// Cache directory override; resolved from the environment when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            push: true,
            directory: None,
        }
    }
}

/// Settings for the remote tier
///
/// Pushes default to off: most machines only read from a shared cache,
/// while CI populates it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RemoteCacheConfig {
    /// Whether the remote tier participates at all
    pub enabled: bool,
    /// Whether new entries are pushed to the remote tier
    pub push: bool,
}

fn default_true() -> bool {
    true
}

/// Environment inputs consulted when no explicit cache directory is
/// configured, split out so resolution is testable without mutating the
/// process environment
#[derive(Debug, Clone, Default)]
pub struct CacheDirInputs {
    /// `QUARRY_CACHE_DIR`
    pub quarry_cache_dir: Option<PathBuf>,
    /// `XDG_CACHE_HOME`
    pub xdg_cache_home: Option<PathBuf>,
    /// Platform cache directory, normally from [`dirs::cache_dir`]
    pub platform_cache_dir: Option<PathBuf>,
    /// Last-resort scratch directory
    pub temp_dir: PathBuf,
}

impl CacheDirInputs {
    /// Capture the current process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            quarry_cache_dir: std::env::var_os("QUARRY_CACHE_DIR").map(PathBuf::from),
            xdg_cache_home: std::env::var_os("XDG_CACHE_HOME").map(PathBuf::from),
            platform_cache_dir: dirs::cache_dir(),
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// Resolve the build cache directory from environment inputs
///
/// Precedence: `QUARRY_CACHE_DIR` as-is, then `XDG_CACHE_HOME`, then the
/// platform cache directory, then the temp directory, each suffixed with
/// `quarry/build-cache`.
#[must_use]
pub fn cache_dir_from_inputs(inputs: &CacheDirInputs) -> PathBuf {
    if let Some(dir) = &inputs.quarry_cache_dir {
        return dir.clone();
    }
    let base = inputs
        .xdg_cache_home
        .clone()
        .or_else(|| inputs.platform_cache_dir.clone())
        .unwrap_or_else(|| inputs.temp_dir.clone());
    base.join("quarry").join("build-cache")
}

impl CacheConfiguration {
    /// Wire a controller from these settings
    ///
    /// `remote_service` supplies the transport for the remote tier; passing
    /// `None` while `remote.enabled` is set is a configuration error. The
    /// `origin` codec stamps and reads entry provenance.
    ///
    /// # Errors
    ///
    /// Returns an error for an enabled remote tier without a transport, or
    /// when the cache directories cannot be created.
    pub fn build_controller(
        &self,
        remote_service: Option<Box<dyn BuildCacheService>>,
        origin: JsonOriginCodec,
    ) -> Result<BuildCacheController> {
        let remote = match (self.remote.enabled, remote_service) {
            (false, _) => BackendHandle::disabled(),
            (true, None) => {
                return Err(Error::configuration(
                    "Remote cache is enabled but no transport was provided",
                ));
            }
            (true, Some(service)) => BackendHandle::enabled(Tier::Remote, service, self.remote.push),
        };

        if !self.local.enabled && !remote.can_load() {
            debug!("Build cache disabled by configuration");
            return Ok(BuildCacheController::disabled());
        }

        let directory = self
            .local
            .directory
            .clone()
            .unwrap_or_else(|| cache_dir_from_inputs(&CacheDirInputs::from_env()));
        debug!(directory = %directory.display(), "Using build cache directory");

        let local = if self.local.enabled {
            let service = DirectoryCacheService::open(directory.join("entries"))?;
            BackendHandle::enabled(Tier::Local, Box::new(service), self.local.push)
        } else {
            BackendHandle::disabled()
        };
        let staging = TempFileStore::new(directory.join("staging"))?;

        Ok(BuildCacheController::new(
            local,
            remote,
            staging,
            Box::new(origin.clone()),
            Box::new(origin),
            Box::new(FsSnapshotter::new()),
        ))
    }
}
