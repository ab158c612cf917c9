//! The build cache controller
//!
//! Orchestrates the two tiers: loads try local first, then remote with a
//! best-effort write-back to local; stores pack once and offer the blob to
//! every tier that accepts pushes. The controller holds no cross-call
//! mutable state, so concurrent loads and stores from worker threads need
//! no locking here.

use crate::entity::{CacheableEntity, LoadResult};
use crate::error::{Error, Result};
use crate::handle::{BackendHandle, Tier};
use crate::key::CacheKey;
use crate::origin::{JsonOriginCodec, OriginReader, OriginWriter};
use crate::pack::{TarPacker, UnpackResult};
use crate::staging::TempFileStore;
use quarry_snapshot::{FileSystemLocationSnapshot, FsSnapshotter, Snapshotter};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Two-tier build output cache
///
/// Construct via [`BuildCacheController::new`] with explicitly injected
/// handles, or [`BuildCacheController::disabled`] when no cache was
/// configured.
pub struct BuildCacheController {
    local: BackendHandle,
    remote: BackendHandle,
    staging: Option<TempFileStore>,
    packer: TarPacker,
    origin_writer: Box<dyn OriginWriter>,
    origin_reader: Box<dyn OriginReader>,
    snapshotter: Box<dyn Snapshotter>,
    closed: bool,
}

impl BuildCacheController {
    /// Create a controller over the given tier handles
    pub fn new(
        local: BackendHandle,
        remote: BackendHandle,
        staging: TempFileStore,
        origin_writer: Box<dyn OriginWriter>,
        origin_reader: Box<dyn OriginReader>,
        snapshotter: Box<dyn Snapshotter>,
    ) -> Self {
        Self {
            local,
            remote,
            staging: Some(staging),
            packer: TarPacker::new(),
            origin_writer,
            origin_reader,
            snapshotter,
            closed: false,
        }
    }

    /// The no-op controller used when no cache backend was configured
    #[must_use]
    pub fn disabled() -> Self {
        let codec = JsonOriginCodec::new("unconfigured", env!("CARGO_PKG_VERSION"));
        Self {
            local: BackendHandle::disabled(),
            remote: BackendHandle::disabled(),
            staging: None,
            packer: TarPacker::new(),
            origin_writer: Box::new(codec.clone()),
            origin_reader: Box::new(codec),
            snapshotter: Box::new(FsSnapshotter::new()),
            closed: false,
        }
    }

    /// Whether any tier is enabled for loads or stores
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.local.can_load()
            || self.local.can_store()
            || self.remote.can_load()
            || self.remote.can_store()
    }

    /// Load the entry for `key`, materializing the entity's output trees
    ///
    /// Local is consulted first; a remote hit is staged to a temp file,
    /// unpacked, and written back to local on a best-effort basis. Entries
    /// written by another format version are treated as misses.
    ///
    /// # Errors
    ///
    /// Backend I/O failures and container integrity violations are fatal,
    /// wrapped with the name of the failing tier.
    pub fn load(&self, key: &CacheKey, entity: &CacheableEntity) -> Result<Option<LoadResult>> {
        if let Some(result) = self.load_local(key, entity)? {
            return Ok(Some(into_load_result(result)));
        }
        if !self.remote.can_load() {
            return Ok(None);
        }

        let staging = self.staging()?;
        let staged = staging.allocate(key)?;
        let result = self.load_remote(key, entity, staged.path())?;
        match result {
            Some(result) => {
                // The remote data is already valid; failing the load over a
                // write-back problem would throw away a perfectly good hit.
                if let Err(e) = self.local.maybe_store(key, staged.path()) {
                    warn!(
                        key = %key,
                        error = %e,
                        "Failed to write remote cache hit back to local cache"
                    );
                } else if self.local.can_store() {
                    debug!(key = %key, "Wrote remote cache hit back to local cache");
                }
                Ok(Some(into_load_result(result)))
            }
            None => Ok(None),
        }
    }

    /// Pack the entity's output trees and offer the entry to every tier
    /// that accepts pushes
    ///
    /// When no tier accepts pushes, no packing work happens at all.
    ///
    /// # Errors
    ///
    /// Packing failures and backend store failures are fatal; the staged
    /// file is released on every path.
    pub fn store(
        &self,
        key: &CacheKey,
        entity: &CacheableEntity,
        snapshots: &HashMap<String, FileSystemLocationSnapshot>,
        execution_duration: Duration,
    ) -> Result<()> {
        if !self.local.can_store() && !self.remote.can_store() {
            debug!(key = %key, "No cache tier accepts pushes, skipping pack");
            return Ok(());
        }

        let staging = self.staging()?;
        let staged = staging.allocate(key)?;
        let pack_result = self.packer.pack(
            staged.path(),
            key,
            entity,
            snapshots,
            execution_duration,
            self.origin_writer.as_ref(),
        )?;
        info!(
            key = %key,
            identity = %entity.identity(),
            entry_count = pack_result.entry_count,
            size = staged.size().unwrap_or(0),
            "Packed build cache entry"
        );

        self.remote
            .maybe_store(key, staged.path())
            .map_err(|e| Error::store(Tier::Remote.name(), e))?;
        self.local
            .maybe_store(key, staged.path())
            .map_err(|e| Error::store(Tier::Local.name(), e))?;
        Ok(())
    }

    /// Close both tier handles, releasing backend resources
    ///
    /// Idempotent. Both handles are closed even if one fails; failures are
    /// aggregated.
    ///
    /// # Errors
    ///
    /// Returns an aggregate error naming every handle that failed to close.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut failures = Vec::new();
        if let Err(e) = self.local.close() {
            failures.push(format!("local: {e}"));
        }
        if let Err(e) = self.remote.close() {
            failures.push(format!("remote: {e}"));
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Close { failures })
        }
    }

    fn staging(&self) -> Result<&TempFileStore> {
        self.staging
            .as_ref()
            .ok_or_else(|| Error::configuration("Build cache has no staging directory configured"))
    }

    fn load_local(
        &self,
        key: &CacheKey,
        entity: &CacheableEntity,
    ) -> Result<Option<UnpackResult>> {
        let loaded = self.local.maybe_load(key, |mut reader| {
            self.packer.unpack(
                entity,
                &mut reader,
                self.origin_reader.as_ref(),
                self.snapshotter.as_ref(),
            )
        });
        self.settle(Tier::Local, key, loaded)
    }

    /// Fetch from remote into the staged file, then unpack from it so the
    /// same bytes can be written back to local afterwards
    fn load_remote(
        &self,
        key: &CacheKey,
        entity: &CacheableEntity,
        staged: &Path,
    ) -> Result<Option<UnpackResult>> {
        let loaded = self.remote.maybe_load(key, |mut reader| {
            let mut file =
                fs::File::create(staged).map_err(|e| Error::io(e, staged, "create"))?;
            std::io::copy(&mut reader, &mut file)
                .map_err(|e| Error::io(e, staged, "download"))?;
            drop(file);

            let mut input = fs::File::open(staged).map_err(|e| Error::io(e, staged, "open"))?;
            self.packer.unpack(
                entity,
                &mut input,
                self.origin_reader.as_ref(),
                self.snapshotter.as_ref(),
            )
        });
        self.settle(Tier::Remote, key, loaded)
    }

    /// Map a tier's load outcome: version mismatches become misses, real
    /// failures get wrapped with the tier name
    fn settle(
        &self,
        tier: Tier,
        key: &CacheKey,
        loaded: Result<Option<UnpackResult>>,
    ) -> Result<Option<UnpackResult>> {
        match loaded {
            Ok(result) => Ok(result),
            Err(e) if e.is_unsupported_version() => {
                warn!(
                    key = %key,
                    tier = %tier,
                    error = %e,
                    "Ignoring cache entry written by an incompatible version"
                );
                Ok(None)
            }
            Err(e) => Err(Error::load(tier.name(), e)),
        }
    }
}

impl std::fmt::Debug for BuildCacheController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCacheController")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn into_load_result(result: UnpackResult) -> LoadResult {
    LoadResult {
        entry_count: result.entry_count,
        origin: result.origin,
        snapshots: result.snapshots,
    }
}
