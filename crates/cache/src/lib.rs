//! Two-tier build output cache
//!
//! Stores the declared output trees of build work (task or action
//! executions) under a content-derived key, as zstd-compressed tar entries,
//! and restores them on a hit so the work can be skipped.
//!
//! Two tiers are supported: a local directory store and an optional remote
//! store behind a caller-provided transport. Loads consult local first;
//! remote hits are written back to local so the next build on the same
//! machine stays fast. Each tier independently controls whether it accepts
//! pushes.
//!
//! [`BuildCacheController`] is the entry point; build it from a
//! [`CacheConfiguration`] or wire the [`BackendHandle`]s directly.
//!
//! ```no_run
//! use quarry_cache::{CacheConfiguration, CacheKey, JsonOriginCodec};
//!
//! # fn main() -> quarry_cache::Result<()> {
//! let config = CacheConfiguration::default();
//! let origin = JsonOriginCodec::new("build-20240612-1", env!("CARGO_PKG_VERSION"));
//! let controller = config.build_controller(None, origin)?;
//! assert!(controller.is_enabled());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod entity;
pub mod error;
pub mod handle;
pub mod key;
pub mod origin;
pub mod pack;
pub mod service;
pub mod staging;

pub use config::{
    cache_dir_from_inputs, CacheConfiguration, CacheDirInputs, LocalCacheConfig, RemoteCacheConfig,
};
pub use controller::BuildCacheController;
pub use entity::{CacheableEntity, LoadResult, OutputTree, PackResult, TreeKind};
pub use error::{Error, Result};
pub use handle::{BackendHandle, Tier};
pub use key::{CacheKey, KEY_LENGTH};
pub use origin::{JsonOriginCodec, OriginMetadata, OriginReader, OriginWriter};
pub use pack::TarPacker;
pub use service::{BuildCacheService, DirectoryCacheService, InMemoryCacheService};
pub use staging::{StagedEntry, TempFileStore};
