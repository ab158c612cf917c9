//! Origin metadata: provenance embedded in every packed entry

use crate::entity::CacheableEntity;
use crate::error::{Error, Result};
use crate::key::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::time::Duration;

/// Provenance record describing who produced a cache entry and how long it
/// took
///
/// Written at store time, read back unchanged at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginMetadata {
    /// Identifier of the build invocation that produced the entry
    pub build_invocation_id: String,
    /// Logical identity of the unit of work
    pub identity: String,
    /// Type tag of the unit of work
    pub entity_type: String,
    /// Hex cache key the entry was stored under
    pub cache_key: String,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    /// Original execution duration in milliseconds
    pub execution_duration_ms: u64,
    /// Version of the producer that created this entry
    pub producer_version: String,
}

impl OriginMetadata {
    /// Original execution duration
    #[must_use]
    pub fn execution_duration(&self) -> Duration {
        Duration::from_millis(self.execution_duration_ms)
    }
}

/// Writes the origin metadata header of a packed entry
///
/// Implementations own the encoding and the producer identity format; the
/// packer only calls them at a fixed point in the container layout.
pub trait OriginWriter: Send + Sync {
    /// Encode provenance for `entity` stored under `key` into `out`
    fn write(
        &self,
        entity: &CacheableEntity,
        key: &CacheKey,
        execution_duration: Duration,
        out: &mut dyn Write,
    ) -> Result<()>;
}

/// Reads the origin metadata header of a packed entry
pub trait OriginReader: Send + Sync {
    /// Decode provenance from `input`
    fn read(&self, input: &mut dyn Read) -> Result<OriginMetadata>;
}

/// JSON origin codec carrying the producer identity
///
/// The invocation id and version are fixed per build invocation and
/// injected at construction.
#[derive(Debug, Clone)]
pub struct JsonOriginCodec {
    build_invocation_id: String,
    producer_version: String,
}

impl JsonOriginCodec {
    /// Create a codec for the given build invocation
    pub fn new(build_invocation_id: impl Into<String>, producer_version: impl Into<String>) -> Self {
        Self {
            build_invocation_id: build_invocation_id.into(),
            producer_version: producer_version.into(),
        }
    }
}

impl OriginWriter for JsonOriginCodec {
    fn write(
        &self,
        entity: &CacheableEntity,
        key: &CacheKey,
        execution_duration: Duration,
        out: &mut dyn Write,
    ) -> Result<()> {
        let metadata = OriginMetadata {
            build_invocation_id: self.build_invocation_id.clone(),
            identity: entity.identity().to_string(),
            entity_type: entity.entity_type().to_string(),
            cache_key: key.to_hex(),
            created_at: Utc::now(),
            execution_duration_ms: u64::try_from(execution_duration.as_millis())
                .unwrap_or(u64::MAX),
            producer_version: self.producer_version.clone(),
        };
        let bytes = serde_json::to_vec(&metadata)
            .map_err(|e| Error::serialization(format!("Failed to encode origin metadata: {e}")))?;
        out.write_all(&bytes)
            .map_err(|e| Error::io_no_path(e, "write"))?;
        Ok(())
    }
}

impl OriginReader for JsonOriginCodec {
    fn read(&self, input: &mut dyn Read) -> Result<OriginMetadata> {
        let mut bytes = Vec::new();
        input
            .read_to_end(&mut bytes)
            .map_err(|e| Error::io_no_path(e, "read"))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::format(format!("Invalid origin metadata: {e}")))
    }
}
