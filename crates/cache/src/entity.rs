//! The cacheable entity model: units of work and their output trees

use crate::error::{Error, Result};
use crate::origin::OriginMetadata;
use quarry_snapshot::FileSystemLocationSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// The kind of output a tree produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeKind {
    /// A single regular file
    File,
    /// A directory and its recursive contents
    Directory,
}

/// One named, independently addressable output of a cacheable entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTree {
    /// Name of the tree, unique within its entity
    pub name: String,
    /// Whether the tree is a single file or a directory
    pub kind: TreeKind,
    /// Absolute path the tree's output lives at (and is restored to)
    pub root: PathBuf,
}

impl OutputTree {
    /// Create a new output tree descriptor
    pub fn new(name: impl Into<String>, kind: TreeKind, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind,
            root: root.into(),
        }
    }
}

/// One unit of buildable work whose outputs can be cached
///
/// Produced by the caller per invocation; read-only to the cache. Tree
/// order is declaration order and is preserved in the packed entry.
#[derive(Debug, Clone)]
pub struct CacheableEntity {
    identity: String,
    entity_type: String,
    trees: Vec<OutputTree>,
}

impl CacheableEntity {
    /// Create a new entity
    ///
    /// # Errors
    ///
    /// Returns an error if two trees share a name or a tree name is empty.
    pub fn new(
        identity: impl Into<String>,
        entity_type: impl Into<String>,
        trees: Vec<OutputTree>,
    ) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for tree in &trees {
            if tree.name.is_empty() {
                return Err(Error::configuration("Output tree name must not be empty"));
            }
            if !seen.insert(tree.name.as_str()) {
                return Err(Error::configuration(format!(
                    "Duplicate output tree name '{}'",
                    tree.name
                )));
            }
        }
        Ok(Self {
            identity: identity.into(),
            entity_type: entity_type.into(),
            trees,
        })
    }

    /// Logical identity of the unit of work (e.g., a task path)
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Type tag of the unit of work (e.g., the task implementation)
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Declared output trees, in declaration order
    #[must_use]
    pub fn trees(&self) -> &[OutputTree] {
        &self.trees
    }

    /// Look up a declared tree by name
    #[must_use]
    pub fn tree(&self, name: &str) -> Option<&OutputTree> {
        self.trees.iter().find(|t| t.name == name)
    }
}

/// Result of a successful cache load
///
/// Contains exactly one snapshot per tree declared by the entity. Trees the
/// original execution produced no output for carry an explicit `Missing`
/// snapshot; a hole in the map would be a defect.
#[derive(Debug)]
pub struct LoadResult {
    /// Number of entries read from the packed blob
    pub entry_count: u64,
    /// Provenance of the loaded entry
    pub origin: OriginMetadata,
    /// Resulting snapshot per declared tree name
    pub snapshots: HashMap<String, FileSystemLocationSnapshot>,
}

/// Statistics returned from packing an entry, used for diagnostics only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackResult {
    /// Number of entries written to the packed blob
    pub entry_count: u64,
}
