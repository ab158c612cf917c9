//! Packing and unpacking of build cache entries
//!
//! A packed entry is a single zstd-compressed POSIX tar stream:
//!
//! ```text
//! VERSION                   format version tag
//! METADATA                  origin metadata (encoding owned by the codec)
//! tree-<name>               present FILE tree (raw bytes)
//! tree-<name>/...           present DIRECTORY tree (recursive listing)
//! missing-tree-<name>       tree that produced no output
//! ```
//!
//! The blob carries no external index; it is read sequentially and every
//! declared tree gets exactly one tag, so the unpacker can rebuild the
//! output contract without knowing in advance which trees are present.

use crate::entity::{CacheableEntity, OutputTree, PackResult, TreeKind};
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::origin::{OriginMetadata, OriginReader, OriginWriter};
use quarry_snapshot::{FileKind, FileSystemLocationSnapshot, Snapshotter};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Container format version this build writes and reads
pub const FORMAT_VERSION: &str = "1";

const VERSION_PATH: &str = "VERSION";
const METADATA_PATH: &str = "METADATA";
const TREE_PREFIX: &str = "tree-";
const MISSING_TREE_PREFIX: &str = "missing-tree-";

/// Result of unpacking an entry, before the controller shapes it into a
/// [`crate::entity::LoadResult`]
#[derive(Debug)]
pub struct UnpackResult {
    /// Number of entries read from the blob
    pub entry_count: u64,
    /// Provenance read from the metadata header
    pub origin: OriginMetadata,
    /// Resulting snapshot per declared tree name
    pub snapshots: HashMap<String, FileSystemLocationSnapshot>,
}

/// What a tree tag carries, resolved before any I/O happens
enum TreePayload {
    Missing,
    File,
    Directory { location_count: u64 },
}

struct TreeRecord<'a> {
    tree: &'a OutputTree,
    payload: TreePayload,
}

/// Packs and unpacks build cache entries as compressed tar blobs
#[derive(Debug, Clone)]
pub struct TarPacker {
    compression_level: i32,
}

impl Default for TarPacker {
    fn default() -> Self {
        Self {
            compression_level: 3,
        }
    }
}

impl TarPacker {
    /// Create a packer with the default compression level
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pack the entity's output trees and provenance into `output`
    ///
    /// `output` must be a staged temporary file, never a final backend
    /// location: a failure aborts the whole pack without any commit.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot contradicts its tree's declared kind
    /// or any write fails.
    pub fn pack(
        &self,
        output: &Path,
        key: &CacheKey,
        entity: &CacheableEntity,
        snapshots: &HashMap<String, FileSystemLocationSnapshot>,
        execution_duration: Duration,
        origin_writer: &dyn OriginWriter,
    ) -> Result<PackResult> {
        // Resolve every tree into an explicit record before touching the
        // output, so a bad snapshot aborts with nothing written.
        let records = collect_records(entity, snapshots)?;

        let file = fs::File::create(output).map_err(|e| Error::io(e, output, "create"))?;
        let encoder = zstd::Encoder::new(file, self.compression_level)
            .map_err(|e| Error::io_no_path(e, "zstd encode"))?;
        let mut builder = tar::Builder::new(encoder);

        append_bytes(&mut builder, VERSION_PATH, FORMAT_VERSION.as_bytes())?;

        let mut origin_bytes = Vec::new();
        origin_writer.write(entity, key, execution_duration, &mut origin_bytes)?;
        append_bytes(&mut builder, METADATA_PATH, &origin_bytes)?;

        let mut entry_count = 2u64;
        for record in &records {
            let tree_path = format!("{TREE_PREFIX}{}", escape_tree_name(&record.tree.name));
            match record.payload {
                TreePayload::Missing => {
                    append_bytes(&mut builder, &format!("missing-{tree_path}"), &[])?;
                    entry_count += 1;
                }
                TreePayload::File => {
                    builder
                        .append_path_with_name(&record.tree.root, &tree_path)
                        .map_err(|e| Error::io(e, &record.tree.root, "pack file"))?;
                    entry_count += 1;
                }
                TreePayload::Directory { location_count } => {
                    builder
                        .append_dir_all(&tree_path, &record.tree.root)
                        .map_err(|e| Error::io(e, &record.tree.root, "pack directory"))?;
                    entry_count += location_count;
                }
            }
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| Error::io(e, output, "tar finalize"))?;
        encoder
            .finish()
            .map_err(|e| Error::io(e, output, "zstd finish"))?;

        debug!(
            key = %key,
            identity = %entity.identity(),
            entry_count,
            "Packed cache entry"
        );
        Ok(PackResult { entry_count })
    }

    /// Unpack an entry, materializing each declared tree at its root
    ///
    /// Materialized trees are re-described through `snapshotter`; missing
    /// tags delete any stale output and yield an explicit `Missing`
    /// snapshot. Partially unpacked files from a failed attempt are not
    /// cleaned up here; stale-output cleanup is the caller's concern.
    ///
    /// # Errors
    ///
    /// Any decode error, truncated stream, unknown tag, or kind mismatch is
    /// fatal. An entry written by a different format version is reported as
    /// [`Error::UnsupportedVersion`].
    pub fn unpack(
        &self,
        entity: &CacheableEntity,
        input: &mut dyn Read,
        origin_reader: &dyn OriginReader,
        snapshotter: &dyn Snapshotter,
    ) -> Result<UnpackResult> {
        let decoder =
            zstd::Decoder::new(input).map_err(|e| Error::io_no_path(e, "zstd decode"))?;
        let mut archive = tar::Archive::new(decoder);
        archive.set_overwrite(true);
        archive.set_preserve_permissions(true);

        let mut origin = None;
        let mut snapshots: HashMap<String, FileSystemLocationSnapshot> = HashMap::new();
        let mut materialized: Vec<&OutputTree> = Vec::new();
        let mut entry_count = 0u64;

        for (index, entry) in archive
            .entries()
            .map_err(|e| Error::format(format!("Invalid archive: {e}")))?
            .enumerate()
        {
            let mut entry =
                entry.map_err(|e| Error::format(format!("Truncated or corrupt entry: {e}")))?;
            entry_count += 1;

            let path = entry
                .path()
                .map_err(|e| Error::format(format!("Invalid entry path: {e}")))?
                .to_string_lossy()
                .into_owned();

            if index == 0 {
                if path != VERSION_PATH {
                    return Err(Error::format(format!(
                        "Expected version tag, found '{path}'"
                    )));
                }
                check_version(&mut entry)?;
                continue;
            }

            if path == METADATA_PATH {
                if origin.is_some() {
                    return Err(Error::format("Duplicate origin metadata"));
                }
                origin = Some(origin_reader.read(&mut entry)?);
            } else if let Some(escaped) = path.strip_prefix(MISSING_TREE_PREFIX) {
                let tree = declared_tree(entity, escaped)?;
                unpack_missing(tree)?;
                snapshots.insert(
                    tree.name.clone(),
                    FileSystemLocationSnapshot::Missing {
                        path: tree.root.clone(),
                    },
                );
            } else if let Some(rest) = path.strip_prefix(TREE_PREFIX) {
                let (escaped, child) = match rest.split_once('/') {
                    Some((escaped, child)) => (escaped, Some(child)),
                    None => (rest, None),
                };
                let tree = declared_tree(entity, escaped)?;
                match child.filter(|c| !c.is_empty()) {
                    None => {
                        unpack_tree_root(tree, &mut entry)?;
                        materialized.push(tree);
                    }
                    Some(child) => unpack_tree_child(tree, child, &mut entry)?,
                }
            } else {
                return Err(Error::format(format!(
                    "Cached entry format error, invalid contents: {path}"
                )));
            }
        }

        let origin = origin.ok_or_else(|| Error::format("No origin metadata was found"))?;

        // Each materialized tree is described once, after all of its entries
        // have been written out.
        for tree in materialized {
            let snapshot = snapshotter.snapshot(&tree.root)?;
            validate_kind(tree, &snapshot)?;
            snapshots.insert(tree.name.clone(), snapshot);
        }

        for tree in entity.trees() {
            if !snapshots.contains_key(&tree.name) {
                return Err(Error::format(format!(
                    "No entry for tree '{}' was found",
                    tree.name
                )));
            }
        }

        debug!(
            identity = %entity.identity(),
            entry_count,
            "Unpacked cache entry"
        );
        Ok(UnpackResult {
            entry_count,
            origin,
            snapshots,
        })
    }
}

fn collect_records<'a>(
    entity: &'a CacheableEntity,
    snapshots: &HashMap<String, FileSystemLocationSnapshot>,
) -> Result<Vec<TreeRecord<'a>>> {
    entity
        .trees()
        .iter()
        .map(|tree| {
            let payload = match snapshots.get(&tree.name) {
                None | Some(FileSystemLocationSnapshot::Missing { .. }) => TreePayload::Missing,
                Some(snapshot @ FileSystemLocationSnapshot::RegularFile { .. }) => {
                    if tree.kind != TreeKind::File {
                        return Err(Error::configuration(format!(
                            "Expected '{}' to be a directory",
                            snapshot.path().display()
                        )));
                    }
                    TreePayload::File
                }
                Some(snapshot @ FileSystemLocationSnapshot::Directory { .. }) => {
                    if tree.kind != TreeKind::Directory {
                        return Err(Error::configuration(format!(
                            "Expected '{}' to be a file",
                            snapshot.path().display()
                        )));
                    }
                    TreePayload::Directory {
                        location_count: snapshot.location_count() as u64,
                    }
                }
            };
            Ok(TreeRecord { tree, payload })
        })
        .collect()
}

fn append_bytes<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    bytes: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    builder
        .append_data(&mut header, path, bytes)
        .map_err(|e| Error::io_no_path(e, format!("pack {path}")))
}

fn check_version(entry: &mut impl Read) -> Result<()> {
    let mut found = String::new();
    entry
        .read_to_string(&mut found)
        .map_err(|e| Error::format(format!("Invalid version tag: {e}")))?;
    let found = found.trim().to_string();
    if found == FORMAT_VERSION {
        Ok(())
    } else {
        Err(Error::UnsupportedVersion {
            found,
            supported: FORMAT_VERSION,
        })
    }
}

fn declared_tree<'a>(entity: &'a CacheableEntity, escaped: &str) -> Result<&'a OutputTree> {
    let name = unescape_tree_name(escaped)?;
    entity
        .tree(&name)
        .ok_or_else(|| Error::format(format!("No tree '{name}' registered")))
}

/// A missing tag removes stale output and leaves nothing behind
fn unpack_missing(tree: &OutputTree) -> Result<()> {
    if let Some(parent) = tree.root.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
    }
    remove_stale(&tree.root)
}

fn unpack_tree_root<R: Read>(tree: &OutputTree, entry: &mut tar::Entry<'_, R>) -> Result<()> {
    let is_dir_entry = entry.header().entry_type().is_dir();
    match tree.kind {
        TreeKind::File => {
            if is_dir_entry {
                return Err(Error::format(format!(
                    "Should be a file: {}",
                    tree.name
                )));
            }
            if let Some(parent) = tree.root.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
            }
            remove_stale(&tree.root)?;
            entry
                .unpack(&tree.root)
                .map_err(|e| Error::io(e, &tree.root, "unpack"))?;
        }
        TreeKind::Directory => {
            if !is_dir_entry {
                return Err(Error::format(format!(
                    "Should be a directory: {}",
                    tree.name
                )));
            }
            remove_stale_file(&tree.root)?;
            fs::create_dir_all(&tree.root).map_err(|e| Error::io(e, &tree.root, "create_dir_all"))?;
        }
    }
    Ok(())
}

fn unpack_tree_child<R: Read>(
    tree: &OutputTree,
    child: &str,
    entry: &mut tar::Entry<'_, R>,
) -> Result<()> {
    if tree.kind != TreeKind::Directory {
        return Err(Error::format(format!(
            "Expected '{}' to be a single regular file",
            tree.name
        )));
    }
    let relative = sanitize_relative_path(child)?;
    let destination = tree.root.join(relative);
    if entry.header().entry_type().is_dir() {
        fs::create_dir_all(&destination)
            .map_err(|e| Error::io(e, &destination, "create_dir_all"))?;
    } else {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }
        entry
            .unpack(&destination)
            .map_err(|e| Error::io(e, &destination, "unpack"))?;
    }
    Ok(())
}

fn validate_kind(tree: &OutputTree, snapshot: &FileSystemLocationSnapshot) -> Result<()> {
    let expected = match tree.kind {
        TreeKind::File => FileKind::RegularFile,
        TreeKind::Directory => FileKind::Directory,
    };
    if snapshot.kind() == expected {
        Ok(())
    } else {
        Err(Error::format(format!(
            "Tree '{}' declared {:?} but unpacked to {:?}",
            tree.name,
            tree.kind,
            snapshot.kind()
        )))
    }
}

fn remove_stale(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => {
            fs::remove_dir_all(path).map_err(|e| Error::io(e, path, "remove_dir_all"))
        }
        Ok(_) => fs::remove_file(path).map_err(|e| Error::io(e, path, "remove_file")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(e, path, "metadata")),
    }
}

fn remove_stale_file(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if !metadata.is_dir() => {
            fs::remove_file(path).map_err(|e| Error::io(e, path, "remove_file"))
        }
        _ => Ok(()),
    }
}

/// Reject entry paths that would escape the tree root
fn sanitize_relative_path(child: &str) -> Result<PathBuf> {
    let path = Path::new(child);
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(Error::format(format!(
                    "Cached entry format error, invalid contents: {child}"
                )));
            }
        }
    }
    Ok(path.to_path_buf())
}

/// Escape a tree name so it cannot contain path separators in the archive
fn escape_tree_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn unescape_tree_name(escaped: &str) -> Result<String> {
    let mut name = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            name.push(c);
            continue;
        }
        let (high, low) = (chars.next(), chars.next());
        let code = match (high, low) {
            (Some(h), Some(l)) => u8::from_str_radix(&format!("{h}{l}"), 16).ok(),
            _ => None,
        };
        match code {
            Some(byte) => name.push(byte as char),
            None => {
                return Err(Error::format(format!(
                    "Invalid escape in tree name: {escaped}"
                )));
            }
        }
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KEY_LENGTH;
    use crate::origin::JsonOriginCodec;
    use quarry_snapshot::FsSnapshotter;
    use tempfile::TempDir;

    fn codec() -> JsonOriginCodec {
        JsonOriginCodec::new("test-invocation", "0.0.0-test")
    }

    fn key() -> CacheKey {
        CacheKey::from_bytes([9; KEY_LENGTH])
    }

    fn snapshot_trees(
        entity: &CacheableEntity,
    ) -> HashMap<String, FileSystemLocationSnapshot> {
        let snapshotter = FsSnapshotter::new();
        entity
            .trees()
            .iter()
            .map(|t| (t.name.clone(), snapshotter.snapshot(&t.root).unwrap()))
            .collect()
    }

    #[test]
    fn escape_round_trip() {
        for name in ["plain", "with/slash", "with%percent", "mix/%/x"] {
            let escaped = escape_tree_name(name);
            assert!(!escaped.contains('/'), "escaped: {escaped}");
            assert_eq!(unescape_tree_name(&escaped).unwrap(), name);
        }
    }

    #[test]
    fn unescape_rejects_dangling_escape() {
        assert!(unescape_tree_name("bad%2").is_err());
        assert!(unescape_tree_name("bad%zz").is_err());
    }

    #[test]
    fn sanitize_rejects_traversal() {
        assert!(sanitize_relative_path("ok/nested.txt").is_ok());
        assert!(sanitize_relative_path("../escape").is_err());
        assert!(sanitize_relative_path("/absolute").is_err());
        assert!(sanitize_relative_path("a/../b").is_err());
    }

    #[test]
    fn pack_unpack_round_trip_with_present_and_missing_trees() {
        let work = TempDir::new().unwrap();
        let classes = work.path().join("classes");
        fs::create_dir_all(classes.join("com/app")).unwrap();
        fs::write(classes.join("com/app/Main.class"), b"bytecode").unwrap();
        fs::write(classes.join("manifest.txt"), b"manifest").unwrap();
        fs::write(classes.join("com/app/Util.class"), b"util").unwrap();
        let log = work.path().join("log.txt");

        let entity = CacheableEntity::new(
            ":app:compile",
            "Compile",
            vec![
                OutputTree::new("classes", TreeKind::Directory, &classes),
                OutputTree::new("log", TreeKind::File, &log),
            ],
        )
        .unwrap();
        let snapshots = snapshot_trees(&entity);
        assert!(snapshots["log"].is_missing());

        let blob = work.path().join("entry.blob");
        let packer = TarPacker::new();
        let pack_result = packer
            .pack(
                &blob,
                &key(),
                &entity,
                &snapshots,
                Duration::from_millis(321),
                &codec(),
            )
            .unwrap();
        // VERSION + METADATA + 6 directory locations (root, com, com/app,
        // 2 class files, manifest) + 1 missing tag
        assert_eq!(pack_result.entry_count, 9);

        // Restore into a fresh location
        let restore = TempDir::new().unwrap();
        let restored_classes = restore.path().join("classes");
        let restored_log = restore.path().join("log.txt");
        let restored_entity = CacheableEntity::new(
            ":app:compile",
            "Compile",
            vec![
                OutputTree::new("classes", TreeKind::Directory, &restored_classes),
                OutputTree::new("log", TreeKind::File, &restored_log),
            ],
        )
        .unwrap();

        let mut input = fs::File::open(&blob).unwrap();
        let result = packer
            .unpack(&restored_entity, &mut input, &codec(), &FsSnapshotter::new())
            .unwrap();

        assert_eq!(result.entry_count, pack_result.entry_count);
        assert_eq!(result.origin.identity, ":app:compile");
        assert_eq!(result.origin.execution_duration_ms, 321);
        assert_eq!(
            fs::read(restored_classes.join("com/app/Main.class")).unwrap(),
            b"bytecode"
        );
        assert_eq!(
            fs::read(restored_classes.join("manifest.txt")).unwrap(),
            b"manifest"
        );
        assert!(!restored_log.exists());
        assert!(result.snapshots["log"].is_missing());
        assert_eq!(result.snapshots.len(), 2);

        // Restored content hashes must match the originals.
        let original = &snapshots["classes"];
        let restored = &result.snapshots["classes"];
        let FileSystemLocationSnapshot::Directory { children: a, .. } = original else {
            panic!("expected directory");
        };
        let FileSystemLocationSnapshot::Directory { children: b, .. } = restored else {
            panic!("expected directory");
        };
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn file_tree_round_trip_preserves_bytes() {
        let work = TempDir::new().unwrap();
        let report = work.path().join("report.bin");
        fs::write(&report, b"\x00\x01binary\xff").unwrap();

        let entity = CacheableEntity::new(
            ":app:report",
            "Report",
            vec![OutputTree::new("report", TreeKind::File, &report)],
        )
        .unwrap();
        let snapshots = snapshot_trees(&entity);

        let blob = work.path().join("entry.blob");
        let packer = TarPacker::new();
        packer
            .pack(
                &blob,
                &key(),
                &entity,
                &snapshots,
                Duration::from_secs(1),
                &codec(),
            )
            .unwrap();

        // Overwrite the original so restoration is observable.
        fs::write(&report, b"stale").unwrap();
        let mut input = fs::File::open(&blob).unwrap();
        let result = packer
            .unpack(&entity, &mut input, &codec(), &FsSnapshotter::new())
            .unwrap();
        assert_eq!(fs::read(&report).unwrap(), b"\x00\x01binary\xff");
        assert_eq!(result.entry_count, 3);
    }

    #[test]
    fn missing_tag_removes_stale_output() {
        let work = TempDir::new().unwrap();
        let out = work.path().join("out.txt");

        let entity = CacheableEntity::new(
            ":app:gen",
            "Generate",
            vec![OutputTree::new("out", TreeKind::File, &out)],
        )
        .unwrap();
        // Nothing produced: snapshot map is empty.
        let blob = work.path().join("entry.blob");
        let packer = TarPacker::new();
        packer
            .pack(
                &blob,
                &key(),
                &entity,
                &HashMap::new(),
                Duration::ZERO,
                &codec(),
            )
            .unwrap();

        // A stale file from a previous execution must be deleted.
        fs::write(&out, b"stale").unwrap();
        let mut input = fs::File::open(&blob).unwrap();
        let result = packer
            .unpack(&entity, &mut input, &codec(), &FsSnapshotter::new())
            .unwrap();
        assert!(!out.exists());
        assert!(result.snapshots["out"].is_missing());
    }

    #[test]
    fn kind_mismatch_is_an_integrity_error() {
        let work = TempDir::new().unwrap();
        let dir = work.path().join("output");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("inner.txt"), b"x").unwrap();

        // Pack as a directory tree...
        let packed_entity = CacheableEntity::new(
            ":app:x",
            "X",
            vec![OutputTree::new("output", TreeKind::Directory, &dir)],
        )
        .unwrap();
        let snapshots = snapshot_trees(&packed_entity);
        let blob = work.path().join("entry.blob");
        let packer = TarPacker::new();
        packer
            .pack(
                &blob,
                &key(),
                &packed_entity,
                &snapshots,
                Duration::ZERO,
                &codec(),
            )
            .unwrap();

        // ...then declare it as a FILE tree on the way back.
        let restore = TempDir::new().unwrap();
        let mismatched = CacheableEntity::new(
            ":app:x",
            "X",
            vec![OutputTree::new(
                "output",
                TreeKind::File,
                restore.path().join("output"),
            )],
        )
        .unwrap();
        let mut input = fs::File::open(&blob).unwrap();
        let err = packer
            .unpack(&mismatched, &mut input, &codec(), &FsSnapshotter::new())
            .unwrap_err();
        assert!(matches!(err, Error::Format { .. }), "got {err:?}");
    }

    #[test]
    fn pack_rejects_snapshot_contradicting_declared_kind() {
        let work = TempDir::new().unwrap();
        let file = work.path().join("file.txt");
        fs::write(&file, b"x").unwrap();

        let entity = CacheableEntity::new(
            ":app:x",
            "X",
            vec![OutputTree::new("out", TreeKind::Directory, &file)],
        )
        .unwrap();
        let snapshots = snapshot_trees(&entity);
        let blob = work.path().join("entry.blob");
        let err = TarPacker::new()
            .pack(&blob, &key(), &entity, &snapshots, Duration::ZERO, &codec())
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn unknown_entry_name_is_rejected() {
        let work = TempDir::new().unwrap();
        let blob = work.path().join("entry.blob");

        // Hand-roll a blob with a foreign entry after the version tag.
        let file = fs::File::create(&blob).unwrap();
        let encoder = zstd::Encoder::new(file, 3).unwrap();
        let mut builder = tar::Builder::new(encoder);
        append_bytes(&mut builder, VERSION_PATH, FORMAT_VERSION.as_bytes()).unwrap();
        append_bytes(&mut builder, "intruder", b"boo").unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let entity = CacheableEntity::new(":app:x", "X", vec![]).unwrap();
        let mut input = fs::File::open(&blob).unwrap();
        let err = TarPacker::new()
            .unpack(&entity, &mut input, &codec(), &FsSnapshotter::new())
            .unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn version_mismatch_is_reported_as_unsupported() {
        let work = TempDir::new().unwrap();
        let blob = work.path().join("entry.blob");

        let file = fs::File::create(&blob).unwrap();
        let encoder = zstd::Encoder::new(file, 3).unwrap();
        let mut builder = tar::Builder::new(encoder);
        append_bytes(&mut builder, VERSION_PATH, b"99").unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let entity = CacheableEntity::new(":app:x", "X", vec![]).unwrap();
        let mut input = fs::File::open(&blob).unwrap();
        let err = TarPacker::new()
            .unpack(&entity, &mut input, &codec(), &FsSnapshotter::new())
            .unwrap_err();
        assert!(err.is_unsupported_version());
    }

    #[test]
    fn missing_metadata_is_an_integrity_error() {
        let work = TempDir::new().unwrap();
        let blob = work.path().join("entry.blob");

        let file = fs::File::create(&blob).unwrap();
        let encoder = zstd::Encoder::new(file, 3).unwrap();
        let mut builder = tar::Builder::new(encoder);
        append_bytes(&mut builder, VERSION_PATH, FORMAT_VERSION.as_bytes()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let entity = CacheableEntity::new(":app:x", "X", vec![]).unwrap();
        let mut input = fs::File::open(&blob).unwrap();
        let err = TarPacker::new()
            .unpack(&entity, &mut input, &codec(), &FsSnapshotter::new())
            .unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn truncated_blob_is_an_integrity_error() {
        let work = TempDir::new().unwrap();
        let file = work.path().join("out.txt");
        fs::write(&file, vec![b'x'; 128 * 1024]).unwrap();
        let entity = CacheableEntity::new(
            ":app:x",
            "X",
            vec![OutputTree::new("out", TreeKind::File, &file)],
        )
        .unwrap();
        let snapshots = snapshot_trees(&entity);

        let blob = work.path().join("entry.blob");
        TarPacker::new()
            .pack(&blob, &key(), &entity, &snapshots, Duration::ZERO, &codec())
            .unwrap();

        let bytes = fs::read(&blob).unwrap();
        let mut truncated = &bytes[..bytes.len() / 2];
        let result = TarPacker::new().unpack(
            &entity,
            &mut truncated,
            &codec(),
            &FsSnapshotter::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn tree_names_with_separators_survive() {
        let work = TempDir::new().unwrap();
        let file = work.path().join("data.txt");
        fs::write(&file, b"payload").unwrap();

        let entity = CacheableEntity::new(
            ":app:x",
            "X",
            vec![OutputTree::new("reports/unit%1", TreeKind::File, &file)],
        )
        .unwrap();
        let snapshots = snapshot_trees(&entity);
        let blob = work.path().join("entry.blob");
        let packer = TarPacker::new();
        packer
            .pack(&blob, &key(), &entity, &snapshots, Duration::ZERO, &codec())
            .unwrap();

        fs::remove_file(&file).unwrap();
        let mut input = fs::File::open(&blob).unwrap();
        let result = packer
            .unpack(&entity, &mut input, &codec(), &FsSnapshotter::new())
            .unwrap();
        assert_eq!(fs::read(&file).unwrap(), b"payload");
        assert!(result.snapshots.contains_key("reports/unit%1"));
    }
}
