//! Deterministic tar.gz layout of build cache entries
//!
//! An entry holds a `METADATA` manifest followed by one `tree-<property>`
//! per existing output and one empty `missing-tree-<property>` marker per
//! output that did not exist when the entry was stored.

use crate::history::OriginMetadata;
use crate::key::CacheKey;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{EntryType, Header};
use walkdir::WalkDir;
use workcell_core::{
    Error, HashCode, Result, CACHE_METADATA_PATH, CACHE_MISSING_TREE_PREFIX, CACHE_TREE_PREFIX,
};
use workcell_utils::{delete_recursively, ensure_parent_dir};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeKind {
    File,
    Directory,
}

/// One declared output location packed into or restored from an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTree {
    pub name: String,
    pub root: PathBuf,
    pub kind: TreeKind,
}

impl OutputTree {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, kind: TreeKind) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            kind,
        }
    }
}

/// Manifest stored as the first member of every entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManifest {
    pub origin: OriginMetadata,
    /// Recorded fingerprint hash of each output property
    pub output_hashes: BTreeMap<String, HashCode>,
}

/// Pack the given outputs into a gzip-compressed tar archive
pub fn pack(trees: &[OutputTree], manifest: &CacheManifest) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(true);

    let metadata = serde_json::to_vec_pretty(manifest)?;
    let mut header = file_header(metadata.len() as u64, false);
    builder
        .append_data(&mut header, CACHE_METADATA_PATH, metadata.as_slice())
        .map_err(|e| Error::file_system(CACHE_METADATA_PATH, "append cache metadata", e))?;

    let mut sorted: Vec<&OutputTree> = trees.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    for tree in sorted {
        let metadata = match fs::metadata(&tree.root) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let marker = format!("{CACHE_MISSING_TREE_PREFIX}{}", tree.name);
                let mut header = file_header(0, false);
                builder
                    .append_data(&mut header, &marker, io::empty())
                    .map_err(|e| Error::file_system(&tree.root, "append missing tree marker", e))?;
                continue;
            }
            Err(e) => return Err(Error::file_system(&tree.root, "read output metadata", e)),
        };

        let archive_root = format!("{CACHE_TREE_PREFIX}{}", tree.name);
        match (tree.kind, metadata.is_dir()) {
            (TreeKind::File, false) => append_file(&mut builder, &tree.root, &archive_root, &metadata)?,
            (TreeKind::Directory, true) => append_directory(&mut builder, &tree.root, &archive_root)?,
            (TreeKind::File, true) => {
                return Err(Error::validation(
                    "build cache",
                    &tree.name,
                    format!("expected a file at {} but found a directory", tree.root.display()),
                ))
            }
            (TreeKind::Directory, false) => {
                return Err(Error::validation(
                    "build cache",
                    &tree.name,
                    format!("expected a directory at {} but found a file", tree.root.display()),
                ))
            }
        }
    }

    builder
        .finish()
        .map_err(|e| Error::file_system(CACHE_METADATA_PATH, "finish cache archive", e))?;
    let tar_bytes = builder
        .into_inner()
        .map_err(|e| Error::file_system(CACHE_METADATA_PATH, "finish cache archive", e))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&tar_bytes)
        .and_then(|_| encoder.finish())
        .map_err(|e| Error::file_system(CACHE_METADATA_PATH, "compress cache archive", e))
}

fn file_header(size: u64, executable: bool) -> Header {
    let mut header = Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_entry_type(EntryType::Regular);
    header.set_mode(if executable { 0o755 } else { 0o644 });
    header.set_size(size);
    header
}

fn append_file(
    builder: &mut tar::Builder<Vec<u8>>,
    path: &Path,
    archive_path: &str,
    metadata: &Metadata,
) -> Result<()> {
    let mut header = file_header(metadata.len(), is_executable(metadata));
    let file = File::open(path).map_err(|e| Error::file_system(path, "open output file", e))?;
    builder
        .append_data(&mut header, archive_path, file)
        .map_err(|e| Error::file_system(path, "append output file", e))
}

fn append_directory(
    builder: &mut tar::Builder<Vec<u8>>,
    root: &Path,
    archive_root: &str,
) -> Result<()> {
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::file_system(path, "walk output directory", io::Error::other(e.to_string()))
        })?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::configuration(format!("output outside of its root: {e}")))?;
        let mut archive_path = archive_root.to_string();
        for component in relative.components() {
            archive_path.push('/');
            archive_path.push_str(&component.as_os_str().to_string_lossy());
        }

        let metadata = entry
            .metadata()
            .map_err(|e| Error::file_system(entry.path(), "read output metadata", io::Error::other(e.to_string())))?;
        if metadata.is_dir() {
            let mut header = Header::new_gnu();
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder
                .append_data(&mut header, format!("{archive_path}/"), io::empty())
                .map_err(|e| Error::file_system(entry.path(), "append output directory", e))?;
        } else {
            append_file(builder, entry.path(), &archive_path, &metadata)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &Metadata) -> bool {
    false
}

/// Restore an entry into the given output locations.
///
/// Existing content at every output location is removed first. Any
/// structural problem with the archive is reported as a corrupt entry.
pub fn unpack(key: &CacheKey, reader: impl Read, trees: &[OutputTree]) -> Result<CacheManifest> {
    let corrupt = |reason: String| Error::cache_corruption(key.to_string(), reason);

    let by_name: BTreeMap<&str, &OutputTree> =
        trees.iter().map(|tree| (tree.name.as_str(), tree)).collect();
    for tree in trees {
        delete_recursively(&tree.root)?;
    }

    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    archive.set_preserve_mtime(false);
    let mut manifest: Option<CacheManifest> = None;
    let mut seen = BTreeSet::new();

    let entries = archive
        .entries()
        .map_err(|e| corrupt(format!("unreadable archive: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| corrupt(format!("unreadable archive member: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| corrupt(format!("invalid member path: {e}")))?
            .into_owned();
        let mut components = path.components();
        let first = match components.next() {
            Some(Component::Normal(first)) => first.to_string_lossy().into_owned(),
            _ => return Err(corrupt(format!("invalid member path {}", path.display()))),
        };
        let rest: PathBuf = components.as_path().to_path_buf();

        if first == CACHE_METADATA_PATH {
            let mut content = String::new();
            entry
                .read_to_string(&mut content)
                .map_err(|e| corrupt(format!("unreadable metadata: {e}")))?;
            manifest = Some(
                serde_json::from_str(&content)
                    .map_err(|e| corrupt(format!("invalid metadata: {e}")))?,
            );
        } else if let Some(name) = first.strip_prefix(CACHE_MISSING_TREE_PREFIX) {
            if !by_name.contains_key(name) {
                return Err(corrupt(format!("unknown output property '{name}'")));
            }
            seen.insert(name.to_string());
        } else if let Some(name) = first.strip_prefix(CACHE_TREE_PREFIX) {
            let tree = by_name
                .get(name)
                .ok_or_else(|| corrupt(format!("unknown output property '{name}'")))?;
            if rest.components().any(|c| !matches!(c, Component::Normal(_))) {
                return Err(corrupt(format!("member escapes its tree: {}", path.display())));
            }
            let target = if rest.as_os_str().is_empty() {
                tree.root.clone()
            } else {
                tree.root.join(&rest)
            };
            ensure_parent_dir(&target)?;
            entry
                .unpack(&target)
                .map_err(|e| corrupt(format!("cannot restore {}: {e}", target.display())))?;
            seen.insert(name.to_string());
        } else {
            return Err(corrupt(format!("unexpected member {}", path.display())));
        }
    }

    let manifest = manifest.ok_or_else(|| corrupt("missing metadata".to_string()))?;
    for tree in trees {
        if !seen.contains(&tree.name) {
            return Err(corrupt(format!("no content for output property '{}'", tree.name)));
        }
    }
    Ok(manifest)
}
