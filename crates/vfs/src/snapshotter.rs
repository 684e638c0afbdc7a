//! Walks the real file system to produce snapshots

use crate::hasher::FileHasher;
use crate::snapshot::{DirectorySnapshot, FileSystemSnapshot, RegularFileSnapshot};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use workcell_core::{Error, Result};

/// Produces [`FileSystemSnapshot`]s by reading the file system.
///
/// Symbolic links are followed. Children of a directory are visited in name
/// order so the resulting hashes never depend on directory listing order.
#[derive(Debug, Default)]
pub struct DirectorySnapshotter {
    hasher: FileHasher,
}

impl DirectorySnapshotter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hasher(&self) -> &FileHasher {
        &self.hasher
    }

    /// Snapshot `path`, reusing any subtree for which `known` returns a snapshot
    pub fn snapshot<F>(&self, path: &Path, known: &F) -> Result<FileSystemSnapshot>
    where
        F: Fn(&Path) -> Option<FileSystemSnapshot>,
    {
        if let Some(snapshot) = known(path) {
            return Ok(snapshot);
        }

        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(FileSystemSnapshot::missing(path));
            }
            Err(e) => return Err(Error::fingerprinting_io(path, e)),
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if metadata.is_dir() {
            let mut entries = fs::read_dir(path)
                .map_err(|e| Error::fingerprinting_io(path, e))?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<io::Result<Vec<_>>>()
                .map_err(|e| Error::fingerprinting_io(path, e))?;
            entries.sort();

            let mut children = Vec::with_capacity(entries.len());
            for entry in entries {
                let child = self.snapshot(&entry, known)?;
                // A child deleted while walking is simply absent
                if !child.is_missing() {
                    children.push(child);
                }
            }
            Ok(FileSystemSnapshot::Directory(Arc::new(
                DirectorySnapshot::new(path.to_path_buf(), name, children),
            )))
        } else {
            let last_modified = metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|duration| duration.as_millis() as i64)
                .unwrap_or_default();
            let length = metadata.len();
            let hash = match self.hasher.hash_file(path, length) {
                Ok(hash) => hash,
                Err(Error::Fingerprinting {
                    source: Some(ref source),
                    ..
                }) if source.kind() == io::ErrorKind::NotFound => {
                    return Ok(FileSystemSnapshot::missing(path));
                }
                Err(e) => return Err(e),
            };
            Ok(FileSystemSnapshot::RegularFile(RegularFileSnapshot {
                path: path.to_path_buf(),
                name,
                hash,
                length,
                last_modified,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn nothing_known(_: &Path) -> Option<FileSystemSnapshot> {
        None
    }

    #[test]
    fn test_missing_location() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = DirectorySnapshotter::new()
            .snapshot(&temp_dir.path().join("absent"), &nothing_known)
            .unwrap();
        assert!(snapshot.is_missing());
    }

    #[test]
    fn test_directory_tree_hash_follows_content() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("src");
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("a.src"), "v1").unwrap();
        fs::write(root.join("nested/b.src"), "b").unwrap();

        let snapshotter = DirectorySnapshotter::new();
        let first = snapshotter.snapshot(&root, &nothing_known).unwrap();
        let again = snapshotter.snapshot(&root, &nothing_known).unwrap();
        assert_eq!(first.hash(), again.hash());

        fs::write(root.join("a.src"), "v2").unwrap();
        let changed = snapshotter.snapshot(&root, &nothing_known).unwrap();
        assert_ne!(first.hash(), changed.hash());
    }

    #[test]
    fn test_known_subtrees_are_not_rehashed() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("src");
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("a.src"), "a").unwrap();
        fs::write(root.join("nested/b.src"), "b").unwrap();

        let snapshotter = DirectorySnapshotter::new();
        let nested = snapshotter
            .snapshot(&root.join("nested"), &nothing_known)
            .unwrap();
        assert_eq!(snapshotter.hasher().stats().files_hashed, 1);

        let nested_path = root.join("nested");
        let known = |path: &Path| (path == nested_path).then(|| nested.clone());
        snapshotter.snapshot(&root, &known).unwrap();
        assert_eq!(snapshotter.hasher().stats().files_hashed, 2);
    }
}
