//! Normalized fingerprints of file collections

use crate::snapshot::{directory_signature, file_signature, missing_signature, FileSystemSnapshot};
use crate::store::SnapshotStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use workcell_core::{HashCode, Hasher, Result};

/// How paths participate in a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NormalizationStrategy {
    /// Full absolute path and content
    AbsolutePath,
    /// Path relative to the declared root and content
    RelativePath,
    /// File name and content
    NameOnly,
    /// Content of regular files only, independent of location and order
    IgnoredPath,
    /// Structure only: relative paths and entry kinds, no content
    None,
}

impl NormalizationStrategy {
    fn tag(self) -> &'static str {
        match self {
            NormalizationStrategy::AbsolutePath => "absolute",
            NormalizationStrategy::RelativePath => "relative",
            NormalizationStrategy::NameOnly => "name-only",
            NormalizationStrategy::IgnoredPath => "ignored-path",
            NormalizationStrategy::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    RegularFile,
    Directory,
    Missing,
}

impl From<&FileSystemSnapshot> for FileKind {
    fn from(snapshot: &FileSystemSnapshot) -> Self {
        match snapshot {
            FileSystemSnapshot::Missing { .. } => FileKind::Missing,
            FileSystemSnapshot::RegularFile(_) => FileKind::RegularFile,
            FileSystemSnapshot::Directory(_) => FileKind::Directory,
        }
    }
}

/// One entry of a fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintEntry {
    pub absolute_path: PathBuf,
    pub normalized_path: String,
    pub kind: FileKind,
    pub hash: HashCode,
}

/// Fingerprint of a set of file system roots under one normalization strategy.
///
/// Two fingerprints are equal exactly when their combined hashes are equal.
#[derive(Clone, Serialize, Deserialize)]
pub struct FileCollectionFingerprint {
    strategy: NormalizationStrategy,
    entries: Vec<FingerprintEntry>,
    hash: HashCode,
}

impl FileCollectionFingerprint {
    pub fn empty(strategy: NormalizationStrategy) -> Self {
        Self::from_entries(strategy, Vec::new())
    }

    fn from_entries(strategy: NormalizationStrategy, mut entries: Vec<FingerprintEntry>) -> Self {
        entries.sort_by(|a, b| {
            a.normalized_path
                .cmp(&b.normalized_path)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        let mut hasher = Hasher::new();
        hasher.put_str(strategy.tag()).put_u64(entries.len() as u64);
        for entry in &entries {
            hasher.put_str(&entry.normalized_path).put_hash(&entry.hash);
        }
        Self {
            strategy,
            entries,
            hash: hasher.finish(),
        }
    }

    pub fn strategy(&self) -> NormalizationStrategy {
        self.strategy
    }

    pub fn entries(&self) -> &[FingerprintEntry] {
        &self.entries
    }

    pub fn hash(&self) -> HashCode {
        self.hash
    }

    /// Whether no regular file contributed to this fingerprint
    pub fn contains_no_files(&self) -> bool {
        !self
            .entries
            .iter()
            .any(|entry| entry.kind == FileKind::RegularFile)
    }

    /// Absolute paths of every existing entry, deepest first
    pub fn existing_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|entry| entry.kind != FileKind::Missing)
            .map(|entry| entry.absolute_path.clone())
            .collect();
        paths.sort_by(|a, b| b.components().count().cmp(&a.components().count()).then(b.cmp(a)));
        paths.dedup();
        paths
    }
}

impl PartialEq for FileCollectionFingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for FileCollectionFingerprint {}

impl fmt::Debug for FileCollectionFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCollectionFingerprint")
            .field("strategy", &self.strategy)
            .field("entries", &self.entries.len())
            .field("hash", &self.hash)
            .finish()
    }
}

/// Fingerprints declared file inputs and outputs through the snapshot store
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    store: Arc<SnapshotStore>,
}

impl Fingerprinter {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Fingerprint the given roots, reading unknown locations from disk
    pub fn fingerprint<P: AsRef<Path>>(
        &self,
        roots: &[P],
        strategy: NormalizationStrategy,
    ) -> Result<FileCollectionFingerprint> {
        let snapshots = roots
            .iter()
            .map(|root| self.store.read(root.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::fingerprint_snapshots(&snapshots, strategy))
    }

    /// Fingerprint snapshots that were already taken
    pub fn fingerprint_snapshots(
        snapshots: &[FileSystemSnapshot],
        strategy: NormalizationStrategy,
    ) -> FileCollectionFingerprint {
        let mut entries = Vec::new();
        for root in snapshots {
            root.visit(&mut |entry, relative| {
                let kind = FileKind::from(entry);
                let normalized_path = match strategy {
                    NormalizationStrategy::IgnoredPath => {
                        if kind != FileKind::RegularFile {
                            return;
                        }
                        String::new()
                    }
                    NormalizationStrategy::AbsolutePath => {
                        entry.path().to_string_lossy().into_owned()
                    }
                    NormalizationStrategy::RelativePath | NormalizationStrategy::None => {
                        if relative.is_empty() && kind == FileKind::RegularFile {
                            entry.name().to_string()
                        } else {
                            relative.to_string()
                        }
                    }
                    NormalizationStrategy::NameOnly => {
                        if relative.is_empty() && kind != FileKind::RegularFile {
                            String::new()
                        } else {
                            entry.name().to_string()
                        }
                    }
                };
                let hash = match (strategy, entry) {
                    (_, FileSystemSnapshot::Missing { .. }) => missing_signature(),
                    (_, FileSystemSnapshot::Directory(_)) => directory_signature(),
                    (NormalizationStrategy::None, FileSystemSnapshot::RegularFile(_)) => {
                        file_signature()
                    }
                    (_, FileSystemSnapshot::RegularFile(file)) => file.hash,
                };
                entries.push(FingerprintEntry {
                    absolute_path: entry.path().to_path_buf(),
                    normalized_path,
                    kind,
                    hash,
                });
            });
        }
        FileCollectionFingerprint::from_entries(strategy, entries)
    }
}
