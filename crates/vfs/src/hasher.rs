//! Streaming content hasher with usage counters

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use workcell_core::{Error, HashCode, Result};

/// Number of files and bytes hashed so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HasherStats {
    pub files_hashed: u64,
    pub bytes_hashed: u64,
}

/// Hashes regular file contents and counts the work it does.
///
/// The counters let callers observe that an up-to-date check touched no file
/// contents.
#[derive(Debug, Default)]
pub struct FileHasher {
    files_hashed: AtomicU64,
    bytes_hashed: AtomicU64,
}

impl FileHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash the content of the file at `path`
    pub fn hash_file(&self, path: &Path, length: u64) -> Result<HashCode> {
        let file = File::open(path).map_err(|e| Error::fingerprinting_io(path, e))?;
        let hash = HashCode::of_reader(BufReader::new(file))
            .map_err(|e| Error::fingerprinting_io(path, e))?;
        self.files_hashed.fetch_add(1, Ordering::Relaxed);
        self.bytes_hashed.fetch_add(length, Ordering::Relaxed);
        tracing::trace!(path = %path.display(), hash = %hash.short(), "Hashed file");
        Ok(hash)
    }

    pub fn stats(&self) -> HasherStats {
        HasherStats {
            files_hashed: self.files_hashed.load(Ordering::Relaxed),
            bytes_hashed: self.bytes_hashed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_counts_hashed_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.src");
        std::fs::write(&path, "v1").unwrap();

        let hasher = FileHasher::new();
        let first = hasher.hash_file(&path, 2).unwrap();
        let second = hasher.hash_file(&path, 2).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, HashCode::of_reader(&b"v1"[..]).unwrap());
        assert_eq!(
            hasher.stats(),
            HasherStats {
                files_hashed: 2,
                bytes_hashed: 4
            }
        );
    }

    #[test]
    fn test_missing_file_is_a_fingerprinting_error() {
        let temp_dir = TempDir::new().unwrap();
        let error = FileHasher::new()
            .hash_file(&temp_dir.path().join("absent"), 0)
            .unwrap_err();
        assert!(matches!(error, Error::Fingerprinting { .. }));
    }
}
