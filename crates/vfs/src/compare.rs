//! Entry-level differences between two fingerprints

use crate::fingerprint::{FileCollectionFingerprint, FileKind, FingerprintEntry};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

/// One added, removed or modified entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub normalized_path: String,
    pub change: ChangeType,
    pub kind: FileKind,
}

impl FileChange {
    fn from_entry(entry: &FingerprintEntry, change: ChangeType) -> Self {
        Self {
            path: entry.absolute_path.clone(),
            normalized_path: entry.normalized_path.clone(),
            change,
            kind: entry.kind,
        }
    }
}

impl FileCollectionFingerprint {
    /// Changes that turn `previous` into `self`.
    ///
    /// Entries are matched by normalized path. Where several entries share a
    /// normalized path (name-only or ignored-path strategies) they are matched
    /// by content hash, so reordering never shows up as a change.
    pub fn changes_since(&self, previous: &FileCollectionFingerprint) -> Vec<FileChange> {
        if self == previous {
            return Vec::new();
        }

        let mut groups: BTreeMap<&str, (Vec<&FingerprintEntry>, Vec<&FingerprintEntry>)> =
            BTreeMap::new();
        for entry in previous.entries() {
            groups.entry(&entry.normalized_path).or_default().0.push(entry);
        }
        for entry in self.entries() {
            groups.entry(&entry.normalized_path).or_default().1.push(entry);
        }

        let mut changes = Vec::new();
        for (before, after) in groups.into_values() {
            if let ([old], [new]) = (before.as_slice(), after.as_slice()) {
                if old.hash != new.hash {
                    // A file replaced by a directory is a removal and an addition
                    if old.kind == new.kind {
                        changes.push(FileChange::from_entry(new, ChangeType::Modified));
                    } else {
                        changes.push(FileChange::from_entry(old, ChangeType::Removed));
                        changes.push(FileChange::from_entry(new, ChangeType::Added));
                    }
                }
                continue;
            }

            let mut unmatched_after: Vec<&FingerprintEntry> = after;
            for old in before {
                match unmatched_after.iter().position(|new| new.hash == old.hash) {
                    Some(index) => {
                        unmatched_after.swap_remove(index);
                    }
                    None => changes.push(FileChange::from_entry(old, ChangeType::Removed)),
                }
            }
            for new in unmatched_after {
                changes.push(FileChange::from_entry(new, ChangeType::Added));
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{Fingerprinter, NormalizationStrategy};
    use crate::store::SnapshotStore;
    use std::fs;
    use std::path::Path;
    use proptest::prelude::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn fingerprint(root: &Path, strategy: NormalizationStrategy) -> FileCollectionFingerprint {
        Fingerprinter::new(Arc::new(SnapshotStore::new()))
            .fingerprint(&[root], strategy)
            .unwrap()
    }

    #[test]
    fn test_added_removed_modified() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("keep"), "same").unwrap();
        fs::write(root.join("edit"), "v1").unwrap();
        fs::write(root.join("gone"), "x").unwrap();
        let before = fingerprint(root, NormalizationStrategy::RelativePath);

        fs::write(root.join("edit"), "v2").unwrap();
        fs::remove_file(root.join("gone")).unwrap();
        fs::write(root.join("new"), "n").unwrap();
        let after = fingerprint(root, NormalizationStrategy::RelativePath);

        let changes: Vec<(String, ChangeType)> = after
            .changes_since(&before)
            .into_iter()
            .map(|c| (c.normalized_path, c.change))
            .collect();
        assert_eq!(
            changes,
            vec![
                ("edit".to_string(), ChangeType::Modified),
                ("gone".to_string(), ChangeType::Removed),
                ("new".to_string(), ChangeType::Added),
            ]
        );
    }

    #[test]
    fn test_identical_fingerprints_have_no_changes() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a"), "a").unwrap();
        let fp = fingerprint(temp_dir.path(), NormalizationStrategy::AbsolutePath);
        assert!(fp.changes_since(&fp.clone()).is_empty());
    }

    #[test]
    fn test_ignored_path_changes_match_by_content() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a"), "1").unwrap();
        fs::write(root.join("b"), "2").unwrap();
        let before = fingerprint(root, NormalizationStrategy::IgnoredPath);

        fs::write(root.join("b"), "3").unwrap();
        let after = fingerprint(root, NormalizationStrategy::IgnoredPath);

        let mut kinds: Vec<ChangeType> = after.changes_since(&before).into_iter().map(|c| c.change).collect();
        kinds.sort_by_key(|k| *k as u8);
        assert_eq!(kinds, vec![ChangeType::Added, ChangeType::Removed]);
    }

    #[test]
    fn test_everything_is_added_against_empty_history() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a"), "a").unwrap();
        let fp = fingerprint(&temp_dir.path().join("a"), NormalizationStrategy::RelativePath);
        let changes = fp.changes_since(&FileCollectionFingerprint::empty(NormalizationStrategy::RelativePath));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change, ChangeType::Added);
    }

    proptest! {
        #[test]
        fn test_file_changes_match_content_difference(
            before in proptest::collection::btree_map("[a-f]{1,4}", 0u8..4, 0..8),
            after in proptest::collection::btree_map("[a-f]{1,4}", 0u8..4, 0..8),
        ) {
            let temp_dir = TempDir::new().unwrap();
            let root = temp_dir.path().join("root");
            let populate = |files: &std::collections::BTreeMap<String, u8>| {
                let _ = fs::remove_dir_all(&root);
                fs::create_dir_all(&root).unwrap();
                for (name, content) in files {
                    fs::write(root.join(name), [*content]).unwrap();
                }
                fingerprint(&root, NormalizationStrategy::RelativePath)
            };
            let old = populate(&before);
            let new = populate(&after);

            let mut expected: Vec<(String, ChangeType)> = Vec::new();
            for (name, content) in &after {
                match before.get(name) {
                    None => expected.push((name.clone(), ChangeType::Added)),
                    Some(previous) if previous != content => {
                        expected.push((name.clone(), ChangeType::Modified))
                    }
                    Some(_) => {}
                }
            }
            for name in before.keys().filter(|name| !after.contains_key(*name)) {
                expected.push((name.clone(), ChangeType::Removed));
            }
            expected.sort();

            let mut actual: Vec<(String, ChangeType)> = new
                .changes_since(&old)
                .into_iter()
                .filter(|change| change.kind == FileKind::RegularFile)
                .map(|change| (change.normalized_path, change.change))
                .collect();
            actual.sort();
            prop_assert_eq!(actual, expected);
        }
    }
}
