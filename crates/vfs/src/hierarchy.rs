//! Persistent, structurally shared tree of known snapshots

use crate::snapshot::FileSystemSnapshot;
use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Node {
    /// Complete snapshot of this location; descendants are then implied by it
    snapshot: Option<FileSystemSnapshot>,
    /// Partially known children, only used while `snapshot` is `None`
    children: BTreeMap<String, Arc<Node>>,
}

impl Node {
    fn complete(snapshot: FileSystemSnapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Some(snapshot),
            children: BTreeMap::new(),
        })
    }

    fn partial(children: BTreeMap<String, Arc<Node>>) -> Arc<Self> {
        Arc::new(Self {
            snapshot: None,
            children,
        })
    }
}

/// Counts of what a hierarchy currently retains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VfsStatistics {
    pub retained_files: usize,
    pub retained_directories: usize,
    pub retained_missing: usize,
}

/// An immutable view of every snapshot the store knows about.
///
/// Updates return a new hierarchy that shares all untouched nodes with the
/// previous one, so readers holding an older root keep a consistent view.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHierarchy {
    root: Arc<Node>,
}

impl SnapshotHierarchy {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.snapshot.is_none() && self.root.children.is_empty()
    }

    /// Look up the snapshot of `path` if it is implied by a stored snapshot
    pub fn find(&self, path: &Path) -> Option<FileSystemSnapshot> {
        let segments = path_segments(path);
        let mut node = &self.root;
        for (depth, segment) in segments.iter().enumerate() {
            if let Some(snapshot) = &node.snapshot {
                return Some(snapshot.descendant(&segments[depth..]));
            }
            node = node.children.get(segment)?;
        }
        node.snapshot.clone()
    }

    /// Record `snapshot` as the state of `path`.
    ///
    /// A location already covered by a complete ancestor snapshot is left
    /// alone; anything previously known below `path` is replaced.
    pub fn store(&self, path: &Path, snapshot: FileSystemSnapshot) -> Self {
        let segments = path_segments(path);
        match store_node(&self.root, &segments, snapshot) {
            Some(root) => Self { root },
            None => self.clone(),
        }
    }

    /// Forget `path`, everything below it, and every ancestor snapshot that
    /// summarized it. Siblings of the invalidated location stay known.
    pub fn invalidate(&self, path: &Path) -> Self {
        let segments = path_segments(path);
        match invalidate_node(&self.root, &segments) {
            Some(root) => Self { root },
            None => Self::empty(),
        }
    }

    pub fn statistics(&self) -> VfsStatistics {
        let mut stats = VfsStatistics::default();
        count_node(&self.root, &mut stats);
        stats
    }
}

fn store_node(node: &Arc<Node>, segments: &[String], snapshot: FileSystemSnapshot) -> Option<Arc<Node>> {
    if node.snapshot.is_some() {
        return None;
    }
    let Some((head, rest)) = segments.split_first() else {
        return Some(Node::complete(snapshot));
    };
    let child = node.children.get(head).cloned().unwrap_or_default();
    let updated = store_node(&child, rest, snapshot)?;
    let mut children = node.children.clone();
    children.insert(head.clone(), updated);
    Some(Node::partial(children))
}

/// Returns `None` when the node no longer holds anything
fn invalidate_node(node: &Arc<Node>, segments: &[String]) -> Option<Arc<Node>> {
    let (head, rest) = segments.split_first()?;

    let mut children = match &node.snapshot {
        Some(FileSystemSnapshot::Directory(dir)) => dir
            .children
            .iter()
            .map(|child| (child.name().to_string(), Node::complete(child.clone())))
            .collect(),
        // A file or missing location cannot stay valid once something below it changed
        Some(_) => return None,
        None => {
            if !node.children.contains_key(head) {
                return Some(node.clone());
            }
            node.children.clone()
        }
    };

    if let Some(child) = children.get(head).cloned() {
        match invalidate_node(&child, rest) {
            Some(updated) => {
                children.insert(head.clone(), updated);
            }
            None => {
                children.remove(head);
            }
        }
    }

    if children.is_empty() {
        None
    } else {
        Some(Node::partial(children))
    }
}

fn count_node(node: &Node, stats: &mut VfsStatistics) {
    if let Some(snapshot) = &node.snapshot {
        snapshot.visit(&mut |entry, _| match entry {
            FileSystemSnapshot::Missing { .. } => stats.retained_missing += 1,
            FileSystemSnapshot::RegularFile(_) => stats.retained_files += 1,
            FileSystemSnapshot::Directory(_) => stats.retained_directories += 1,
        });
    }
    for child in node.children.values() {
        count_node(child, stats);
    }
}

/// Split a path into the segments used as tree keys
pub(crate) fn path_segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|component| match component {
            Component::Prefix(prefix) => Some(prefix.as_os_str().to_string_lossy().into_owned()),
            Component::RootDir | Component::CurDir => None,
            Component::ParentDir => Some("..".to_string()),
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{DirectorySnapshot, RegularFileSnapshot};
    use std::path::PathBuf;
    use workcell_core::HashCode;

    fn file(path: &str, content: &str) -> FileSystemSnapshot {
        let path = PathBuf::from(path);
        FileSystemSnapshot::RegularFile(RegularFileSnapshot {
            name: path.file_name().unwrap().to_string_lossy().into_owned(),
            path,
            hash: HashCode::of_str(content),
            length: content.len() as u64,
            last_modified: 0,
        })
    }

    fn dir(path: &str, children: Vec<FileSystemSnapshot>) -> FileSystemSnapshot {
        let path = PathBuf::from(path);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        FileSystemSnapshot::Directory(Arc::new(DirectorySnapshot::new(path, name, children)))
    }

    fn project() -> FileSystemSnapshot {
        dir(
            "/p/src",
            vec![
                file("/p/src/a.src", "a"),
                dir("/p/src/nested", vec![file("/p/src/nested/b.src", "b")]),
            ],
        )
    }

    #[test]
    fn test_find_through_complete_ancestor() {
        let hierarchy = SnapshotHierarchy::empty().store(Path::new("/p/src"), project());

        let found = hierarchy.find(Path::new("/p/src/nested/b.src")).unwrap();
        assert_eq!(found.hash(), HashCode::of_str("b"));
        assert!(hierarchy.find(Path::new("/p/src/nope")).unwrap().is_missing());
        assert!(hierarchy.find(Path::new("/p/other")).is_none());
        assert!(hierarchy.find(Path::new("/p")).is_none());
    }

    #[test]
    fn test_store_below_complete_ancestor_is_ignored() {
        let hierarchy = SnapshotHierarchy::empty().store(Path::new("/p/src"), project());
        let again = hierarchy.store(Path::new("/p/src/a.src"), file("/p/src/a.src", "zzz"));
        assert_eq!(
            again.find(Path::new("/p/src/a.src")).unwrap().hash(),
            HashCode::of_str("a")
        );
    }

    #[test]
    fn test_invalidate_keeps_siblings_and_forgets_ancestors() {
        let hierarchy = SnapshotHierarchy::empty().store(Path::new("/p/src"), project());
        let invalidated = hierarchy.invalidate(Path::new("/p/src/a.src"));

        assert!(invalidated.find(Path::new("/p/src/a.src")).is_none());
        assert!(invalidated.find(Path::new("/p/src")).is_none());
        assert!(invalidated.find(Path::new("/p/src/nested/b.src")).is_some());

        // The previous root is untouched
        assert!(hierarchy.find(Path::new("/p/src/a.src")).is_some());
    }

    #[test]
    fn test_invalidate_below_missing_location() {
        let hierarchy = SnapshotHierarchy::empty().store(
            Path::new("/p/out"),
            FileSystemSnapshot::missing("/p/out"),
        );
        let invalidated = hierarchy.invalidate(Path::new("/p/out/created.bin"));
        assert!(invalidated.find(Path::new("/p/out")).is_none());
        assert!(invalidated.is_empty());
    }

    #[test]
    fn test_statistics() {
        let hierarchy = SnapshotHierarchy::empty()
            .store(Path::new("/p/src"), project())
            .store(Path::new("/p/out"), FileSystemSnapshot::missing("/p/out"));
        assert_eq!(
            hierarchy.statistics(),
            VfsStatistics {
                retained_files: 2,
                retained_directories: 2,
                retained_missing: 1,
            }
        );
    }
}
