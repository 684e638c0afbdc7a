//! Immutable snapshots of file system locations

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use workcell_core::{HashCode, Hasher};

/// Hash recorded for a location that does not exist
pub fn missing_signature() -> HashCode {
    static SIGNATURE: OnceLock<HashCode> = OnceLock::new();
    *SIGNATURE.get_or_init(|| HashCode::of_str("workcell:missing"))
}

/// Hash recorded for a directory when only its existence matters
pub fn directory_signature() -> HashCode {
    static SIGNATURE: OnceLock<HashCode> = OnceLock::new();
    *SIGNATURE.get_or_init(|| HashCode::of_str("workcell:directory"))
}

/// Hash recorded for a regular file when only its existence matters
pub fn file_signature() -> HashCode {
    static SIGNATURE: OnceLock<HashCode> = OnceLock::new();
    *SIGNATURE.get_or_init(|| HashCode::of_str("workcell:file"))
}

/// State of one regular file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegularFileSnapshot {
    pub path: PathBuf,
    pub name: String,
    /// Content hash; metadata never participates
    pub hash: HashCode,
    pub length: u64,
    /// Milliseconds since the Unix epoch
    pub last_modified: i64,
}

/// State of a directory and everything below it.
///
/// `children` are sorted by name and never contain missing entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySnapshot {
    pub path: PathBuf,
    pub name: String,
    pub hash: HashCode,
    pub children: Vec<FileSystemSnapshot>,
}

impl DirectorySnapshot {
    /// Build a directory snapshot, sorting the children and deriving the tree hash
    pub fn new(path: PathBuf, name: String, mut children: Vec<FileSystemSnapshot>) -> Self {
        children.sort_by(|a, b| a.name().cmp(b.name()));
        let mut hasher = Hasher::new();
        hasher.put_hash(&directory_signature());
        for child in &children {
            hasher.put_str(child.name()).put_hash(&child.hash());
        }
        Self {
            path,
            name,
            hash: hasher.finish(),
            children,
        }
    }

    fn child(&self, name: &str) -> Option<&FileSystemSnapshot> {
        self.children
            .binary_search_by(|child| child.name().cmp(name))
            .ok()
            .map(|index| &self.children[index])
    }
}

/// Snapshot of one path. Cheap to clone; directories share their subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSystemSnapshot {
    Missing { path: PathBuf },
    RegularFile(RegularFileSnapshot),
    Directory(Arc<DirectorySnapshot>),
}

impl FileSystemSnapshot {
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        FileSystemSnapshot::Missing { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        match self {
            FileSystemSnapshot::Missing { path } => path,
            FileSystemSnapshot::RegularFile(file) => &file.path,
            FileSystemSnapshot::Directory(dir) => &dir.path,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FileSystemSnapshot::Missing { path } => path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default(),
            FileSystemSnapshot::RegularFile(file) => &file.name,
            FileSystemSnapshot::Directory(dir) => &dir.name,
        }
    }

    pub fn hash(&self) -> HashCode {
        match self {
            FileSystemSnapshot::Missing { .. } => missing_signature(),
            FileSystemSnapshot::RegularFile(file) => file.hash,
            FileSystemSnapshot::Directory(dir) => dir.hash,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FileSystemSnapshot::Missing { .. })
    }

    /// Find the snapshot of a descendant given the path segments below this one.
    ///
    /// Descendants of a missing location or of a regular file are missing.
    pub fn descendant(&self, segments: &[String]) -> FileSystemSnapshot {
        let mut current = self;
        for (depth, segment) in segments.iter().enumerate() {
            match current {
                FileSystemSnapshot::Directory(dir) => match dir.child(segment) {
                    Some(child) => current = child,
                    None => {
                        return FileSystemSnapshot::missing(join_segments(
                            &dir.path,
                            &segments[depth..],
                        ))
                    }
                },
                other => {
                    return FileSystemSnapshot::missing(join_segments(
                        other.path(),
                        &segments[depth..],
                    ))
                }
            }
        }
        current.clone()
    }

    /// Visit this snapshot and every descendant depth-first, parents first.
    ///
    /// The visitor receives each entry and its path relative to this root,
    /// using `/` separators; the root itself has an empty relative path.
    pub fn visit<F>(&self, visitor: &mut F)
    where
        F: FnMut(&FileSystemSnapshot, &str),
    {
        self.visit_relative(String::new(), visitor);
    }

    fn visit_relative<F>(&self, relative: String, visitor: &mut F)
    where
        F: FnMut(&FileSystemSnapshot, &str),
    {
        visitor(self, &relative);
        if let FileSystemSnapshot::Directory(dir) = self {
            for child in &dir.children {
                let child_relative = if relative.is_empty() {
                    child.name().to_string()
                } else {
                    format!("{relative}/{}", child.name())
                };
                child.visit_relative(child_relative, visitor);
            }
        }
    }
}

fn join_segments(base: &Path, segments: &[String]) -> PathBuf {
    let mut path = base.to_path_buf();
    for segment in segments {
        path.push(segment);
    }
    path
}
