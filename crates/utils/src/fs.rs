//! File system helpers for workspaces and output trees

use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;
use workcell_core::{Error, Result};

/// Delete a file or directory tree. Returns whether anything was removed.
pub fn delete_recursively(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path)
            .map(|_| true)
            .map_err(|e| Error::file_system(path, "delete directory", e)),
        Ok(_) => fs::remove_file(path)
            .map(|_| true)
            .map_err(|e| Error::file_system(path, "delete file", e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::file_system(path, "read metadata", e)),
    }
}

/// Create the parent directory of `path` if it is missing
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::file_system(parent, "create parent directory", e))?;
    }
    Ok(())
}

/// Recursively copy `source` into `destination`, which must not exist yet
pub fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            Error::file_system(path, "walk directory", io::Error::other(e.to_string()))
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::configuration(format!("copy outside of source tree: {e}")))?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| Error::file_system(&target, "create directory", e))?;
        } else {
            ensure_parent_dir(&target)?;
            fs::copy(entry.path(), &target)
                .map_err(|e| Error::file_system(&target, "copy file", e))?;
        }
    }
    Ok(())
}

/// Rename `from` to `to`. Fails if `to` is a non-empty directory.
pub fn move_atomically(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(from, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_delete_missing_path_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(!delete_recursively(&temp_dir.path().join("absent")).unwrap());
    }

    #[test]
    fn test_copy_tree_then_delete() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        fs::create_dir_all(source.join("nested")).unwrap();
        fs::write(source.join("nested/a.txt"), "a").unwrap();
        fs::write(source.join("b.txt"), "b").unwrap();

        let destination = temp_dir.path().join("copy");
        copy_tree(&source, &destination).unwrap();

        assert_eq!(fs::read_to_string(destination.join("nested/a.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(destination.join("b.txt")).unwrap(), "b");

        assert!(delete_recursively(&destination).unwrap());
        assert!(!destination.exists());
    }

    #[test]
    fn test_move_onto_non_empty_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("staged");
        let to = temp_dir.path().join("final");
        fs::create_dir_all(&from).unwrap();
        fs::write(from.join("x"), "1").unwrap();
        fs::create_dir_all(&to).unwrap();
        fs::write(to.join("y"), "2").unwrap();

        assert!(move_atomically(&from, &to).is_err());
        assert!(from.exists());
    }
}
