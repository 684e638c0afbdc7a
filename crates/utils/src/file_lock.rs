//! Cross-process exclusive locks backed by lock files

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use workcell_core::{Error, Result, LOCK_FILE_SUFFIX};

/// An exclusive lock on a lock file, released on drop.
///
/// `acquire` blocks until the lock is available. Locks are advisory and scoped
/// to the open file description, so two handles in one process exclude each
/// other as well as other processes.
#[derive(Debug)]
pub struct FileLock {
    lock_file: File,
    lock_path: PathBuf,
}

impl FileLock {
    /// Block until the exclusive lock at `lock_path` is held
    pub fn acquire(lock_path: &Path) -> Result<Self> {
        let lock_file = open_lock_file(lock_path)?;
        lock_file
            .lock_exclusive()
            .map_err(|e| Error::file_system(lock_path, "acquire exclusive lock", e))?;
        Self::held(lock_file, lock_path)
    }

    /// Lock file path used for a resource at `resource`
    pub fn path_for(resource: &Path) -> PathBuf {
        let mut name = resource
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(LOCK_FILE_SUFFIX);
        resource.with_file_name(name)
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    fn held(mut lock_file: File, lock_path: &Path) -> Result<Self> {
        // Owner pid is informational only
        let _ = lock_file.set_len(0);
        let _ = writeln!(lock_file, "{}", std::process::id());
        Ok(Self {
            lock_file,
            lock_path: lock_path.to_path_buf(),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // The lock file itself stays: removing it would let a waiter lock an
        // unlinked inode while a newcomer locks a fresh file.
        let _ = FileExt::unlock(&self.lock_file);
    }
}

fn open_lock_file(lock_path: &Path) -> Result<File> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::file_system(parent, "create lock directory", e))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| Error::file_system(lock_path, "open lock file", e))
}
