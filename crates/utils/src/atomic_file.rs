//! Whole-file replacement for history records, workspace metadata and cache entries

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use workcell_core::{Error, Result};

/// A sibling file that is removed on drop unless it was renamed into place
struct PendingFile {
    path: PathBuf,
    persisted: bool,
}

impl PendingFile {
    fn beside(target: &Path, directory: &Path) -> Self {
        let stem = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path: directory.join(format!(".{stem}.{}.tmp", Uuid::new_v4().simple())),
            persisted: false,
        }
    }

    fn fill(&self, content: &[u8]) -> Result<()> {
        let mut file = File::create(&self.path)
            .map_err(|e| Error::file_system(&self.path, "create pending file", e))?;
        file.write_all(content)
            .and_then(|()| file.sync_all())
            .map_err(|e| Error::file_system(&self.path, "write pending file", e))
    }

    fn persist(mut self, target: &Path) -> Result<()> {
        fs::rename(&self.path, target).map_err(|e| Error::file_system(target, "replace file", e))?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Replace `path` with `content` so readers see either the old or the new file, never a mix.
///
/// The content is synced before the rename; missing parent directories are created.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let directory = path.parent().ok_or_else(|| {
        Error::configuration(format!("{} has no parent directory", path.display()))
    })?;
    fs::create_dir_all(directory)
        .map_err(|e| Error::file_system(directory, "create parent directory", e))?;

    let pending = PendingFile::beside(path, directory);
    pending.fill(content)?;
    pending.persist(path)
}
