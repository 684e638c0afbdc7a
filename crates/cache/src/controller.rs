//! Build cache controller backed by a local directory of entries

use crate::key::CacheKey;
use crate::packer::{self, CacheManifest, OutputTree};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use workcell_config::{BuildCacheSettings, CacheMode};
use workcell_core::{Error, Result, CACHE_ENTRY_EXTENSION};
use workcell_utils::{delete_recursively, write_atomic};

/// Loads and stores build cache entries
pub trait BuildCacheController: Send + Sync {
    /// Whether loads or stores may happen at all
    fn is_enabled(&self) -> bool;

    /// Restore the entry for `key` into `outputs`.
    ///
    /// `Ok(None)` is a miss. An error means the entry could not be used; the
    /// outputs may then be partially written and must be treated as stale.
    fn load(&self, key: &CacheKey, outputs: &[OutputTree]) -> Result<Option<CacheManifest>>;

    /// Store `outputs` under `key`. An existing entry is kept as is.
    fn store(&self, key: &CacheKey, outputs: &[OutputTree], manifest: &CacheManifest) -> Result<()>;

    /// Drop an entry found to be unusable
    fn evict(&self, key: &CacheKey) -> Result<()>;
}

/// Cache entries as `<key>.tar.gz` files in one directory.
///
/// Entries are written to a temporary file and renamed into place, so a
/// concurrent reader sees either the complete entry or none.
#[derive(Debug, Clone)]
pub struct LocalBuildCacheController {
    directory: PathBuf,
    mode: CacheMode,
    debug_logging: bool,
}

impl LocalBuildCacheController {
    pub fn new(directory: impl Into<PathBuf>, mode: CacheMode) -> Self {
        Self {
            directory: directory.into(),
            mode,
            debug_logging: false,
        }
    }

    pub fn from_settings(settings: &BuildCacheSettings) -> Self {
        Self {
            directory: settings.directory(),
            mode: settings.mode,
            debug_logging: settings.debug_logging,
        }
    }

    pub fn with_debug_logging(mut self, debug_logging: bool) -> Self {
        self.debug_logging = debug_logging;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.directory
            .join(format!("{key}.{CACHE_ENTRY_EXTENSION}"))
    }

    fn report(&self, key: &CacheKey, message: &str) {
        if self.debug_logging {
            tracing::info!(key = %key, "{message}");
        } else {
            tracing::debug!(key = %key, "{message}");
        }
    }
}

impl BuildCacheController for LocalBuildCacheController {
    fn is_enabled(&self) -> bool {
        self.mode.is_enabled()
    }

    fn load(&self, key: &CacheKey, outputs: &[OutputTree]) -> Result<Option<CacheManifest>> {
        if !self.mode.can_load() {
            return Ok(None);
        }
        let path = self.entry_path(key);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.report(key, "Build cache miss");
                return Ok(None);
            }
            Err(e) => return Err(Error::file_system(&path, "open cache entry", e)),
        };
        let manifest = packer::unpack(key, BufReader::new(file), outputs)?;
        self.report(key, "Build cache hit");
        Ok(Some(manifest))
    }

    fn store(&self, key: &CacheKey, outputs: &[OutputTree], manifest: &CacheManifest) -> Result<()> {
        if !self.mode.can_store() {
            return Ok(());
        }
        let path = self.entry_path(key);
        if path.exists() {
            self.report(key, "Build cache entry already present");
            return Ok(());
        }
        let bytes = packer::pack(outputs, manifest)?;
        write_atomic(&path, &bytes)?;
        self.report(key, "Stored build cache entry");
        Ok(())
    }

    fn evict(&self, key: &CacheKey) -> Result<()> {
        if delete_recursively(&self.entry_path(key))? {
            tracing::warn!(key = %key, "Evicted unusable build cache entry");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::OriginMetadata;
    use crate::packer::TreeKind;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;
    use workcell_core::HashCode;

    fn manifest() -> CacheManifest {
        CacheManifest {
            origin: OriginMetadata::new("build-1", 7),
            output_hashes: BTreeMap::new(),
        }
    }

    fn setup(mode: CacheMode) -> (TempDir, LocalBuildCacheController, Vec<OutputTree>, CacheKey) {
        let temp_dir = TempDir::new().unwrap();
        let controller = LocalBuildCacheController::new(temp_dir.path().join("cache"), mode);
        let output = temp_dir.path().join("A.out");
        fs::write(&output, "compiled").unwrap();
        let outputs = vec![OutputTree::new("binary", output, TreeKind::File)];
        (temp_dir, controller, outputs, CacheKey::from(HashCode::of_str("k")))
    }

    #[test]
    fn test_store_then_load() {
        let (_temp_dir, controller, outputs, key) = setup(CacheMode::ReadWrite);
        assert!(controller.load(&key, &outputs).unwrap().is_none());

        let manifest = manifest();
        controller.store(&key, &outputs, &manifest).unwrap();
        fs::remove_file(&outputs[0].root).unwrap();

        let loaded = controller.load(&key, &outputs).unwrap();
        assert_eq!(loaded, Some(manifest));
        assert_eq!(fs::read_to_string(&outputs[0].root).unwrap(), "compiled");
    }

    #[test]
    fn test_modes_gate_operations() {
        let (_temp_dir, read_only, outputs, key) = setup(CacheMode::ReadOnly);
        read_only.store(&key, &outputs, &manifest()).unwrap();
        assert!(!read_only.entry_path(&key).exists());

        let write_only = LocalBuildCacheController::new(read_only.directory(), CacheMode::WriteOnly);
        write_only.store(&key, &outputs, &manifest()).unwrap();
        assert!(write_only.entry_path(&key).exists());
        assert!(write_only.load(&key, &outputs).unwrap().is_none());

        let off = LocalBuildCacheController::new(read_only.directory(), CacheMode::Off);
        assert!(!off.is_enabled());
    }

    #[test]
    fn test_corrupt_entry_is_an_error_and_can_be_evicted() {
        let (_temp_dir, controller, outputs, key) = setup(CacheMode::ReadWrite);
        fs::create_dir_all(controller.directory()).unwrap();
        fs::write(controller.entry_path(&key), b"garbage").unwrap();

        assert!(matches!(
            controller.load(&key, &outputs).unwrap_err(),
            Error::CacheCorruption { .. }
        ));
        controller.evict(&key).unwrap();
        assert!(controller.load(&key, &outputs).unwrap().is_none());
    }
}
