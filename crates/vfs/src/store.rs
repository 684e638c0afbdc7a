//! Thread-safe snapshot store shared by every unit of work in a build

use crate::hasher::HasherStats;
use crate::hierarchy::{SnapshotHierarchy, VfsStatistics};
use crate::snapshot::FileSystemSnapshot;
use crate::snapshotter::DirectorySnapshotter;
use crate::watch::ChangeListener;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use workcell_config::ExecutionConfig;
use workcell_core::Result;

/// In-memory view of the file system state observed so far.
///
/// Readers work on an immutable [`SnapshotHierarchy`] root; writers swap the
/// root under a short write lock. Every invalidation bumps an epoch so that a
/// walk which started before the invalidation never publishes its result.
pub struct SnapshotStore {
    pub(crate) root: RwLock<SnapshotHierarchy>,
    epoch: AtomicU64,
    snapshotter: DirectorySnapshotter,
    pub(crate) listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
    /// Locations written by work in the current build
    pub(crate) written_by_build: Mutex<Vec<PathBuf>>,
    pub(crate) verbose: AtomicBool,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("epoch", &self.epoch.load(Ordering::Acquire))
            .field("statistics", &self.statistics())
            .finish()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(SnapshotHierarchy::empty()),
            epoch: AtomicU64::new(0),
            snapshotter: DirectorySnapshotter::new(),
            listeners: RwLock::new(Vec::new()),
            written_by_build: Mutex::new(Vec::new()),
            verbose: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        let store = Self::new();
        store.set_verbose_logging(config.vfs_verbose_logging);
        store
    }

    pub fn set_verbose_logging(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Snapshot of `path`, served from memory when known and read through otherwise
    pub fn read(&self, path: &Path) -> Result<FileSystemSnapshot> {
        let (hierarchy, epoch) = {
            let guard = self.root.read();
            (guard.clone(), self.epoch.load(Ordering::Acquire))
        };
        if let Some(snapshot) = hierarchy.find(path) {
            return Ok(snapshot);
        }

        let snapshot = self
            .snapshotter
            .snapshot(path, &|location: &Path| hierarchy.find(location))?;

        let mut guard = self.root.write();
        if self.epoch.load(Ordering::Acquire) == epoch {
            *guard = guard.store(path, snapshot.clone());
        } else {
            tracing::trace!(path = %path.display(), "Discarding snapshot taken across an invalidation");
        }
        Ok(snapshot)
    }

    /// Forget everything known at or below the given locations
    pub fn invalidate<P: AsRef<Path>>(&self, locations: &[P]) {
        if locations.is_empty() {
            return;
        }
        let mut guard = self.root.write();
        let mut hierarchy = guard.clone();
        for location in locations {
            hierarchy = hierarchy.invalidate(location.as_ref());
        }
        *guard = hierarchy;
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Forget everything
    pub fn invalidate_all(&self) {
        let mut guard = self.root.write();
        *guard = SnapshotHierarchy::empty();
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Invalidate locations that work is about to write or has just written.
    ///
    /// Call before and after the write. The locations are remembered for the
    /// rest of the build so change notifications for them are not broadcast.
    pub fn invalidate_for_write<P: AsRef<Path>>(&self, locations: &[P]) {
        {
            let mut written = self.written_by_build.lock();
            for location in locations {
                let location = location.as_ref();
                if !written.iter().any(|known| known == location) {
                    written.push(location.to_path_buf());
                }
            }
        }
        self.invalidate(locations);
    }

    /// Run `action` while the given locations are invalidated around it
    pub fn update<P, T, F>(&self, locations: &[P], action: F) -> Result<T>
    where
        P: AsRef<Path>,
        F: FnOnce() -> Result<T>,
    {
        self.invalidate_for_write(locations);
        let result = action();
        self.invalidate_for_write(locations);
        result
    }

    pub fn hasher_stats(&self) -> HasherStats {
        self.snapshotter.hasher().stats()
    }

    pub fn statistics(&self) -> VfsStatistics {
        self.root.read().statistics()
    }

    pub(crate) fn is_written_by_build(&self, path: &Path) -> bool {
        self.written_by_build
            .lock()
            .iter()
            .any(|location| path.starts_with(location))
    }
}
