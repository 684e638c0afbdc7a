//! Change notifications and build-session lifecycle of the snapshot store

use crate::store::SnapshotStore;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use workcell_config::RetentionMode;

/// What happened to a location reported by a file watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Modified,
    Removed,
}

/// Observer of external changes the store learned about
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, path: &Path, kind: FileChangeKind);

    /// The watcher lost track of changes; every snapshot was dropped
    fn on_watch_error(&self) {}
}

impl SnapshotStore {
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.write().push(listener);
    }

    /// Apply a change reported by a watcher.
    ///
    /// Changes inside locations written by the current build are applied but
    /// not forwarded to listeners.
    pub fn handle_change(&self, path: &Path, kind: FileChangeKind) {
        self.invalidate(&[path]);
        if self.is_written_by_build(path) {
            tracing::trace!(path = %path.display(), ?kind, "Ignoring change produced by this build");
            return;
        }
        if self.verbose.load(Ordering::Relaxed) {
            tracing::info!(path = %path.display(), ?kind, "File system change");
        }
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_change(path, kind);
        }
    }

    /// The watcher can no longer be trusted: drop everything
    pub fn handle_watch_error(&self) {
        tracing::warn!("File watching failed, dropping all retained snapshots");
        self.invalidate_all();
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_watch_error();
        }
    }

    /// Prepare the store for a new build.
    ///
    /// With retention enabled only `changed_paths` are forgotten; otherwise
    /// nothing survives from the previous build.
    pub fn after_build_started(&self, retention: RetentionMode, changed_paths: &[PathBuf]) {
        self.written_by_build.lock().clear();
        match retention {
            RetentionMode::Enabled => {
                self.invalidate(changed_paths);
                tracing::debug!(
                    changed = changed_paths.len(),
                    "Retained snapshots from previous build"
                );
            }
            RetentionMode::Disabled => self.invalidate_all(),
        }
        self.log_statistics("start of build");
    }

    /// Wrap up a build. Without retention the store is emptied.
    pub fn before_build_finished(&self, retention: RetentionMode) {
        self.log_statistics("end of build");
        if !retention.is_enabled() {
            self.invalidate_all();
        }
        self.written_by_build.lock().clear();
    }

    fn log_statistics(&self, moment: &str) {
        if self.verbose.load(Ordering::Relaxed) {
            let stats = self.statistics();
            tracing::info!(
                files = stats.retained_files,
                directories = stats.retained_directories,
                missing = stats.retained_missing,
                "Virtual file system retains snapshots at {moment}"
            );
        }
    }
}
