//! Workspace provisioning for mutable and immutable work

use crate::identity::WorkIdentity;
use crate::work::WorkspaceKind;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;
use workcell_cache::OriginMetadata;
use workcell_core::{
    Error, HashCode, Result, WORKSPACE_METADATA_FILE, WORKSPACE_OUTPUTS_FILE,
};
use workcell_utils::{copy_tree, delete_recursively, move_atomically, write_atomic, FileLock};

/// A directory assigned to one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub kind: WorkspaceKind,
    pub path: PathBuf,
}

/// Exclusive hold on a mutable workspace, released on drop
#[derive(Debug)]
pub struct MutableWorkspaceLease {
    workspace: Workspace,
    _file_lock: FileLock,
    _guard: OwnedMutexGuard<()>,
}

impl MutableWorkspaceLease {
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }
}

/// Recorded alongside the outputs of an immutable workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmutableWorkspaceMetadata {
    pub origin: OriginMetadata,
    pub output_hashes: BTreeMap<String, HashCode>,
}

/// Output locations the last run in a mutable workspace declared
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub roots: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The staged workspace is now at its final location
    Moved,
    /// Another run published the same workspace first; the staged copy was discarded
    AlreadyPresent,
}

/// Hands out workspace directories under one root.
///
/// Mutable workspaces live in `mutable/<identity>` and are locked per
/// identity, both within the process and across processes. Immutable
/// workspaces live in `immutable/<key>` and are only ever created by moving a
/// fully written staging directory into place.
#[derive(Debug)]
pub struct WorkspaceProvisioner {
    root: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl WorkspaceProvisioner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Wait for exclusive use of the mutable workspace of `identity`, creating it if needed
    pub async fn lock_mutable(&self, identity: &WorkIdentity) -> Result<MutableWorkspaceLease> {
        let id = identity.unique_id();
        let path = self.root.join("mutable").join(&id);

        let mutex = self.locks.entry(id.clone()).or_default().clone();
        if mutex.try_lock().is_err() {
            tracing::debug!(identity = %identity, "Waiting for workspace lock");
        }
        let guard = mutex.lock_owned().await;

        let lock_path = FileLock::path_for(&path);
        let file_lock = tokio::task::spawn_blocking(move || FileLock::acquire(&lock_path))
            .await
            .map_err(|e| Error::execution(&identity.display_name, format!("workspace lock task failed: {e}")))??;

        fs::create_dir_all(&path)
            .map_err(|e| Error::file_system(&path, "create workspace", e))?;

        Ok(MutableWorkspaceLease {
            workspace: Workspace {
                kind: WorkspaceKind::Mutable,
                path,
            },
            _file_lock: file_lock,
            _guard: guard,
        })
    }

    pub fn immutable_location(&self, key: &HashCode) -> PathBuf {
        self.root.join("immutable").join(key.to_hex())
    }

    /// A fresh, empty staging directory next to the immutable workspaces
    pub fn create_staging(&self) -> Result<PathBuf> {
        let path = self
            .root
            .join("immutable")
            .join(format!(".staging-{}", Uuid::new_v4()));
        fs::create_dir_all(&path)
            .map_err(|e| Error::file_system(&path, "create staging workspace", e))?;
        Ok(path)
    }

    /// Move a staged workspace to its final location.
    ///
    /// A concurrent publisher may win the race; the staged copy is then
    /// discarded. Any other move failure is retried by copying the staged
    /// tree to a second temporary location and moving that copy.
    pub fn publish(&self, staging: &Path, destination: &Path) -> Result<PublishOutcome> {
        let first_error = match move_atomically(staging, destination) {
            Ok(()) => return Ok(PublishOutcome::Moved),
            Err(e) => e,
        };

        if destination.exists() {
            tracing::debug!(
                workspace = %destination.display(),
                "Immutable workspace was created concurrently, discarding staged copy"
            );
            delete_recursively(staging)?;
            return Ok(PublishOutcome::AlreadyPresent);
        }

        tracing::warn!(
            workspace = %destination.display(),
            error = %first_error,
            "Moving staged workspace failed, retrying through a copy"
        );
        let copy = staging.with_file_name(format!(".copy-{}", Uuid::new_v4()));
        copy_tree(staging, &copy)?;
        let moved = move_atomically(&copy, destination);
        delete_recursively(staging)?;
        match moved {
            Ok(()) => Ok(PublishOutcome::Moved),
            Err(_) if destination.exists() => {
                delete_recursively(&copy)?;
                Ok(PublishOutcome::AlreadyPresent)
            }
            Err(e) => {
                delete_recursively(&copy)?;
                Err(Error::file_system(destination, "move immutable workspace", e))
            }
        }
    }

    pub fn read_metadata(location: &Path) -> Result<Option<ImmutableWorkspaceMetadata>> {
        read_json(&location.join(WORKSPACE_METADATA_FILE))
    }

    pub fn write_metadata(location: &Path, metadata: &ImmutableWorkspaceMetadata) -> Result<()> {
        write_atomic(
            &location.join(WORKSPACE_METADATA_FILE),
            &serde_json::to_vec_pretty(metadata)?,
        )
    }

    pub fn read_output_record(workspace: &Path) -> Result<Option<OutputRecord>> {
        read_json(&workspace.join(WORKSPACE_OUTPUTS_FILE))
    }

    pub fn write_output_record(workspace: &Path, record: &OutputRecord) -> Result<()> {
        write_atomic(
            &workspace.join(WORKSPACE_OUTPUTS_FILE),
            &serde_json::to_vec_pretty(record)?,
        )
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::file_system(path, "read workspace metadata", e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::workspace_corrupted(path, format!("unreadable metadata: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn identity(name: &str) -> WorkIdentity {
        WorkIdentity {
            display_name: name.to_string(),
            hash: HashCode::of_str(name),
        }
    }

    #[tokio::test]
    async fn test_mutable_workspace_is_reused() {
        let temp_dir = TempDir::new().unwrap();
        let provisioner = WorkspaceProvisioner::new(temp_dir.path());

        let first = provisioner.lock_mutable(&identity(":a")).await.unwrap();
        let path = first.workspace().path.clone();
        fs::write(path.join("state"), "kept").unwrap();
        drop(first);

        let second = provisioner.lock_mutable(&identity(":a")).await.unwrap();
        assert_eq!(second.workspace().path, path);
        assert!(path.join("state").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_lease_waits_for_the_first() {
        let temp_dir = TempDir::new().unwrap();
        let provisioner = Arc::new(WorkspaceProvisioner::new(temp_dir.path()));

        let first = provisioner.lock_mutable(&identity(":a")).await.unwrap();
        let waiting = {
            let provisioner = provisioner.clone();
            tokio::spawn(async move { provisioner.lock_mutable(&identity(":a")).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiting.is_finished());

        // Other identities are not blocked
        provisioner.lock_mutable(&identity(":b")).await.unwrap();

        drop(first);
        tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_publish_and_race() {
        let temp_dir = TempDir::new().unwrap();
        let provisioner = WorkspaceProvisioner::new(temp_dir.path());
        let destination = provisioner.immutable_location(&HashCode::of_str("k"));

        let staging = provisioner.create_staging().unwrap();
        fs::write(staging.join("out"), "1").unwrap();
        assert_eq!(
            provisioner.publish(&staging, &destination).unwrap(),
            PublishOutcome::Moved
        );
        assert!(!staging.exists());

        let loser = provisioner.create_staging().unwrap();
        fs::write(loser.join("out"), "1").unwrap();
        assert_eq!(
            provisioner.publish(&loser, &destination).unwrap(),
            PublishOutcome::AlreadyPresent
        );
        assert!(!loser.exists());
        assert_eq!(fs::read_to_string(destination.join("out")).unwrap(), "1");
    }

    #[test]
    fn test_metadata_round_trip_and_corruption() {
        let temp_dir = TempDir::new().unwrap();
        assert!(WorkspaceProvisioner::read_metadata(temp_dir.path())
            .unwrap()
            .is_none());

        let metadata = ImmutableWorkspaceMetadata {
            origin: OriginMetadata::new("build-1", 3),
            output_hashes: BTreeMap::new(),
        };
        WorkspaceProvisioner::write_metadata(temp_dir.path(), &metadata).unwrap();
        assert_eq!(
            WorkspaceProvisioner::read_metadata(temp_dir.path()).unwrap(),
            Some(metadata)
        );

        fs::write(temp_dir.path().join(WORKSPACE_METADATA_FILE), "{").unwrap();
        assert!(matches!(
            WorkspaceProvisioner::read_metadata(temp_dir.path()).unwrap_err(),
            Error::WorkspaceCorrupted { .. }
        ));
    }
}
