//! Virtual file system for workcell
//!
//! The [`SnapshotStore`] keeps an in-memory, copy-on-write view of the file
//! system state the execution pipeline has observed, so that deciding that
//! nothing changed does not require rehashing unchanged trees. The
//! [`Fingerprinter`] turns snapshots into normalized [`FileCollectionFingerprint`]s.

pub mod compare;
pub mod fingerprint;
pub mod hasher;
pub mod hierarchy;
pub mod snapshot;
pub mod snapshotter;
pub mod store;
pub mod watch;

pub use compare::{ChangeType, FileChange};
pub use fingerprint::{
    FileCollectionFingerprint, FileKind, FingerprintEntry, Fingerprinter, NormalizationStrategy,
};
pub use hasher::{FileHasher, HasherStats};
pub use hierarchy::{SnapshotHierarchy, VfsStatistics};
pub use snapshot::{DirectorySnapshot, FileSystemSnapshot, RegularFileSnapshot};
pub use snapshotter::DirectorySnapshotter;
pub use store::SnapshotStore;
pub use watch::{ChangeListener, FileChangeKind};
