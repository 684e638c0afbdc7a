//! Persistent record of the last execution of every unit of work

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use workcell_core::{Error, HashCode, Result};
use workcell_utils::{write_atomic, FileLock};
use workcell_vfs::FileCollectionFingerprint;

/// Magic number for history records: "WCHS"
const HISTORY_MAGIC: u32 = 0x5743_4853;

/// Current history record format version
const HISTORY_VERSION: u16 = 1;

/// Where a set of outputs came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginMetadata {
    /// Build invocation that produced the outputs
    pub build_invocation_id: String,
    /// How long the producing execution took
    pub execution_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl OriginMetadata {
    pub fn new(build_invocation_id: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            build_invocation_id: build_invocation_id.into(),
            execution_time_ms,
            created_at: Utc::now(),
        }
    }
}

/// What the last execution of a unit of work saw and produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub successful: bool,
    /// Hash of the implementation that ran
    pub implementation: HashCode,
    pub value_inputs: BTreeMap<String, HashCode>,
    pub file_inputs: BTreeMap<String, FileCollectionFingerprint>,
    pub outputs: BTreeMap<String, FileCollectionFingerprint>,
    pub origin: OriginMetadata,
}

impl ExecutionState {
    /// The same record, flagged as not trustworthy for incremental decisions
    pub fn into_failed(mut self) -> Self {
        self.successful = false;
        self
    }
}

#[derive(Serialize, Deserialize)]
struct RecordHeader {
    magic: u32,
    version: u16,
}

/// Durable key-value store of [`ExecutionState`] keyed by work identity
pub trait ExecutionHistoryStore: Send + Sync {
    fn load(&self, identity: &str) -> Result<Option<ExecutionState>>;

    fn store(&self, identity: &str, state: &ExecutionState) -> Result<()>;

    fn remove(&self, identity: &str) -> Result<()>;
}

/// History store keeping one bincode file per identity.
///
/// Reads and writes of one identity are serialized across processes by a
/// lock file next to the record; writes replace the record atomically, so
/// the last writer wins and readers never see a partial record.
#[derive(Debug, Clone)]
pub struct FileExecutionHistoryStore {
    directory: PathBuf,
}

impl FileExecutionHistoryStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_path(&self, identity: &str) -> PathBuf {
        self.directory
            .join(format!("{}.bin", HashCode::of_str(identity).to_hex()))
    }

    fn encode(state: &ExecutionState) -> Result<Vec<u8>> {
        let header = RecordHeader {
            magic: HISTORY_MAGIC,
            version: HISTORY_VERSION,
        };
        let mut bytes = bincode::serialize(&header)?;
        bytes.extend(bincode::serialize(state)?);
        Ok(bytes)
    }

    fn decode(identity: &str, bytes: &[u8]) -> Result<ExecutionState> {
        let header: RecordHeader = bincode::deserialize(bytes)?;
        if header.magic != HISTORY_MAGIC {
            return Err(Error::cache_corruption(
                identity,
                format!("invalid history record magic {:08x}", header.magic),
            ));
        }
        if header.version != HISTORY_VERSION {
            return Err(Error::cache_corruption(
                identity,
                format!("unsupported history record version {}", header.version),
            ));
        }
        let header_size = bincode::serialized_size(&header)? as usize;
        Ok(bincode::deserialize(&bytes[header_size..])?)
    }
}

impl ExecutionHistoryStore for FileExecutionHistoryStore {
    fn load(&self, identity: &str) -> Result<Option<ExecutionState>> {
        let path = self.record_path(identity);
        let _lock = FileLock::acquire(&FileLock::path_for(&path))?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::file_system(&path, "read history record", e)),
        };
        let state = Self::decode(identity, &bytes)?;
        tracing::trace!(identity, successful = state.successful, "Loaded execution history");
        Ok(Some(state))
    }

    fn store(&self, identity: &str, state: &ExecutionState) -> Result<()> {
        let path = self.record_path(identity);
        let bytes = Self::encode(state)?;
        let _lock = FileLock::acquire(&FileLock::path_for(&path))?;
        write_atomic(&path, &bytes)?;
        tracing::trace!(identity, successful = state.successful, "Stored execution history");
        Ok(())
    }

    fn remove(&self, identity: &str) -> Result<()> {
        let path = self.record_path(identity);
        let _lock = FileLock::acquire(&FileLock::path_for(&path))?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::file_system(&path, "remove history record", e)),
        }
    }
}

/// History that lives only as long as the process
#[derive(Debug, Default)]
pub struct InMemoryExecutionHistoryStore {
    records: DashMap<String, ExecutionState>,
}

impl InMemoryExecutionHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionHistoryStore for InMemoryExecutionHistoryStore {
    fn load(&self, identity: &str) -> Result<Option<ExecutionState>> {
        Ok(self.records.get(identity).map(|state| state.clone()))
    }

    fn store(&self, identity: &str, state: &ExecutionState) -> Result<()> {
        self.records.insert(identity.to_string(), state.clone());
        Ok(())
    }

    fn remove(&self, identity: &str) -> Result<()> {
        self.records.remove(identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use workcell_vfs::NormalizationStrategy;

    fn state(build: &str) -> ExecutionState {
        let mut value_inputs = BTreeMap::new();
        value_inputs.insert("level".to_string(), HashCode::of_str("3"));
        let mut file_inputs = BTreeMap::new();
        file_inputs.insert(
            "sources".to_string(),
            FileCollectionFingerprint::empty(NormalizationStrategy::RelativePath),
        );
        ExecutionState {
            successful: true,
            implementation: HashCode::of_str("compile@1"),
            value_inputs,
            file_inputs,
            outputs: BTreeMap::new(),
            origin: OriginMetadata::new(build, 12),
        }
    }

    #[test]
    fn test_file_store_survives_reopening() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileExecutionHistoryStore::new(temp_dir.path());
        assert!(store.load(":compile").unwrap().is_none());

        let recorded = state("build-1");
        store.store(":compile", &recorded).unwrap();

        let reopened = FileExecutionHistoryStore::new(temp_dir.path());
        assert_eq!(reopened.load(":compile").unwrap(), Some(recorded));
    }

    #[test]
    fn test_last_writer_wins_and_failure_marking() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileExecutionHistoryStore::new(temp_dir.path());
        store.store(":compile", &state("build-1")).unwrap();
        store
            .store(":compile", &state("build-2").into_failed())
            .unwrap();

        let loaded = store.load(":compile").unwrap().unwrap();
        assert_eq!(loaded.origin.build_invocation_id, "build-2");
        assert!(!loaded.successful);

        store.remove(":compile").unwrap();
        assert!(store.load(":compile").unwrap().is_none());
    }

    #[test]
    fn test_garbage_record_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileExecutionHistoryStore::new(temp_dir.path());
        fs::create_dir_all(temp_dir.path()).unwrap();
        fs::write(store.record_path(":compile"), b"not a record").unwrap();
        assert!(store.load(":compile").is_err());
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryExecutionHistoryStore::new();
        store.store("a", &state("b1")).unwrap();
        assert!(store.load("a").unwrap().is_some());
        store.remove("a").unwrap();
        assert!(store.load("a").unwrap().is_none());
    }
}
