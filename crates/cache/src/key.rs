//! Build cache keys

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use workcell_core::{HashCode, Hasher};
use workcell_vfs::FileCollectionFingerprint;

/// Content-derived key of a build cache entry
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(HashCode);

impl CacheKey {
    pub fn builder(implementation: HashCode) -> CacheKeyBuilder {
        CacheKeyBuilder::new(implementation)
    }

    pub fn hash(&self) -> HashCode {
        self.0
    }
}

impl From<HashCode> for CacheKey {
    fn from(hash: HashCode) -> Self {
        Self(hash)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.0.short())
    }
}

/// Collects the inputs that determine a cache key.
///
/// Properties are hashed in name order, so insertion order never matters.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    implementation: HashCode,
    values: BTreeMap<String, HashCode>,
    files: BTreeMap<String, HashCode>,
}

impl CacheKeyBuilder {
    pub fn new(implementation: HashCode) -> Self {
        Self {
            implementation,
            values: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn value(mut self, name: impl Into<String>, hash: HashCode) -> Self {
        self.values.insert(name.into(), hash);
        self
    }

    pub fn files(mut self, name: impl Into<String>, fingerprint: &FileCollectionFingerprint) -> Self {
        self.files.insert(name.into(), fingerprint.hash());
        self
    }

    pub fn build(self) -> CacheKey {
        let mut hasher = Hasher::new();
        hasher.put_str("workcell-cache-key").put_hash(&self.implementation);
        hasher.put_u64(self.values.len() as u64);
        for (name, hash) in &self.values {
            hasher.put_str(name).put_hash(hash);
        }
        hasher.put_u64(self.files.len() as u64);
        for (name, hash) in &self.files {
            hasher.put_str(name).put_hash(hash);
        }
        CacheKey(hasher.finish())
    }
}
