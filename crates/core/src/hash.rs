//! Content digests shared by snapshots, fingerprints, identities and cache keys

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

/// A SHA-256 digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HashCode([u8; 32]);

impl HashCode {
    /// Hash a byte slice in one go
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.put_bytes(bytes);
        hasher.finish()
    }

    /// Hash a string in one go
    pub fn of_str(value: &str) -> Self {
        Self::of_bytes(value.as_bytes())
    }

    /// Hash everything readable from `reader`, streaming in 8KiB chunks
    pub fn of_reader(mut reader: impl Read) -> std::io::Result<Self> {
        let mut digest = Sha256::new();
        let mut buffer = [0u8; 8192];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            digest.update(&buffer[..bytes_read]);
        }
        Ok(Self(digest.finalize().into()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 16 hex characters, for log lines
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(16);
        hex
    }
}

impl fmt::Display for HashCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for HashCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashCode({})", self.short())
    }
}

impl FromStr for HashCode {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// Incremental hasher with unambiguous framing for composite values.
///
/// Strings and byte slices are length-prefixed so that `("ab", "c")` and
/// `("a", "bc")` never collide.
#[derive(Clone, Default)]
pub struct Hasher {
    digest: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.digest.update((bytes.len() as u64).to_le_bytes());
        self.digest.update(bytes);
        self
    }

    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_bytes(value.as_bytes())
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.digest.update(value.to_le_bytes());
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.digest.update([u8::from(value)]);
        self
    }

    pub fn put_hash(&mut self, hash: &HashCode) -> &mut Self {
        self.digest.update(hash.0);
        self
    }

    pub fn finish(self) -> HashCode {
        HashCode(self.digest.finalize().into())
    }
}
