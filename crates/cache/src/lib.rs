//! Execution history and build cache for workcell
//!
//! This crate provides:
//! - The persistent [`ExecutionHistoryStore`] keyed by work identity
//! - Content-derived [`CacheKey`]s
//! - A deterministic tar.gz entry format with a JSON manifest
//! - The [`BuildCacheController`] that restores and stores output trees

pub mod controller;
pub mod history;
pub mod key;
pub mod packer;

pub use controller::{BuildCacheController, LocalBuildCacheController};
pub use history::{
    ExecutionHistoryStore, ExecutionState, FileExecutionHistoryStore,
    InMemoryExecutionHistoryStore, OriginMetadata,
};
pub use key::{CacheKey, CacheKeyBuilder};
pub use packer::{CacheManifest, OutputTree, TreeKind};
