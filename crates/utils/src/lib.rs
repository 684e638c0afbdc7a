//! Shared utilities for workcell
//!
//! This crate provides the file system, locking and tracing helpers that the
//! snapshot store, the caches and the execution pipeline build on.

pub mod atomic_file;
pub mod file_lock;
pub mod fs;
pub mod tracing;
pub mod xdg;

pub use atomic_file::*;
pub use file_lock::*;
pub use fs::*;
pub use xdg::*;
