//! Core domain types, errors, and constants for `workcell`.
//!
//! ## Key Components
//!
//! - **`errors`**: Defines the primary `Error` enum and `Result` type alias,
//!   centralizing all failure modes of the execution core.
//! - **`hash`**: The `HashCode` content digest and the streaming `Hasher` used
//!   for snapshots, fingerprints, identities and cache keys.
//! - **`constants`**: Shared environment variable names and on-disk layout names.

pub mod constants;
pub mod errors;
pub mod hash;

pub use self::{
    constants::*,
    errors::{Error, Result, ResultExt},
    hash::{HashCode, Hasher},
};
