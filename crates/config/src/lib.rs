//! Configuration for the workcell execution core
//!
//! Settings are read once per build invocation with the precedence
//! defaults < config file < `WORKCELL_*` environment < command line.

pub mod config;
pub mod loader;

pub use config::*;
pub use loader::*;
