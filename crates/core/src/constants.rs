/// Constants used throughout the workcell codebase
// Environment variable names
pub const WORKCELL_CONFIG_DIR_VAR: &str = "WORKCELL_CONFIG_DIR";
pub const WORKCELL_RETENTION_VAR: &str = "WORKCELL_RETENTION";
pub const WORKCELL_VFS_VERBOSE_VAR: &str = "WORKCELL_VFS_VERBOSE";
pub const WORKCELL_BUILD_CACHE_VAR: &str = "WORKCELL_BUILD_CACHE";
pub const WORKCELL_BUILD_CACHE_DIR_VAR: &str = "WORKCELL_BUILD_CACHE_DIR";
pub const WORKCELL_BUILD_CACHE_DEBUG_VAR: &str = "WORKCELL_BUILD_CACHE_DEBUG";
pub const WORKCELL_HISTORY_DIR_VAR: &str = "WORKCELL_HISTORY_DIR";
pub const WORKCELL_WORKSPACE_ROOT_VAR: &str = "WORKCELL_WORKSPACE_ROOT";
pub const WORKCELL_TIMEOUT_VAR: &str = "WORKCELL_TIMEOUT_SECS";

// Application directory name under the XDG base directories
pub const APP_DIR_NAME: &str = "workcell";
pub const CONFIG_FILE_NAME: &str = "config.json";

// Immutable workspace metadata file
pub const WORKSPACE_METADATA_FILE: &str = "metadata.json";

// Mutable workspace record of the outputs declared by the last run
pub const WORKSPACE_OUTPUTS_FILE: &str = "outputs.json";

// Lock file name placed next to locked resources
pub const LOCK_FILE_SUFFIX: &str = ".lock";

// Cache entry layout
pub const CACHE_ENTRY_EXTENSION: &str = "tar.gz";
pub const CACHE_METADATA_PATH: &str = "METADATA";
pub const CACHE_TREE_PREFIX: &str = "tree-";
pub const CACHE_MISSING_TREE_PREFIX: &str = "missing-tree-";
