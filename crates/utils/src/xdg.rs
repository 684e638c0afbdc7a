use std::env;
use std::path::PathBuf;
use workcell_core::APP_DIR_NAME;

/// XDG Base Directory paths for workcell
pub struct XdgPaths;

impl XdgPaths {
    /// Get XDG_CONFIG_HOME/workcell or fallback
    pub fn config_dir() -> PathBuf {
        env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|home| home.join(".config"))
                    .unwrap_or_else(|| PathBuf::from(".config"))
            })
            .join(APP_DIR_NAME)
    }

    /// Get XDG_STATE_HOME/workcell or fallback
    pub fn state_dir() -> PathBuf {
        env::var("XDG_STATE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|home| home.join(".local/state"))
                    .unwrap_or_else(|| PathBuf::from(".local/state"))
            })
            .join(APP_DIR_NAME)
    }

    /// Get XDG_CACHE_HOME/workcell or fallback
    pub fn cache_dir() -> PathBuf {
        env::var("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|home| home.join(".cache"))
                    .unwrap_or_else(|| PathBuf::from(".cache"))
            })
            .join(APP_DIR_NAME)
    }

    /// Execution history records
    pub fn history_dir() -> PathBuf {
        Self::state_dir().join("history")
    }

    /// Root for mutable and immutable workspaces
    pub fn workspace_root() -> PathBuf {
        Self::cache_dir().join("workspaces")
    }

    /// Local build cache entries
    pub fn build_cache_dir() -> PathBuf {
        Self::cache_dir().join("build-cache")
    }
}
