//! Configuration types consumed by the snapshot store, the caches and the pipeline

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use workcell_utils::XdgPaths;

/// Whether snapshot store contents survive between builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionMode {
    /// Keep snapshots and apply an explicit list of changed paths at build start
    Enabled,
    /// Drop every snapshot at build start and finish
    #[default]
    Disabled,
}

impl RetentionMode {
    pub fn is_enabled(self) -> bool {
        self == RetentionMode::Enabled
    }
}

impl From<&str> for RetentionMode {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "enabled" | "true" | "on" | "1" => RetentionMode::Enabled,
            _ => RetentionMode::Disabled,
        }
    }
}

/// Which build cache operations are permitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    Off,
    ReadOnly,
    WriteOnly,
    #[default]
    ReadWrite,
}

impl CacheMode {
    pub fn is_enabled(self) -> bool {
        self != CacheMode::Off
    }

    pub fn can_load(self) -> bool {
        matches!(self, CacheMode::ReadOnly | CacheMode::ReadWrite)
    }

    pub fn can_store(self) -> bool {
        matches!(self, CacheMode::WriteOnly | CacheMode::ReadWrite)
    }
}

impl From<&str> for CacheMode {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "off" | "false" | "disabled" => CacheMode::Off,
            "read" | "read-only" | "readonly" => CacheMode::ReadOnly,
            "write" | "write-only" | "writeonly" => CacheMode::WriteOnly,
            _ => CacheMode::ReadWrite,
        }
    }
}

/// Build cache settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCacheSettings {
    pub mode: CacheMode,
    /// Directory holding cache entries; defaults under the XDG cache dir
    pub directory: Option<PathBuf>,
    /// Report cache loads and stores at info level
    pub debug_logging: bool,
}

impl BuildCacheSettings {
    pub fn directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(XdgPaths::build_cache_dir)
    }
}

/// Source of configuration for debugging and precedence tracking
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigSource {
    #[default]
    Default,
    ConfigFile(PathBuf),
    EnvironmentVariable(String),
    CommandLine,
}

/// Complete configuration of one build invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub retention: RetentionMode,
    pub vfs_verbose_logging: bool,
    pub build_cache: BuildCacheSettings,
    pub history_dir: Option<PathBuf>,
    pub workspace_root: Option<PathBuf>,
    pub default_timeout_secs: Option<u64>,
    /// Last layer that changed this configuration
    #[serde(skip)]
    pub source: ConfigSource,
}

impl ExecutionConfig {
    pub fn history_dir(&self) -> PathBuf {
        self.history_dir.clone().unwrap_or_else(XdgPaths::history_dir)
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(XdgPaths::workspace_root)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }

    pub fn builder() -> ExecutionConfigBuilder {
        ExecutionConfigBuilder::new()
    }
}

/// Builder for creating execution configurations
pub struct ExecutionConfigBuilder {
    config: ExecutionConfig,
}

impl ExecutionConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: ExecutionConfig::default(),
        }
    }

    pub fn with_retention(mut self, retention: RetentionMode) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn with_vfs_verbose_logging(mut self, verbose: bool) -> Self {
        self.config.vfs_verbose_logging = verbose;
        self
    }

    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.config.build_cache.mode = mode;
        self
    }

    pub fn with_cache_directory(mut self, directory: PathBuf) -> Self {
        self.config.build_cache.directory = Some(directory);
        self
    }

    pub fn with_cache_debug_logging(mut self, enabled: bool) -> Self {
        self.config.build_cache.debug_logging = enabled;
        self
    }

    pub fn with_history_dir(mut self, dir: PathBuf) -> Self {
        self.config.history_dir = Some(dir);
        self
    }

    pub fn with_workspace_root(mut self, dir: PathBuf) -> Self {
        self.config.workspace_root = Some(dir);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Place history, workspaces and cache entries under one directory
    pub fn with_state_root(self, root: PathBuf) -> Self {
        self.with_history_dir(root.join("history"))
            .with_workspace_root(root.join("workspaces"))
            .with_cache_directory(root.join("build-cache"))
    }

    pub fn build(self) -> ExecutionConfig {
        self.config
    }
}

impl Default for ExecutionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
