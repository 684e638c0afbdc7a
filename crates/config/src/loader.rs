//! Configuration loading with precedence handling

use crate::config::{CacheMode, ConfigSource, ExecutionConfig, RetentionMode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use workcell_core::{
    Error, Result, CONFIG_FILE_NAME, WORKCELL_BUILD_CACHE_DEBUG_VAR, WORKCELL_BUILD_CACHE_DIR_VAR,
    WORKCELL_BUILD_CACHE_VAR, WORKCELL_CONFIG_DIR_VAR, WORKCELL_HISTORY_DIR_VAR,
    WORKCELL_RETENTION_VAR, WORKCELL_TIMEOUT_VAR, WORKCELL_VFS_VERBOSE_VAR,
    WORKCELL_WORKSPACE_ROOT_VAR,
};
use workcell_utils::XdgPaths;

/// Partial configuration as read from one layer. Absent fields leave the
/// lower layer untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigLayer {
    retention: Option<RetentionMode>,
    vfs_verbose_logging: Option<bool>,
    build_cache: Option<BuildCacheLayer>,
    history_dir: Option<PathBuf>,
    workspace_root: Option<PathBuf>,
    default_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BuildCacheLayer {
    mode: Option<CacheMode>,
    directory: Option<PathBuf>,
    debug_logging: Option<bool>,
}

impl ConfigLayer {
    fn is_empty(&self) -> bool {
        self.retention.is_none()
            && self.vfs_verbose_logging.is_none()
            && self.build_cache.is_none()
            && self.history_dir.is_none()
            && self.workspace_root.is_none()
            && self.default_timeout_secs.is_none()
    }

    fn apply_to(self, config: &mut ExecutionConfig) {
        if let Some(retention) = self.retention {
            config.retention = retention;
        }
        if let Some(verbose) = self.vfs_verbose_logging {
            config.vfs_verbose_logging = verbose;
        }
        if let Some(cache) = self.build_cache {
            if let Some(mode) = cache.mode {
                config.build_cache.mode = mode;
            }
            if cache.directory.is_some() {
                config.build_cache.directory = cache.directory;
            }
            if let Some(debug) = cache.debug_logging {
                config.build_cache.debug_logging = debug;
            }
        }
        if self.history_dir.is_some() {
            config.history_dir = self.history_dir;
        }
        if self.workspace_root.is_some() {
            config.workspace_root = self.workspace_root;
        }
        if self.default_timeout_secs.is_some() {
            config.default_timeout_secs = self.default_timeout_secs;
        }
    }
}

/// Command line overrides, the highest precedence layer
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub retention: Option<RetentionMode>,
    pub cache_mode: Option<CacheMode>,
    pub cache_debug_logging: Option<bool>,
}

/// Configuration loader that handles precedence
pub struct ExecutionConfigLoader;

impl ExecutionConfigLoader {
    /// Load configuration with full precedence handling
    pub fn load() -> Result<ExecutionConfig> {
        let mut config = ExecutionConfig::default();

        let config_path = Self::config_file_path();
        if let Some(layer) = Self::read_file_layer(&config_path)? {
            layer.apply_to(&mut config);
            config.source = ConfigSource::ConfigFile(config_path);
        }

        let env_layer = Self::read_env_layer();
        if !env_layer.is_empty() {
            env_layer.apply_to(&mut config);
            config.source = ConfigSource::EnvironmentVariable("WORKCELL_*".to_string());
        }

        tracing::debug!(source = ?config.source, "Loaded execution configuration");
        Ok(config)
    }

    /// Load a single configuration file on top of the defaults
    pub fn load_from_file(path: &Path) -> Result<ExecutionConfig> {
        let mut config = ExecutionConfig::default();
        if let Some(layer) = Self::read_file_layer(path)? {
            layer.apply_to(&mut config);
            config.source = ConfigSource::ConfigFile(path.to_path_buf());
        }
        Ok(config)
    }

    /// Apply command line arguments (highest precedence)
    pub fn apply_cli_overrides(
        mut config: ExecutionConfig,
        overrides: &CliOverrides,
    ) -> ExecutionConfig {
        let mut changed = false;
        if let Some(retention) = overrides.retention {
            config.retention = retention;
            changed = true;
        }
        if let Some(mode) = overrides.cache_mode {
            config.build_cache.mode = mode;
            changed = true;
        }
        if let Some(debug) = overrides.cache_debug_logging {
            config.build_cache.debug_logging = debug;
            changed = true;
        }
        if changed {
            config.source = ConfigSource::CommandLine;
        }
        config
    }

    /// Get the configuration file path
    pub fn config_file_path() -> PathBuf {
        std::env::var(WORKCELL_CONFIG_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| XdgPaths::config_dir())
            .join(CONFIG_FILE_NAME)
    }

    fn read_file_layer(path: &Path) -> Result<Option<ConfigLayer>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::file_system(path, "read config file", e)),
        };
        let layer = serde_json::from_str(&content).map_err(|e| Error::Json {
            message: format!("Invalid config file {}", path.display()),
            source: e,
        })?;
        Ok(Some(layer))
    }

    fn read_env_layer() -> ConfigLayer {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let flag = |name: &str| var(name).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "on"));

        let mut cache = BuildCacheLayer::default();
        let mut has_cache = false;
        if let Some(mode) = var(WORKCELL_BUILD_CACHE_VAR) {
            cache.mode = Some(CacheMode::from(mode.as_str()));
            has_cache = true;
        }
        if let Some(dir) = var(WORKCELL_BUILD_CACHE_DIR_VAR) {
            cache.directory = Some(PathBuf::from(dir));
            has_cache = true;
        }
        if let Some(debug) = flag(WORKCELL_BUILD_CACHE_DEBUG_VAR) {
            cache.debug_logging = Some(debug);
            has_cache = true;
        }

        let default_timeout_secs = var(WORKCELL_TIMEOUT_VAR).and_then(|value| {
            value
                .parse::<u64>()
                .map_err(|e| {
                    tracing::warn!(%value, error = %e, "Ignoring invalid {WORKCELL_TIMEOUT_VAR}");
                })
                .ok()
        });

        ConfigLayer {
            retention: var(WORKCELL_RETENTION_VAR).map(|v| RetentionMode::from(v.as_str())),
            vfs_verbose_logging: flag(WORKCELL_VFS_VERBOSE_VAR),
            build_cache: has_cache.then_some(cache),
            history_dir: var(WORKCELL_HISTORY_DIR_VAR).map(PathBuf::from),
            workspace_root: var(WORKCELL_WORKSPACE_ROOT_VAR).map(PathBuf::from),
            default_timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const ALL_VARS: &[&str] = &[
        WORKCELL_CONFIG_DIR_VAR,
        WORKCELL_RETENTION_VAR,
        WORKCELL_VFS_VERBOSE_VAR,
        WORKCELL_BUILD_CACHE_VAR,
        WORKCELL_BUILD_CACHE_DIR_VAR,
        WORKCELL_BUILD_CACHE_DEBUG_VAR,
        WORKCELL_HISTORY_DIR_VAR,
        WORKCELL_WORKSPACE_ROOT_VAR,
        WORKCELL_TIMEOUT_VAR,
    ];

    fn clear_env() {
        for name in ALL_VARS {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = ExecutionConfigLoader::load_from_file(&temp_dir.path().join("none.json")).unwrap();
        assert_eq!(config, ExecutionConfig::default());
    }

    #[test]
    fn test_file_layer_overrides_only_present_fields() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "retention": "enabled", "build_cache": { "mode": "read-only" } }"#,
        )
        .unwrap();

        let config = ExecutionConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.retention, RetentionMode::Enabled);
        assert_eq!(config.build_cache.mode, CacheMode::ReadOnly);
        assert!(!config.build_cache.debug_logging);
        assert_eq!(config.source, ConfigSource::ConfigFile(path));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(ExecutionConfigLoader::load_from_file(&path).is_err());
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(CONFIG_FILE_NAME),
            r#"{ "retention": "enabled", "default_timeout_secs": 30 }"#,
        )
        .unwrap();
        std::env::set_var(WORKCELL_CONFIG_DIR_VAR, temp_dir.path());
        std::env::set_var(WORKCELL_RETENTION_VAR, "disabled");
        std::env::set_var(WORKCELL_BUILD_CACHE_DEBUG_VAR, "true");

        let config = ExecutionConfigLoader::load().unwrap();
        clear_env();

        assert_eq!(config.retention, RetentionMode::Disabled);
        assert_eq!(config.default_timeout_secs, Some(30));
        assert!(config.build_cache.debug_logging);
        assert_eq!(
            config.source,
            ConfigSource::EnvironmentVariable("WORKCELL_*".to_string())
        );
    }

    #[test]
    #[serial]
    fn test_cli_overrides_win() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        std::env::set_var(WORKCELL_CONFIG_DIR_VAR, temp_dir.path());
        std::env::set_var(WORKCELL_BUILD_CACHE_VAR, "off");
        let config = ExecutionConfigLoader::load().unwrap();
        clear_env();
        assert_eq!(config.build_cache.mode, CacheMode::Off);

        let config = ExecutionConfigLoader::apply_cli_overrides(
            config,
            &CliOverrides {
                cache_mode: Some(CacheMode::ReadWrite),
                ..Default::default()
            },
        );
        assert_eq!(config.build_cache.mode, CacheMode::ReadWrite);
        assert_eq!(config.source, ConfigSource::CommandLine);
    }
}
