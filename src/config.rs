//! Paths and plugin settings.
//!
//! Settings live in `livefx.json` inside the config directory. Every field
//! has a default, so a partial file is fine and a missing one means "all
//! defaults". A file that fails to parse is reported and ignored.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::reconcile::ReconcileOptions;

pub const CONFIG_FILE: &str = "livefx.json";
pub const LOG_FILE: &str = "livefx.log";
const APP_DIR: &str = "livefx";
const CONFIG_DIR_ENV: &str = "LIVEFX_CONFIG_DIR";

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args → ENV var (LIVEFX_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }

    /// Resolved configuration directory
    ///
    /// 1. custom directory from CLI or ENV
    /// 2. current folder IF it holds a `livefx.json`
    /// 3. `<platform config dir>/livefx`
    /// 4. `.`
    pub fn config_dir(&self) -> PathBuf {
        self.resolve(dirs_next::config_dir)
    }

    /// Resolved data directory (logs). Same priority, platform data dir last.
    pub fn data_dir(&self) -> PathBuf {
        self.resolve(dirs_next::data_dir)
    }

    fn resolve(&self, platform: fn() -> Option<PathBuf>) -> PathBuf {
        if let Some(dir) = &self.config_dir {
            return dir.clone();
        }
        if let Ok(current) = std::env::current_dir()
            && current.join(CONFIG_FILE).exists()
        {
            return current;
        }
        platform().map(|d| d.join(APP_DIR)).unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn config_file(&self, name: &str) -> PathBuf {
        self.config_dir().join(name)
    }

    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir().join(name)
    }

    /// Create the config and data directories if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        let config_dir = self.config_dir();
        let data_dir = self.data_dir();

        if !config_dir.exists() {
            std::fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
        }
        if data_dir != config_dir && !data_dir.exists() {
            std::fs::create_dir_all(&data_dir)
                .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        }
        Ok(())
    }
}

/// Plugin settings (`livefx.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Resolution effect params are authored at
    pub base_dpi: f64,
    /// Fraction of the art bounds rasterized to probe the device resolution
    pub probe_scale: f64,
    pub anti_alias: u8,
    /// Modal dialog frame rate, Hz. 0 disables pacing.
    pub frame_rate: f64,
    pub menu_category: String,
    pub effect_prefix: String,
    /// Dynamic effect runtime to load instead of the built-in effects
    pub runtime_library: Option<PathBuf>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            base_dpi: 72.0,
            probe_scale: 0.01,
            anti_alias: 4,
            frame_rate: 60.0,
            menu_category: "LiveFX".to_string(),
            effect_prefix: crate::core::params::EFFECT_PREFIX.to_string(),
            runtime_library: None,
        }
    }
}

impl PluginConfig {
    /// Read `path`. Missing file gives defaults; a corrupt one gives
    /// defaults plus a warning.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Self::default();
            }
            Err(e) => {
                warn!("Cannot read {}: {}, using defaults", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(config) => {
                debug!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Corrupt config {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// [`PluginConfig::load`] from `livefx.json` in the resolved config dir.
    pub fn load_from(paths: &PathConfig) -> Self {
        Self::load(&paths.config_file(CONFIG_FILE))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        let defaults = ReconcileOptions::default();
        ReconcileOptions {
            base_dpi: if self.base_dpi > 0.0 { self.base_dpi } else { defaults.base_dpi },
            probe_scale: if self.probe_scale > 0.0 { self.probe_scale } else { defaults.probe_scale },
            anti_alias: self.anti_alias,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_in_custom_dir() {
        let config = PathConfig { config_dir: Some(PathBuf::from("/custom")) };
        assert_eq!(config.config_file("test.json"), PathBuf::from("/custom/test.json"));
        assert_eq!(config.data_file(LOG_FILE), PathBuf::from("/custom/livefx.log"));
    }

    #[test]
    fn test_cli_dir_wins() {
        let config = PathConfig::from_env_and_cli(Some(PathBuf::from("/from/cli")));
        assert_eq!(config.config_dir(), PathBuf::from("/from/cli"));
    }

    #[test]
    fn test_ensure_dirs_creates() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested/cfg");
        let config = PathConfig { config_dir: Some(dir.clone()) };
        config.ensure_dirs().unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(PluginConfig::load(&tmp.path().join(CONFIG_FILE)), PluginConfig::default());
    }

    /// Test: Partial and corrupt config files
    /// Validates: Absent fields default, unparsable file falls back entirely
    #[test]
    fn test_partial_and_corrupt_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);

        std::fs::write(&path, r#"{"frame_rate": 30, "menu_category": "Stylize"}"#).unwrap();
        let config = PluginConfig::load(&path);
        assert_eq!(config.frame_rate, 30.0);
        assert_eq!(config.menu_category, "Stylize");
        assert_eq!(config.base_dpi, 72.0);

        std::fs::write(&path, "{ frame_rate: ").unwrap();
        assert_eq!(PluginConfig::load(&path), PluginConfig::default());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        let config = PluginConfig { runtime_library: Some(PathBuf::from("/opt/fx.so")), ..Default::default() };
        config.save(&path).unwrap();
        assert_eq!(PluginConfig::load(&path), config);
    }

    #[test]
    fn test_reconcile_options_reject_nonpositive() {
        let config = PluginConfig { base_dpi: 0.0, probe_scale: 0.5, ..Default::default() };
        let opts = config.reconcile_options();
        assert_eq!(opts.base_dpi, 72.0);
        assert_eq!(opts.probe_scale, 0.5);
    }
}
