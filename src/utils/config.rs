//! Configuration management for the presenter
//!
//! This module handles loading and managing presenter configuration
//! from config files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::utils::error::{IntoPresenterError, PresenterError, Result};

/// Main presenter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Presenter behavior
    pub presenter: PresenterConfig,

    /// Clock and timer behavior
    pub clock: ClockConfig,

    /// General settings
    pub general: GeneralConfig,
}

/// Presenter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenterConfig {
    /// Switch to the software device when the hardware device fails
    pub software_fallback_enabled: bool,

    /// Consecutive composition passes on a different device before migrating
    pub device_migration_passes: u32,

    /// Samples later than this behind the clock are counted as late
    pub late_sample_tolerance_ms: u64,

    /// Placeholder size used before any media type is negotiated
    pub placeholder_width: u32,
    pub placeholder_height: u32,
}

/// Clock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Ignore any presentation clock and show every sample immediately
    pub clockless: bool,

    /// Timers due within this window are fired immediately
    pub timer_slack_us: u64,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            software_fallback_enabled: true,
            device_migration_passes: 2,
            late_sample_tolerance_ms: 40,
            placeholder_width: 1,
            placeholder_height: 1,
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            clockless: false,
            timer_slack_us: 1_000,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from various sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. System config file (/etc/evr-presenter/config.toml on Linux)
    /// 3. User config file (~/.config/evr-presenter/config.toml on Linux)
    /// 4. Environment variables (EVR_PRESENTER_* prefix)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_path) = Self::system_config_path() {
            if system_path.exists() {
                config = Self::from_file(&system_path)?;
            }
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                config = Self::from_file(&user_path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Read a configuration from a TOML file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).config_err("Failed to read config file")?;

        toml::from_str(&contents).config_err("Failed to parse config file")
    }

    /// Save configuration to the user config file
    pub fn save(&self) -> Result<()> {
        let path = Self::user_config_path()
            .ok_or_else(|| PresenterError::Config("Cannot determine user config path".to_string()))?;
        self.save_to(&path)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).config_err("Failed to create config directory")?;
        }

        let toml = toml::to_string_pretty(self).config_err("Failed to serialize config")?;

        std::fs::write(path, toml).config_err("Failed to write config file")?;

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("EVR_PRESENTER_SOFTWARE_FALLBACK") {
            self.presenter.software_fallback_enabled = value.parse()
                .map_err(|_| PresenterError::Config("Invalid EVR_PRESENTER_SOFTWARE_FALLBACK".to_string()))?;
        }

        if let Ok(value) = std::env::var("EVR_PRESENTER_MIGRATION_PASSES") {
            self.presenter.device_migration_passes = value.parse()
                .map_err(|_| PresenterError::Config("Invalid EVR_PRESENTER_MIGRATION_PASSES".to_string()))?;
        }

        if let Ok(value) = std::env::var("EVR_PRESENTER_CLOCKLESS") {
            self.clock.clockless = value.parse()
                .map_err(|_| PresenterError::Config("Invalid EVR_PRESENTER_CLOCKLESS".to_string()))?;
        }

        if let Ok(log_level) = std::env::var("EVR_PRESENTER_LOG_LEVEL") {
            self.general.log_level = log_level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.presenter.device_migration_passes == 0 {
            return Err(PresenterError::Config("device_migration_passes must be at least 1".to_string()));
        }

        if self.presenter.placeholder_width == 0 || self.presenter.placeholder_height == 0 {
            return Err(PresenterError::Config("Placeholder dimensions must be non-zero".to_string()));
        }

        if self.clock.timer_slack_us > 100_000 {
            return Err(PresenterError::Config("timer_slack_us must not exceed 100ms".to_string()));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(PresenterError::Config(format!(
                "Invalid log level '{}', must be one of: {:?}",
                self.general.log_level,
                valid_log_levels
            )));
        }

        Ok(())
    }

    /// Get system config file path
    fn system_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        return Some(PathBuf::from("/etc/evr-presenter/config.toml"));

        #[cfg(target_os = "windows")]
        return std::env::var("PROGRAMDATA").ok()
            .map(|p| PathBuf::from(p).join("EvrPresenter").join("config.toml"));

        #[cfg(target_os = "macos")]
        return Some(PathBuf::from("/Library/Application Support/EvrPresenter/config.toml"));

        #[allow(unreachable_code)]
        None
    }

    /// Get user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        return dirs::config_dir()
            .map(|p| p.join("evr-presenter").join("config.toml"));

        #[cfg(not(target_os = "linux"))]
        return dirs::config_dir()
            .map(|p| p.join("EvrPresenter").join("config.toml"));
    }
}
