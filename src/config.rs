use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ClockworkError, Result};

/// User settings persisted between launches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Render the seconds field of the clock
    pub show_seconds: bool,

    /// 24-hour clock instead of 12-hour with AM/PM
    pub use_24_hour_time: bool,

    /// Now-playing polling interval in seconds
    pub poll_interval_secs: u64,

    /// Interval between release checks in seconds
    pub update_check_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            show_seconds: true,
            use_24_hour_time: true,
            poll_interval_secs: 1,
            update_check_interval_secs: 6 * 60 * 60,
        }
    }
}

impl AppConfig {
    /// Get the path to the config directory
    fn config_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| ClockworkError::ConfigError("HOME environment variable not set".to_string()))?;

        #[cfg(target_os = "macos")]
        let config_path = PathBuf::from(home)
            .join("Library")
            .join("Application Support")
            .join("com.clockwork");

        #[cfg(not(target_os = "macos"))]
        let config_path = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home).join(".config"))
            .join("clockwork");

        Ok(config_path)
    }

    /// Get the path to the config file
    fn config_file_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load configuration from the per-user location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    /// Save configuration to the per-user location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    /// Load configuration from `path`, or return defaults if the file doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        // Read and parse config file
        let contents = fs::read_to_string(path)
            .map_err(|e| ClockworkError::ConfigError(format!("Failed to read config file: {}", e)))?;

        match serde_json::from_str(&contents) {
            Ok(config) => {
                log::info!("Loaded configuration from {:?}", path);
                Ok(config)
            }
            Err(e) => {
                log::warn!("Failed to parse config file ({}), using defaults", e);
                Ok(Self::default())
            }
        }
    }

    /// Save configuration to `path`, creating the parent directory if needed
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure config directory exists
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| {
                    ClockworkError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
                log::info!("Created config directory at {:?}", dir);
            }
        }

        // Serialize config to JSON
        let json = serde_json::to_string_pretty(self)?;

        // Write to file
        fs::write(path, json)
            .map_err(|e| ClockworkError::ConfigError(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}
