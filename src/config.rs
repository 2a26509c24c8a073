//! Configuration management module.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::varian::{MAX_DEVICE_ADDRESS, MAX_WINDOW};

/// Configuration load result.
#[derive(Debug)]
pub enum ConfigLoadResult {
    /// Config loaded successfully.
    Loaded(AppConfig),
    /// Config file missing (first run).
    Missing,
    /// Config file exists but invalid.
    Invalid(ConfigError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub pump: PumpConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TCP serial bridge the controller is attached to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    /// Connect timeout in seconds (default: 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Ceiling on a single response read in seconds (default: 120).
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    120
}

/// Controller addressing and optional extra readouts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PumpConfig {
    /// Device address offset (0 on RS-232).
    #[serde(default)]
    pub device_address: u8,
    /// Numeric window holding the rotation frequency in Hz.
    #[serde(default)]
    pub frequency_window: Option<u16>,
    /// Numeric window holding the power draw in W.
    #[serde(default)]
    pub power_window: Option<u16>,
}

/// Status polling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub reconnect_delay_secs: u64,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG.
    pub level: String,
    /// Directory for daily log files; console only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl AppConfig {
    /// Config file path: platform config directory, else next to the executable.
    pub fn default_path() -> PathBuf {
        if let Some(dirs) = ProjectDirs::from("org", "wiyn", "varian-turbo") {
            return dirs.config_dir().join("config.toml");
        }
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Attempt to load config with detailed result.
    pub fn try_load(path: &Path) -> ConfigLoadResult {
        if !path.exists() {
            return ConfigLoadResult::Missing;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<AppConfig>(&content) {
                Ok(config) => match config.validate() {
                    Ok(()) => ConfigLoadResult::Loaded(config),
                    Err(e) => ConfigLoadResult::Invalid(e),
                },
                Err(e) => ConfigLoadResult::Invalid(ConfigError::Parse(e)),
            },
            Err(e) => ConfigLoadResult::Invalid(ConfigError::Read(e)),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.host.trim().is_empty() {
            return Err(ConfigError::Validation("Bridge host cannot be empty".to_string()));
        }
        if self.bridge.port == 0 {
            return Err(ConfigError::Validation("Bridge port must be greater than 0".to_string()));
        }
        if self.bridge.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Connect timeout must be at least 1 second".to_string(),
            ));
        }
        if self.bridge.read_timeout_secs == 0 {
            return Err(ConfigError::Validation("Read timeout must be at least 1 second".to_string()));
        }
        if self.pump.device_address > MAX_DEVICE_ADDRESS {
            return Err(ConfigError::Validation(format!(
                "Device address cannot exceed {MAX_DEVICE_ADDRESS}"
            )));
        }
        for window in [self.pump.frequency_window, self.pump.power_window].into_iter().flatten() {
            if window > MAX_WINDOW {
                return Err(ConfigError::Validation(format!("Window {window} exceeds {MAX_WINDOW}")));
            }
        }
        if self.monitor.poll_interval_secs < 1 {
            return Err(ConfigError::Validation(
                "Poll interval must be at least 1 second".to_string(),
            ));
        }
        if self.monitor.reconnect_delay_secs < 1 {
            return Err(ConfigError::Validation(
                "Reconnect delay must be at least 1 second".to_string(),
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Validation("Log level cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl BridgeConfig {
    /// Address in `host:port` form.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            reconnect_delay_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}
