//! Application configuration.
//!
//! Loaded from a TOML file in the platform config directory. A missing file
//! yields a fully usable default configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Grade simulation parameters
    pub simulation: SimulationSettings,
    /// Sensor link settings
    pub sensor: SensorSettings,
    /// Relay server settings
    pub broadcast: BroadcastSettings,
}

/// Grade simulation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Baseline target power in watts
    pub base_power_w: f64,
    /// Peak simulated slope in percent
    pub grade_amplitude_pct: f64,
    /// Period of one full grade oscillation in seconds
    pub grade_period_secs: f64,
    /// Watts added per percent of descent to simulate engine braking
    pub grade_to_power_factor: f64,
    /// Fraction of braking power recovered into stored energy (0..=1)
    pub efficiency: f64,
    /// Wheel circumference in meters
    pub wheel_circumference_m: f64,
    /// Session length in seconds
    pub session_duration_secs: u64,
    /// Control loop tick interval in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            base_power_w: 150.0,
            grade_amplitude_pct: 5.0,
            grade_period_secs: 60.0,
            grade_to_power_factor: 10.0,
            efficiency: 0.7,
            // 622 mm rim, circumference in meters
            wheel_circumference_m: 622.0 * std::f64::consts::PI / 1000.0,
            session_duration_secs: 150,
            tick_interval_ms: 1000,
        }
    }
}

/// Sensor link settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// BLE device address of the power sensor / trainer.
    ///
    /// When absent the session runs against the simulated data path.
    pub device_address: Option<String>,
    /// Timeout for the connection attempt in seconds
    pub connection_timeout_secs: u64,
    /// Bound on each trainer command in milliseconds
    pub command_timeout_ms: u64,
    /// Delay between trainer handshake attempts in milliseconds
    pub handshake_retry_delay_ms: u64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            device_address: None,
            connection_timeout_secs: 10,
            command_timeout_ms: 2000,
            handshake_retry_delay_ms: 2000,
        }
    }
}

/// Relay server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    /// Whether the relay accepts display clients
    pub enabled: bool,
    /// Port to listen on
    pub port: u16,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 5001,
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "velowatt", "Velowatt")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load configuration from the default path.
///
/// A missing file is not an error; it yields the default configuration.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load configuration from the given path.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Save configuration to the given path.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
