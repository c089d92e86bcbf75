//! Sensor sample, state and error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One raw telemetry sample from the cycling power sensor.
///
/// The counters are the device's own cumulative 16-bit values: revolutions
/// wrap at 2^16 and the event timestamp runs on the device clock at
/// 1/1024 s, wrapping every 64 s. Deltas between samples must therefore be
/// taken with modular arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Instantaneous power in watts (negative readings clamped to zero)
    pub instantaneous_power: u16,
    /// Cumulative crank revolutions
    pub cumulative_revolutions: u16,
    /// Last crank event time in 1/1024 s
    pub event_timestamp: u16,
}

/// Connection state of the sensor link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Active connection
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Errors from the sensor link.
#[derive(Debug, Error)]
pub enum SensorError {
    /// BLE adapter not found or unavailable
    #[error("Bluetooth adapter not found")]
    AdapterNotFound,

    /// Sensor not found with given device ID
    #[error("Sensor not found: {0}")]
    SensorNotFound(String),

    /// Connection to sensor failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timed out
    #[error("Connection timed out")]
    ConnectionTimeout,

    /// Failed to subscribe to sensor notifications
    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    /// Required characteristic not exposed by the device
    #[error("Required characteristic not available")]
    Unsupported,

    /// Generic BLE error
    #[error("BLE error: {0}")]
    BleError(String),
}
