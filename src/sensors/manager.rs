//! BLE link to the power sensor / trainer.
//!
//! Connects to a configured device address, subscribes to the Cycling
//! Power Measurement characteristic and streams decoded samples to the
//! session engine over an async channel.

use crate::sensors::cps::{
    parse_cycling_power_measurement, CYCLING_POWER_MEASUREMENT_UUID, CYCLING_POWER_SERVICE_UUID,
};
use crate::sensors::ftms::FTMS_SERVICE_UUID;
use crate::sensors::types::{ConnectionState, SensorError, SensorSample};
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Capacity of the sample channel. Decoding keeps up at sensor notification
/// rates; the bound only guards against a stalled consumer.
const SAMPLE_CHANNEL_CAPACITY: usize = 64;

/// How often the scan results are polled for the configured device.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A connected BLE link delivering sensor samples.
pub struct SensorLink {
    peripheral: Peripheral,
    state: ConnectionState,
}

impl SensorLink {
    /// Connect to the sensor at the given device address.
    pub async fn connect(device_id: &str, timeout: Duration) -> Result<Self, SensorError> {
        let manager = Manager::new()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(SensorError::AdapterNotFound)?;

        tracing::info!("connecting to sensor: {}", device_id);

        let peripheral = Self::find_peripheral(&adapter, device_id, timeout).await?;

        tokio::time::timeout(timeout, peripheral.connect())
            .await
            .map_err(|_| SensorError::ConnectionTimeout)?
            .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;

        peripheral
            .discover_services()
            .await
            .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;

        tracing::info!("connected to sensor: {}", device_id);

        Ok(Self {
            peripheral,
            state: ConnectionState::Connected,
        })
    }

    /// Scan for the configured device until it shows up or the timeout
    /// expires. The scan is filtered to the cycling services this engine
    /// speaks.
    async fn find_peripheral(
        adapter: &Adapter,
        device_id: &str,
        timeout: Duration,
    ) -> Result<Peripheral, SensorError> {
        let filter = ScanFilter {
            services: vec![CYCLING_POWER_SERVICE_UUID, FTMS_SERVICE_UUID],
        };

        adapter
            .start_scan(filter)
            .await
            .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + timeout;
        let found = loop {
            let peripherals = adapter
                .peripherals()
                .await
                .map_err(|e| SensorError::BleError(e.to_string()))?;

            if let Some(peripheral) = peripherals
                .into_iter()
                .find(|p| p.id().to_string() == device_id)
            {
                break Some(peripheral);
            }

            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        };

        let _ = adapter.stop_scan().await;

        found.ok_or_else(|| SensorError::SensorNotFound(device_id.to_string()))
    }

    /// Subscribe to power measurement notifications and stream samples.
    ///
    /// Notifications without crank revolution data are skipped at debug
    /// level. The returned receiver closes when the notification stream
    /// ends (peripheral disconnected).
    pub async fn sample_stream(&self) -> Result<mpsc::Receiver<SensorSample>, SensorError> {
        let characteristic = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == CYCLING_POWER_MEASUREMENT_UUID)
            .ok_or(SensorError::Unsupported)?;

        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))?;

        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))?;

        tracing::info!("subscribed to power measurement notifications");

        let (tx, rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != CYCLING_POWER_MEASUREMENT_UUID {
                    continue;
                }

                let measurement = match parse_cycling_power_measurement(&notification.value) {
                    Some(measurement) => measurement,
                    None => {
                        tracing::debug!(
                            "unparseable power measurement ({} bytes)",
                            notification.value.len()
                        );
                        continue;
                    }
                };

                let sample = match measurement.to_sample() {
                    Some(sample) => sample,
                    None => {
                        tracing::debug!("power measurement without crank data, skipping");
                        continue;
                    }
                };

                // try_send keeps a stalled consumer from blocking the
                // notification stream; the telemetry is live, not a log
                if tx.try_send(sample).is_err() {
                    if tx.is_closed() {
                        break;
                    }
                    tracing::debug!("sample channel full, dropping sample");
                }
            }

            tracing::info!("sensor notification stream ended");
        });

        Ok(rx)
    }

    /// Clone of the underlying peripheral, for the trainer actuator.
    pub fn peripheral(&self) -> Peripheral {
        self.peripheral.clone()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Disconnect the link.
    pub async fn disconnect(&mut self) -> Result<(), SensorError> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        self.state = ConnectionState::Disconnected;
        tracing::info!("sensor disconnected");

        Ok(())
    }
}
