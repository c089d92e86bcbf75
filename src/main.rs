//! Velowatt - BLE Cycling Telemetry & Grade Simulation Engine
//!
//! Main entry point: wires configuration, the relay server and the sensor
//! link (or its synthetic stand-in) into one telemetry session.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use velowatt::broadcast::{RelayHandle, RelayServer};
use velowatt::config::{self, AppConfig};
use velowatt::engine::session::{SessionEngine, SessionSummary};
use velowatt::sensors::manager::SensorLink;
use velowatt::sensors::simulator::{SimulatedSensor, SimulatedTrainer};
use velowatt::sensors::trainer::BleTrainer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Velowatt v{}", env!("CARGO_PKG_VERSION"));

    let config = match config::load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("config load failed, using defaults: {}", e);
            AppConfig::default()
        }
    };

    let relay = RelayServer::new(config.broadcast.port);
    let sink = relay.handle();
    if config.broadcast.enabled {
        if let Err(e) = relay.start().await {
            tracing::warn!("relay unavailable, snapshots will be dropped: {}", e);
        }
    }

    // Ctrl-C cancels the session; accumulated totals are still flushed
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping session");
            let _ = cancel_tx.send(true);
        }
    });

    let summary = run_session(&config, sink, cancel_rx).await;

    tracing::info!(
        "session summary: {:.2} m over {} samples, {:.2} J ({:.4} Wh) recharged",
        summary.total_distance_m,
        summary.samples_processed,
        summary.energy_joules,
        summary.energy_watt_hours
    );

    Ok(())
}

/// Run one session against the real sensor if it can be reached, the
/// synthetic data path otherwise.
async fn run_session(
    config: &AppConfig,
    sink: RelayHandle,
    cancel: watch::Receiver<bool>,
) -> SessionSummary {
    if let Some(link) = connect_sensor(config).await {
        match link.sample_stream().await {
            Ok(samples) => {
                let trainer = BleTrainer::new(link.peripheral());
                let engine = SessionEngine::new(&config.simulation, &config.sensor, trainer, sink);
                return engine.run(samples, cancel).await;
            }
            Err(e) => {
                tracing::warn!("subscription failed, using simulated data: {}", e);
            }
        }
    }

    run_simulated(config, sink, cancel).await
}

/// Connect to the configured sensor, if any.
async fn connect_sensor(config: &AppConfig) -> Option<SensorLink> {
    let address = config.sensor.device_address.as_deref()?;
    let timeout = Duration::from_secs(config.sensor.connection_timeout_secs);

    match SensorLink::connect(address, timeout).await {
        Ok(link) => Some(link),
        Err(e) => {
            tracing::warn!("sensor unavailable, using simulated data: {}", e);
            None
        }
    }
}

/// Run a session against the deterministic synthetic data path.
async fn run_simulated(
    config: &AppConfig,
    sink: RelayHandle,
    cancel: watch::Receiver<bool>,
) -> SessionSummary {
    let samples = SimulatedSensor::new(
        config.simulation.base_power_w,
        Duration::from_millis(config.simulation.tick_interval_ms),
    )
    .spawn();

    let engine = SessionEngine::new(&config.simulation, &config.sensor, SimulatedTrainer, sink);
    engine.run(samples, cancel).await
}
