//! End-to-end session tests over the synthetic data path.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use velowatt::config::{SensorSettings, SimulationSettings};
use velowatt::engine::control::{ActuatorError, TrainerActuator};
use velowatt::engine::session::{SessionEngine, SnapshotSink};
use velowatt::engine::snapshot::MetricsSnapshot;
use velowatt::sensors::simulator::{SimulatedSensor, SimulatedTrainer};

/// Sink collecting every published snapshot.
#[derive(Clone, Default)]
struct CollectingSink {
    snapshots: Arc<Mutex<Vec<MetricsSnapshot>>>,
}

impl SnapshotSink for CollectingSink {
    fn publish(&self, snapshot: MetricsSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot);
    }
}

/// Trainer whose commands always fail, to exercise the degraded path.
struct FailingTrainer;

impl TrainerActuator for FailingTrainer {
    async fn prepare(&self) -> Result<(), ActuatorError> {
        Ok(())
    }

    async fn set_simulated_grade(&self, _grade_pct: f64) -> Result<(), ActuatorError> {
        Err(ActuatorError::WriteFailed("device busy".to_string()))
    }

    async fn set_target_power(&self, _watts: u16) -> Result<(), ActuatorError> {
        Err(ActuatorError::WriteFailed("device busy".to_string()))
    }
}

fn settings() -> (SimulationSettings, SensorSettings) {
    let mut simulation = SimulationSettings::default();
    simulation.session_duration_secs = 1;
    simulation.tick_interval_ms = 50;
    (simulation, SensorSettings::default())
}

#[tokio::test]
async fn test_simulated_session_streams_snapshots() {
    let (simulation, sensor) = settings();
    let sink = CollectingSink::default();

    let samples =
        SimulatedSensor::new(simulation.base_power_w, Duration::from_millis(50)).spawn();
    let engine = SessionEngine::new(&simulation, &sensor, SimulatedTrainer, sink.clone());
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let summary = engine.run(samples, cancel_rx).await;

    let snapshots = sink.snapshots.lock().unwrap();
    assert!(
        snapshots.len() >= 5,
        "expected a steady stream, got {} snapshots",
        snapshots.len()
    );
    assert_eq!(summary.samples_processed as usize, snapshots.len());
    assert!(summary.total_distance_m > 0.0);
}

#[tokio::test]
async fn test_snapshot_invariants_hold_throughout() {
    let (simulation, sensor) = settings();
    let sink = CollectingSink::default();

    let samples =
        SimulatedSensor::new(simulation.base_power_w, Duration::from_millis(50)).spawn();
    let engine = SessionEngine::new(&simulation, &sensor, SimulatedTrainer, sink.clone());
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    engine.run(samples, cancel_rx).await;

    let snapshots = sink.snapshots.lock().unwrap();
    assert!(!snapshots.is_empty());

    let mut previous_distance = 0.0;
    let mut previous_energy = 0.0;
    for snapshot in snapshots.iter() {
        // Grade stays inside the configured amplitude
        assert!(snapshot.grade.abs() <= simulation.grade_amplitude_pct + 1e-9);

        // Descent raises the target, climbing holds the base
        assert!(snapshot.target_power >= simulation.base_power_w);

        // Recharge and energy are never negative and energy never shrinks
        assert!(snapshot.power_recharge >= 0.0);
        assert!(snapshot.energy_recharged_j >= previous_energy);
        previous_energy = snapshot.energy_recharged_j;

        // Watt-hours track joules (both independently rounded)
        assert!(
            (snapshot.energy_recharged_wh - snapshot.energy_recharged_j / 3600.0).abs() < 1e-3
        );

        // Distance is monotone
        assert!(snapshot.distance >= previous_distance);
        previous_distance = snapshot.distance;
    }
}

#[tokio::test]
async fn test_failing_trainer_never_stops_telemetry() {
    let (simulation, sensor) = settings();
    let sink = CollectingSink::default();

    let samples =
        SimulatedSensor::new(simulation.base_power_w, Duration::from_millis(50)).spawn();
    let engine = SessionEngine::new(&simulation, &sensor, FailingTrainer, sink.clone());
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let summary = engine.run(samples, cancel_rx).await;

    // Snapshots keep flowing even though every trainer command fails
    assert!(sink.snapshots.lock().unwrap().len() >= 5);
    assert!(summary.total_distance_m > 0.0);
}

#[tokio::test]
async fn test_cancelled_session_flushes_totals() {
    let (mut simulation, sensor) = settings();
    simulation.session_duration_secs = 3600;
    let sink = CollectingSink::default();

    let samples =
        SimulatedSensor::new(simulation.base_power_w, Duration::from_millis(20)).spawn();
    let engine = SessionEngine::new(&simulation, &sensor, SimulatedTrainer, sink);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let task = tokio::spawn(engine.run(samples, cancel_rx));
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel_tx.send(true).unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("cancelled session should end promptly")
        .unwrap();

    // Work done before cancellation survives in the summary
    assert!(summary.samples_processed > 0);
    assert!(summary.total_distance_m > 0.0);
}
