//! Session orchestration: sample decoding and snapshot publication.
//!
//! Two tasks share the session: the sample consumer (sole owner of the
//! rate state) and the control loop (sole owner of the simulation state).
//! Each incoming sample produces at most one published snapshot; snapshots
//! reuse the most recent control tick's grade evaluation so the publisher
//! and the trainer command never disagree.

use crate::config::{SensorSettings, SimulationSettings};
use crate::engine::control::{ControlLoop, ControlLoopConfig, TickEvaluation, TrainerActuator};
use crate::engine::energy::EnergyAccumulator;
use crate::engine::grade::GradeSimulator;
use crate::engine::rate::RateComputer;
use crate::engine::snapshot::MetricsSnapshot;
use crate::sensors::types::SensorSample;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};

/// Fire-and-forget snapshot consumer.
///
/// Ownership of the snapshot transfers on publish; the engine keeps no
/// reference afterwards. Implementations must not block the caller.
pub trait SnapshotSink: Send + Sync {
    /// Hand one snapshot to the broadcast collaborator.
    fn publish(&self, snapshot: MetricsSnapshot);
}

/// Totals flushed when a session ends.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// Samples decoded during the session
    pub samples_processed: u64,
    /// Total distance in meters
    pub total_distance_m: f64,
    /// Stored energy in joules
    pub energy_joules: f64,
    /// Stored energy in watt-hours
    pub energy_watt_hours: f64,
}

/// Wires the rate computer, control loop and publisher together for one
/// session.
pub struct SessionEngine<A: TrainerActuator, S: SnapshotSink> {
    simulator: GradeSimulator,
    control_config: ControlLoopConfig,
    rate: RateComputer,
    actuator: A,
    sink: S,
}

impl<A, S> SessionEngine<A, S>
where
    A: TrainerActuator + 'static,
    S: SnapshotSink,
{
    /// Create a session engine from the configured settings.
    pub fn new(
        simulation: &SimulationSettings,
        sensor: &SensorSettings,
        actuator: A,
        sink: S,
    ) -> Self {
        Self {
            simulator: GradeSimulator::new(simulation),
            control_config: ControlLoopConfig {
                tick_interval: Duration::from_millis(simulation.tick_interval_ms),
                session_duration: Duration::from_secs(simulation.session_duration_secs),
                command_timeout: Duration::from_millis(sensor.command_timeout_ms),
                handshake_retry_delay: Duration::from_millis(sensor.handshake_retry_delay_ms),
            },
            rate: RateComputer::new(simulation.wheel_circumference_m),
            actuator,
            sink,
        }
    }

    /// Run the session to completion.
    ///
    /// Consumes samples until the session duration elapses, the sample
    /// source closes, or `cancel` flips. Accumulated totals survive
    /// cancellation; they are flushed into the returned summary.
    pub async fn run(
        self,
        mut samples: mpsc::Receiver<SensorSample>,
        mut cancel: watch::Receiver<bool>,
    ) -> SessionSummary {
        let Self {
            simulator,
            control_config,
            mut rate,
            actuator,
            sink,
        } = self;

        let session_start = Instant::now();
        let energy = Arc::new(Mutex::new(EnergyAccumulator::new(session_start)));
        let (tick_tx, tick_rx) = watch::channel(None::<TickEvaluation>);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let control = ControlLoop::new(
            control_config.clone(),
            simulator,
            actuator,
            energy.clone(),
            tick_tx,
        );
        let control_task = tokio::spawn(control.run(session_start, shutdown_rx));

        let deadline = tokio::time::sleep(control_config.session_duration);
        tokio::pin!(deadline);

        let mut samples_processed = 0u64;

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::info!("session duration elapsed");
                    break;
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        tracing::info!("session cancelled");
                        break;
                    }
                }
                maybe_sample = samples.recv() => {
                    match maybe_sample {
                        Some(sample) => {
                            samples_processed += 1;
                            publish_sample(
                                &mut rate,
                                &simulator,
                                &sink,
                                &sample,
                                session_start,
                                &tick_rx,
                                &energy,
                            )
                            .await;
                        }
                        None => {
                            tracing::warn!("sample source closed");
                            break;
                        }
                    }
                }
            }
        }

        let _ = shutdown_tx.send(true);
        let _ = control_task.await;

        let energy = energy.lock().await;
        let summary = SessionSummary {
            samples_processed,
            total_distance_m: rate.total_distance_m(),
            energy_joules: energy.energy_joules(),
            energy_watt_hours: energy.energy_watt_hours(),
        };

        tracing::info!(
            "session complete: {} samples, {:.2} m, {:.2} J",
            summary.samples_processed,
            summary.total_distance_m,
            summary.energy_joules
        );

        summary
    }
}

/// Decode one sample and publish its snapshot.
///
/// Called from the single sample-consumer task, so each invocation is
/// transactional against the rate state: the update completes before the
/// next sample is taken off the channel.
async fn publish_sample<S: SnapshotSink>(
    rate: &mut RateComputer,
    simulator: &GradeSimulator,
    sink: &S,
    sample: &SensorSample,
    session_start: Instant,
    tick_rx: &watch::Receiver<Option<TickEvaluation>>,
    energy: &Arc<Mutex<EnergyAccumulator>>,
) {
    let update = rate.update(sample);

    // Reuse the most recent control tick's evaluation; before the first
    // tick, evaluate fresh at the current elapsed time.
    let eval = match *tick_rx.borrow() {
        Some(tick) => tick.eval,
        None => simulator.evaluate(session_start.elapsed().as_secs_f64()),
    };

    let energy_joules = energy.lock().await.energy_joules();

    let snapshot =
        MetricsSnapshot::assemble(sample, &update, rate.total_distance_m(), &eval, energy_joules);
    sink.publish(snapshot);
}
