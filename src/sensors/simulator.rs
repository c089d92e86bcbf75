//! Deterministic synthetic data path for sessions without a sensor.
//!
//! When the sensor is unavailable at session start the engine falls back
//! to this generator, so downstream consumers observe an uninterrupted
//! stream of the same shape. Samples are derived from the step index
//! alone: two runs with the same settings emit identical sequences.

use crate::engine::control::{ActuatorError, TrainerActuator};
use crate::sensors::types::SensorSample;
use std::time::Duration;
use tokio::sync::mpsc;

/// Crank event time runs at 1024 ticks per second.
const EVENT_TIME_HZ: f64 = 1024.0;

/// Deterministic sample generator substituting for a missing sensor.
///
/// Emits one sample per tick: revolution increments of 3..=5 and a power
/// reading fluctuating around the base power, both taken from sinusoids of
/// the step index. The samples flow through the same decode path as real
/// notifications, counters and all.
#[derive(Debug)]
pub struct SimulatedSensor {
    base_power_w: f64,
    tick_interval: Duration,
    step: u64,
    cumulative_revolutions: u16,
    event_timestamp: u16,
}

impl SimulatedSensor {
    /// Create a generator emitting one sample per tick interval.
    pub fn new(base_power_w: f64, tick_interval: Duration) -> Self {
        Self {
            base_power_w,
            tick_interval,
            step: 0,
            cumulative_revolutions: 0,
            event_timestamp: 0,
        }
    }

    /// Generate the next sample.
    pub fn next_sample(&mut self) -> SensorSample {
        self.step += 1;
        let step = self.step as f64;

        // Revolution increments between 3 and 5 per tick
        let delta_revs = 3 + (step.sin() + 1.0) as u16;
        self.cumulative_revolutions = self.cumulative_revolutions.wrapping_add(delta_revs);

        let delta_ticks = (self.tick_interval.as_secs_f64() * EVENT_TIME_HZ).round() as u16;
        self.event_timestamp = self.event_timestamp.wrapping_add(delta_ticks);

        let power = self.base_power_w + 20.0 * (step / 3.0).sin();

        SensorSample {
            instantaneous_power: power.max(0.0).round() as u16,
            cumulative_revolutions: self.cumulative_revolutions,
            event_timestamp: self.event_timestamp,
        }
    }

    /// Spawn the generator, emitting one sample per tick into a channel.
    pub fn spawn(mut self) -> mpsc::Receiver<SensorSample> {
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if tx.send(self.next_sample()).await.is_err() {
                    // Consumer gone, session over
                    break;
                }
            }
        });

        rx
    }
}

/// Trainer stand-in for the simulated path: always ready, commands are
/// accepted and logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedTrainer;

impl TrainerActuator for SimulatedTrainer {
    async fn prepare(&self) -> Result<(), ActuatorError> {
        tracing::info!("simulated trainer ready");
        Ok(())
    }

    async fn set_simulated_grade(&self, grade_pct: f64) -> Result<(), ActuatorError> {
        tracing::debug!("simulated trainer grade {:.1}%", grade_pct);
        Ok(())
    }

    async fn set_target_power(&self, watts: u16) -> Result<(), ActuatorError> {
        tracing::debug!("simulated trainer target power {}W", watts);
        Ok(())
    }
}
