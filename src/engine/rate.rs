//! Crank revolution rate computation.
//!
//! Turns the cumulative counters of the power sensor (crank revolutions,
//! crank event time) into cadence and incremental distance. Both counters
//! are 16-bit and wrap; deltas are taken with modular arithmetic so cadence
//! stays correct across roll-over.

use crate::sensors::types::SensorSample;

/// Crank event time runs at 1024 ticks per second.
const EVENT_TIME_HZ: f64 = 1024.0;

/// A wrapped revolution delta at or above this value cannot be a plausible
/// inter-sample advance; it means the counter went backwards and the sensor
/// reset.
const REV_RESET_THRESHOLD: u16 = 0x8000;

/// Output of a single rate update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateUpdate {
    /// Pedaling rate in revolutions per minute
    pub cadence_rpm: f64,
    /// Distance advanced by this sample in meters
    pub distance_delta_m: f64,
}

/// Converts cumulative revolution counters into cadence and distance.
///
/// Owns the rolling counter state for one session. Invalid samples
/// (duplicate timestamps, counter resets) degrade to a zero-contribution
/// result rather than an error, so a single malformed sample never blocks
/// the live stream; the state is always re-baselined on the newest sample.
#[derive(Debug)]
pub struct RateComputer {
    /// Wheel circumference in meters
    wheel_circumference_m: f64,
    /// Counter value of the previous sample
    last_revolutions: Option<u16>,
    /// Event time of the previous sample (1/1024 s)
    last_event_timestamp: Option<u16>,
    /// Accumulated distance in meters, non-decreasing
    total_distance_m: f64,
}

impl RateComputer {
    /// Create a rate computer with the given wheel circumference in meters.
    pub fn new(wheel_circumference_m: f64) -> Self {
        Self {
            wheel_circumference_m,
            last_revolutions: None,
            last_event_timestamp: None,
            total_distance_m: 0.0,
        }
    }

    /// Process one sensor sample and return its cadence/distance contribution.
    pub fn update(&mut self, sample: &SensorSample) -> RateUpdate {
        let update = match (self.last_revolutions, self.last_event_timestamp) {
            (Some(last_revs), Some(last_time)) => {
                self.compute_delta(sample, last_revs, last_time)
            }
            // First sample is the baseline
            _ => RateUpdate::default(),
        };

        self.last_revolutions = Some(sample.cumulative_revolutions);
        self.last_event_timestamp = Some(sample.event_timestamp);

        update
    }

    fn compute_delta(&mut self, sample: &SensorSample, last_revs: u16, last_time: u16) -> RateUpdate {
        let delta_revs = sample.cumulative_revolutions.wrapping_sub(last_revs);
        let delta_ticks = sample.event_timestamp.wrapping_sub(last_time);

        if delta_revs >= REV_RESET_THRESHOLD {
            tracing::debug!(
                "revolution counter reset ({} -> {}), re-baselining",
                last_revs,
                sample.cumulative_revolutions
            );
            return RateUpdate::default();
        }

        if delta_ticks == 0 {
            // Duplicate or repeated event time
            return RateUpdate::default();
        }

        let delta_time_s = f64::from(delta_ticks) / EVENT_TIME_HZ;
        let cadence_rpm = f64::from(delta_revs) / delta_time_s * 60.0;
        let distance_delta_m = f64::from(delta_revs) * self.wheel_circumference_m;
        self.total_distance_m += distance_delta_m;

        RateUpdate {
            cadence_rpm,
            distance_delta_m,
        }
    }

    /// Total distance accumulated this session in meters.
    pub fn total_distance_m(&self) -> f64 {
        self.total_distance_m
    }
}
