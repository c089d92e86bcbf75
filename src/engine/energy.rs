//! Recharge energy accumulation.

use std::time::Instant;

/// Joules per watt-hour, for the reporting conversion.
pub const JOULES_PER_WATT_HOUR: f64 = 3600.0;

/// Integrates recharge power over wall-clock time into stored energy.
///
/// Joules are the single source of truth; the watt-hour figure is derived
/// at reporting time, never stored. The total never decreases: recharge
/// power is clamped to >= 0 before integration and an out-of-order
/// timestamp contributes a zero interval.
#[derive(Debug)]
pub struct EnergyAccumulator {
    /// When the session started
    session_start: Instant,
    /// Time of the previous accumulation
    last_accumulation: Instant,
    /// Stored energy in joules, non-decreasing
    energy_joules: f64,
}

impl EnergyAccumulator {
    /// Create an accumulator anchored at the session start time.
    pub fn new(session_start: Instant) -> Self {
        Self {
            session_start,
            last_accumulation: session_start,
            energy_joules: 0.0,
        }
    }

    /// Integrate the given recharge power up to `now` and return the total.
    pub fn accumulate(&mut self, recharge_power_w: f64, now: Instant) -> f64 {
        let delta_t = now
            .saturating_duration_since(self.last_accumulation)
            .as_secs_f64();

        self.energy_joules += recharge_power_w.max(0.0) * delta_t;
        self.last_accumulation = now;

        self.energy_joules
    }

    /// Stored energy in joules.
    pub fn energy_joules(&self) -> f64 {
        self.energy_joules
    }

    /// Stored energy in watt-hours, derived from joules at call time.
    pub fn energy_watt_hours(&self) -> f64 {
        self.energy_joules / JOULES_PER_WATT_HOUR
    }

    /// Session start this accumulator is anchored to.
    pub fn session_start(&self) -> Instant {
        self.session_start
    }
}
