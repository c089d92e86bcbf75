//! Published metrics snapshot and its wire shape.
//!
//! The serialized field names and precisions are the contract consumed by
//! display clients; extra fields are ignored by consumers.

use crate::engine::energy::JOULES_PER_WATT_HOUR;
use crate::engine::grade::GradeEvaluation;
use crate::engine::rate::RateUpdate;
use crate::sensors::types::SensorSample;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One immutable, fully populated metrics record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Rider power in watts
    pub power: u16,
    /// Cadence in RPM, 1 decimal
    pub cadence: f64,
    /// Total distance in meters, 2 decimals
    pub distance: f64,
    /// Raw cumulative revolution counter
    pub revolutions: u16,
    /// Simulated slope in percent, 1 decimal, signed
    pub grade: f64,
    /// Power commanded to the trainer in watts
    pub target_power: f64,
    /// Recharge power in watts, clamped to >= 0, 2 decimals
    pub power_recharge: f64,
    /// Stored energy in joules, 2 decimals
    pub energy_recharged_j: f64,
    /// Stored energy in watt-hours, 4 decimals
    pub energy_recharged_wh: f64,
    /// When the snapshot was assembled
    pub timestamp: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Assemble a snapshot from the latest engine outputs.
    ///
    /// The watt-hour figure is derived from joules here and stored nowhere
    /// else.
    pub fn assemble(
        sample: &SensorSample,
        rate: &RateUpdate,
        total_distance_m: f64,
        eval: &GradeEvaluation,
        energy_joules: f64,
    ) -> Self {
        Self {
            power: sample.instantaneous_power,
            cadence: round_dp(rate.cadence_rpm, 1),
            distance: round_dp(total_distance_m, 2),
            revolutions: sample.cumulative_revolutions,
            grade: round_dp(eval.grade_pct, 1),
            target_power: eval.target_power_w,
            power_recharge: round_dp(eval.recharge_power_clamped(), 2),
            energy_recharged_j: round_dp(energy_joules, 2),
            energy_recharged_wh: round_dp(energy_joules / JOULES_PER_WATT_HOUR, 4),
            timestamp: Utc::now(),
        }
    }
}

/// Round to the given number of decimal places.
fn round_dp(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> MetricsSnapshot {
        let sample = SensorSample {
            instantaneous_power: 185,
            cumulative_revolutions: 1010,
            event_timestamp: 1024,
        };
        let rate = RateUpdate {
            cadence_rpm: 600.04,
            distance_delta_m: 19.54,
        };
        let eval = GradeEvaluation {
            grade_pct: -3.04,
            target_power_w: 180.0,
            recharge_power_w: -21.0,
        };

        MetricsSnapshot::assemble(&sample, &rate, 19.5417, &eval, 7240.123)
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(snapshot()).unwrap();
        let object = json.as_object().unwrap();

        for field in [
            "power",
            "cadence",
            "distance",
            "revolutions",
            "grade",
            "target_power",
            "power_recharge",
            "energy_recharged_j",
            "energy_recharged_wh",
            "timestamp",
        ] {
            assert!(object.contains_key(field), "missing field {field}");
        }
    }

    #[test]
    fn test_values_are_rounded_for_the_wire() {
        let snapshot = snapshot();

        assert_eq!(snapshot.power, 185);
        assert_eq!(snapshot.cadence, 600.0);
        assert_eq!(snapshot.distance, 19.54);
        assert_eq!(snapshot.revolutions, 1010);
        assert_eq!(snapshot.grade, -3.0);
        assert_eq!(snapshot.target_power, 180.0);
        assert_eq!(snapshot.energy_recharged_j, 7240.12);
    }

    #[test]
    fn test_recharge_is_clamped_non_negative() {
        assert_eq!(snapshot().power_recharge, 0.0);
    }

    #[test]
    fn test_watt_hours_match_joules() {
        let snapshot = snapshot();

        let expected = round_dp(7240.123 / 3600.0, 4);
        assert_eq!(snapshot.energy_recharged_wh, expected);
    }
}
