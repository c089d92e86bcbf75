//! Cycling Power Service (CPS) measurement parsing.
//!
//! Decodes Cycling Power Measurement (0x2A63) notifications into power and
//! revolution counters. The field layout is flag-driven; fields the engine
//! does not consume are skipped over so the revolution data keeps its
//! correct offset.

use crate::sensors::types::SensorSample;
use uuid::Uuid;

/// Cycling Power Service UUID (0x1818)
pub const CYCLING_POWER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1818_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Measurement UUID (0x2A63)
pub const CYCLING_POWER_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a63_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Measurement flags (first 2 bytes).
#[derive(Debug, Clone, Copy)]
struct MeasurementFlags {
    /// Pedal power balance present (bit 0)
    power_balance_present: bool,
    /// Accumulated torque present (bit 2)
    torque_present: bool,
    /// Wheel revolution data present (bit 4)
    wheel_data_present: bool,
    /// Crank revolution data present (bit 5)
    crank_data_present: bool,
}

impl MeasurementFlags {
    fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 2 {
            return None;
        }

        let flags = u16::from_le_bytes([data[0], data[1]]);

        Some(Self {
            power_balance_present: (flags & 0x0001) != 0,
            torque_present: (flags & 0x0004) != 0,
            wheel_data_present: (flags & 0x0010) != 0,
            crank_data_present: (flags & 0x0020) != 0,
        })
    }
}

/// Wheel revolution data from a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelRevolutionData {
    /// Cumulative wheel revolutions (32-bit counter)
    pub cumulative_revolutions: u32,
    /// Last wheel event time in 1/2048 s
    pub last_event_time: u16,
}

/// Crank revolution data from a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrankRevolutionData {
    /// Cumulative crank revolutions (16-bit counter)
    pub cumulative_revolutions: u16,
    /// Last crank event time in 1/1024 s
    pub last_event_time: u16,
}

/// Parsed Cycling Power Measurement notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CyclingPowerMeasurement {
    /// Instantaneous power in watts (signed per the characteristic)
    pub power_watts: i16,
    /// Wheel revolution data (if present)
    pub wheel: Option<WheelRevolutionData>,
    /// Crank revolution data (if present)
    pub crank: Option<CrankRevolutionData>,
}

impl CyclingPowerMeasurement {
    /// Convert to an engine sample.
    ///
    /// Requires crank revolution data; negative power readings are clamped
    /// to zero.
    pub fn to_sample(&self) -> Option<SensorSample> {
        let crank = self.crank?;

        Some(SensorSample {
            instantaneous_power: self.power_watts.max(0) as u16,
            cumulative_revolutions: crank.cumulative_revolutions,
            event_timestamp: crank.last_event_time,
        })
    }
}

/// Parse a Cycling Power Measurement notification.
///
/// The data format is:
/// - Bytes 0-1: Flags (indicates which fields are present)
/// - Bytes 2-3: Instantaneous power (sint16)
/// - Remaining bytes: Data fields in order based on flags
pub fn parse_cycling_power_measurement(data: &[u8]) -> Option<CyclingPowerMeasurement> {
    let flags = MeasurementFlags::from_bytes(data)?;

    if data.len() < 4 {
        return None;
    }

    let power_watts = i16::from_le_bytes([data[2], data[3]]);

    let mut result = CyclingPowerMeasurement {
        power_watts,
        ..Default::default()
    };

    let mut offset = 4usize;

    // Pedal Power Balance (1 byte, not consumed)
    if flags.power_balance_present {
        if offset + 1 > data.len() {
            return Some(result);
        }
        offset += 1;
    }

    // Accumulated Torque (2 bytes, not consumed)
    if flags.torque_present {
        if offset + 2 > data.len() {
            return Some(result);
        }
        offset += 2;
    }

    // Wheel Revolution Data (4 bytes revolutions + 2 bytes event time)
    if flags.wheel_data_present {
        if offset + 6 > data.len() {
            return Some(result);
        }
        let revolutions = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        let event_time = u16::from_le_bytes([data[offset + 4], data[offset + 5]]);
        result.wheel = Some(WheelRevolutionData {
            cumulative_revolutions: revolutions,
            last_event_time: event_time,
        });
        offset += 6;
    }

    // Crank Revolution Data (2 bytes revolutions + 2 bytes event time)
    if flags.crank_data_present {
        if offset + 4 > data.len() {
            return Some(result);
        }
        let revolutions = u16::from_le_bytes([data[offset], data[offset + 1]]);
        let event_time = u16::from_le_bytes([data[offset + 2], data[offset + 3]]);
        result.crank = Some(CrankRevolutionData {
            cumulative_revolutions: revolutions,
            last_event_time: event_time,
        });
    }

    Some(result)
}
