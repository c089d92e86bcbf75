//! FTMS trainer actuator over the control point.

use crate::engine::control::{ActuatorError, TrainerActuator};
use crate::sensors::ftms::{
    build_request_control, build_reset, build_set_simulation, build_set_target_power,
    grade_to_simulation_units, FTMS_CONTROL_POINT_UUID,
};
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;

/// Smart trainer commanded over the FTMS control point.
pub struct BleTrainer {
    peripheral: Peripheral,
}

impl BleTrainer {
    /// Wrap a connected peripheral exposing the FTMS control point.
    pub fn new(peripheral: Peripheral) -> Self {
        Self { peripheral }
    }

    fn control_point(&self) -> Result<Characteristic, ActuatorError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == FTMS_CONTROL_POINT_UUID)
            .ok_or_else(|| ActuatorError::NotReady("FTMS control point not exposed".to_string()))
    }

    async fn write_command(&self, command: &[u8]) -> Result<(), ActuatorError> {
        let characteristic = self.control_point()?;

        self.peripheral
            .write(&characteristic, command, WriteType::WithResponse)
            .await
            .map_err(|e| ActuatorError::WriteFailed(e.to_string()))
    }
}

impl TrainerActuator for BleTrainer {
    async fn prepare(&self) -> Result<(), ActuatorError> {
        self.write_command(&build_request_control()).await?;
        self.write_command(&build_reset()).await?;

        tracing::info!("trainer control acquired");
        Ok(())
    }

    async fn set_simulated_grade(&self, grade_pct: f64) -> Result<(), ActuatorError> {
        let command = build_set_simulation(0, grade_to_simulation_units(grade_pct), 0, 0);
        self.write_command(&command).await?;

        tracing::debug!("simulated grade set to {:.1}%", grade_pct);
        Ok(())
    }

    async fn set_target_power(&self, watts: u16) -> Result<(), ActuatorError> {
        self.write_command(&build_set_target_power(watts)).await?;

        tracing::debug!("target power set to {}W", watts);
        Ok(())
    }
}
