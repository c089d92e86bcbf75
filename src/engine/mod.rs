//! Telemetry decoding and closed-loop simulation engine.

pub mod control;
pub mod energy;
pub mod grade;
pub mod rate;
pub mod session;
pub mod snapshot;

pub use control::{
    ActuatorError, ControlLoop, ControlLoopConfig, LoopState, TickEvaluation, TrainerActuator,
};
pub use energy::EnergyAccumulator;
pub use grade::{GradeEvaluation, GradeSimulator};
pub use rate::{RateComputer, RateUpdate};
pub use session::{SessionEngine, SessionSummary, SnapshotSink};
pub use snapshot::MetricsSnapshot;
