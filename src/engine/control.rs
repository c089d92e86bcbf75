//! Fixed-interval control loop driving the trainer actuator.
//!
//! On each tick the loop evaluates the grade oscillator, commands the
//! trainer (simulated grade, then target power) and books the recharge
//! energy. Command failures are logged and never stop the loop; telemetry
//! decoding continues regardless.

use crate::engine::energy::EnergyAccumulator;
use crate::engine::grade::{GradeEvaluation, GradeSimulator};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Mutex};

/// Consecutive command failures before the degraded-mode warning.
const DEGRADED_FAILURE_THRESHOLD: u32 = 3;

/// Actuator command failures. Non-fatal to the loop.
#[derive(Debug, Error)]
pub enum ActuatorError {
    /// Trainer not connected or not ready for commands
    #[error("trainer not ready: {0}")]
    NotReady(String),

    /// Control point write failed
    #[error("command write failed: {0}")]
    WriteFailed(String),

    /// Command did not complete within the bounded timeout
    #[error("command timed out")]
    Timeout,
}

/// Asynchronous trainer commands.
///
/// Every command may fail (device busy, not ready); the control loop logs
/// failures and proceeds, it never escalates them to its caller.
pub trait TrainerActuator: Send + Sync {
    /// Readiness handshake; the loop does not tick until this succeeds.
    fn prepare(&self) -> impl Future<Output = Result<(), ActuatorError>> + Send;

    /// Command the simulated slope in percent.
    fn set_simulated_grade(
        &self,
        grade_pct: f64,
    ) -> impl Future<Output = Result<(), ActuatorError>> + Send;

    /// Command the target power in watts.
    fn set_target_power(&self, watts: u16)
        -> impl Future<Output = Result<(), ActuatorError>> + Send;
}

/// Lifecycle of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    /// Waiting for the actuator-ready handshake
    #[default]
    Idle,
    /// Periodic tick active
    Running,
    /// Session ended; no further commands are issued
    Stopped,
}

/// One control tick's outputs, shared with the metrics publisher so both
/// observe the identical grade at a given instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickEvaluation {
    /// Session elapsed time the oscillator was evaluated at
    pub elapsed_secs: f64,
    /// The grade/power evaluation of this tick
    pub eval: GradeEvaluation,
}

/// Timing knobs for the control loop.
#[derive(Debug, Clone)]
pub struct ControlLoopConfig {
    /// Interval between ticks
    pub tick_interval: Duration,
    /// Session length; the loop stops once elapsed reaches it
    pub session_duration: Duration,
    /// Bound on each actuator command
    pub command_timeout: Duration,
    /// Delay between handshake attempts
    pub handshake_retry_delay: Duration,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            session_duration: Duration::from_secs(150),
            command_timeout: Duration::from_secs(2),
            handshake_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Periodic grade/power command loop.
pub struct ControlLoop<A: TrainerActuator> {
    config: ControlLoopConfig,
    simulator: GradeSimulator,
    actuator: A,
    energy: Arc<Mutex<EnergyAccumulator>>,
    last_tick_tx: watch::Sender<Option<TickEvaluation>>,
    state: LoopState,
    consecutive_failures: u32,
    degraded: bool,
}

impl<A: TrainerActuator> ControlLoop<A> {
    /// Create a control loop around the given actuator.
    pub fn new(
        config: ControlLoopConfig,
        simulator: GradeSimulator,
        actuator: A,
        energy: Arc<Mutex<EnergyAccumulator>>,
        last_tick_tx: watch::Sender<Option<TickEvaluation>>,
    ) -> Self {
        Self {
            config,
            simulator,
            actuator,
            energy,
            last_tick_tx,
            state: LoopState::Idle,
            consecutive_failures: 0,
            degraded: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Whether repeated command failures have degraded the trainer link.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Run the loop until the session duration elapses or `shutdown` flips.
    pub async fn run(mut self, session_start: Instant, mut shutdown: watch::Receiver<bool>) {
        if !self.handshake(&mut shutdown).await {
            self.state = LoopState::Stopped;
            return;
        }

        self.state = LoopState::Running;
        tracing::info!("control loop running");

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while self.state == LoopState::Running {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let elapsed = now.duration_since(session_start);

                    if elapsed >= self.config.session_duration {
                        tracing::info!("session duration elapsed, stopping control loop");
                        self.state = LoopState::Stopped;
                        break;
                    }

                    self.tick(elapsed.as_secs_f64(), now).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.state = LoopState::Stopped;
                    }
                }
            }
        }

        self.state = LoopState::Stopped;
        tracing::info!("control loop stopped");
    }

    /// Retry the readiness handshake until the trainer acknowledges.
    ///
    /// Returns false if the session was cancelled before the trainer came
    /// up; handshake failure alone never aborts the session.
    async fn handshake(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            if *shutdown.borrow() {
                return false;
            }

            match self.bounded(self.actuator.prepare()).await {
                Ok(()) => return true,
                Err(e) => tracing::warn!("trainer handshake failed, retrying: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.handshake_retry_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    /// One control tick: evaluate, command the trainer, book the energy.
    async fn tick(&mut self, elapsed_secs: f64, now: Instant) {
        let eval = self.simulator.evaluate(elapsed_secs);
        tracing::debug!(
            "tick at {:.1}s: grade {:.1}%, target {:.0}W",
            elapsed_secs,
            eval.grade_pct,
            eval.target_power_w
        );

        let result = self
            .bounded(self.actuator.set_simulated_grade(eval.grade_pct))
            .await;
        self.record_outcome("set simulated grade", &result);

        let watts = eval.target_power_w.round().clamp(0.0, f64::from(u16::MAX)) as u16;
        let result = self.bounded(self.actuator.set_target_power(watts)).await;
        self.record_outcome("set target power", &result);

        self.energy
            .lock()
            .await
            .accumulate(eval.recharge_power_w, now);

        let _ = self.last_tick_tx.send(Some(TickEvaluation { elapsed_secs, eval }));
    }

    /// Bound a command future to the configured timeout.
    async fn bounded<F>(&self, command: F) -> Result<(), ActuatorError>
    where
        F: Future<Output = Result<(), ActuatorError>>,
    {
        match tokio::time::timeout(self.config.command_timeout, command).await {
            Ok(result) => result,
            Err(_) => Err(ActuatorError::Timeout),
        }
    }

    /// Track consecutive command failures and surface the degraded signal.
    fn record_outcome(&mut self, command: &str, result: &Result<(), ActuatorError>) {
        match result {
            Ok(()) => {
                if self.degraded {
                    tracing::info!("trainer commands recovered");
                }
                self.consecutive_failures = 0;
                self.degraded = false;
            }
            Err(e) => {
                self.consecutive_failures += 1;
                tracing::warn!("trainer command '{}' failed: {}", command, e);

                if self.consecutive_failures >= DEGRADED_FAILURE_THRESHOLD && !self.degraded {
                    self.degraded = true;
                    tracing::warn!(
                        "{} consecutive trainer command failures, link degraded; telemetry decoding continues",
                        self.consecutive_failures
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationSettings;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Scripted actuator for driving the loop in tests.
    #[derive(Default)]
    struct ScriptedActuator {
        prepare_failures_left: AtomicU32,
        fail_commands: AtomicBool,
        grades: StdMutex<Vec<f64>>,
        powers: StdMutex<Vec<u16>>,
    }

    impl TrainerActuator for ScriptedActuator {
        async fn prepare(&self) -> Result<(), ActuatorError> {
            if self.prepare_failures_left.load(Ordering::SeqCst) > 0 {
                self.prepare_failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(ActuatorError::NotReady("busy".to_string()));
            }
            Ok(())
        }

        async fn set_simulated_grade(&self, grade_pct: f64) -> Result<(), ActuatorError> {
            if self.fail_commands.load(Ordering::SeqCst) {
                return Err(ActuatorError::WriteFailed("device busy".to_string()));
            }
            self.grades.lock().unwrap().push(grade_pct);
            Ok(())
        }

        async fn set_target_power(&self, watts: u16) -> Result<(), ActuatorError> {
            if self.fail_commands.load(Ordering::SeqCst) {
                return Err(ActuatorError::WriteFailed("device busy".to_string()));
            }
            self.powers.lock().unwrap().push(watts);
            Ok(())
        }
    }

    fn control_loop(
        config: ControlLoopConfig,
        actuator: ScriptedActuator,
    ) -> (
        ControlLoop<ScriptedActuator>,
        watch::Receiver<Option<TickEvaluation>>,
        Arc<Mutex<EnergyAccumulator>>,
    ) {
        let simulator = GradeSimulator::new(&SimulationSettings::default());
        let energy = Arc::new(Mutex::new(EnergyAccumulator::new(Instant::now())));
        let (tick_tx, tick_rx) = watch::channel(None);
        let control = ControlLoop::new(config, simulator, actuator, energy.clone(), tick_tx);
        (control, tick_rx, energy)
    }

    #[tokio::test]
    async fn test_tick_commands_grade_then_power() {
        let (mut control, tick_rx, _) =
            control_loop(ControlLoopConfig::default(), ScriptedActuator::default());
        control.state = LoopState::Running;

        // Deepest descent of the default simulation: grade -5%, target 200W
        control.tick(45.0, Instant::now()).await;

        assert_eq!(*control.actuator.grades.lock().unwrap(), vec![-5.0]);
        assert_eq!(*control.actuator.powers.lock().unwrap(), vec![200]);

        let tick = (*tick_rx.borrow()).unwrap();
        assert_eq!(tick.elapsed_secs, 45.0);
        assert!((tick.eval.grade_pct + 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_degraded_after_three_consecutive_failures() {
        let actuator = ScriptedActuator {
            fail_commands: AtomicBool::new(true),
            ..Default::default()
        };
        let (mut control, _tick_rx, _) = control_loop(ControlLoopConfig::default(), actuator);
        control.state = LoopState::Running;

        control.tick(1.0, Instant::now()).await;
        assert!(!control.is_degraded());

        control.tick(2.0, Instant::now()).await;
        assert!(control.is_degraded());
    }

    #[tokio::test]
    async fn test_successful_command_clears_degraded() {
        let actuator = ScriptedActuator {
            fail_commands: AtomicBool::new(true),
            ..Default::default()
        };
        let (mut control, _tick_rx, _) = control_loop(ControlLoopConfig::default(), actuator);
        control.state = LoopState::Running;

        control.tick(1.0, Instant::now()).await;
        control.tick(2.0, Instant::now()).await;
        assert!(control.is_degraded());

        control.actuator.fail_commands.store(false, Ordering::SeqCst);
        control.tick(3.0, Instant::now()).await;
        assert!(!control.is_degraded());
    }

    #[tokio::test]
    async fn test_run_stops_at_session_duration() {
        let config = ControlLoopConfig {
            tick_interval: Duration::from_millis(10),
            session_duration: Duration::from_millis(60),
            ..Default::default()
        };
        let (control, tick_rx, _) = control_loop(config, ScriptedActuator::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::time::timeout(
            Duration::from_secs(5),
            control.run(Instant::now(), shutdown_rx),
        )
        .await
        .expect("control loop should stop on its own");

        assert!(tick_rx.borrow().is_some());
    }

    #[tokio::test]
    async fn test_handshake_retries_until_ready() {
        let actuator = ScriptedActuator {
            prepare_failures_left: AtomicU32::new(2),
            ..Default::default()
        };
        let config = ControlLoopConfig {
            tick_interval: Duration::from_millis(10),
            session_duration: Duration::from_millis(100),
            handshake_retry_delay: Duration::from_millis(5),
            ..Default::default()
        };
        let (control, tick_rx, _) = control_loop(config, actuator);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::time::timeout(
            Duration::from_secs(5),
            control.run(Instant::now(), shutdown_rx),
        )
        .await
        .expect("control loop should come up after retries and stop");

        // Ticks happened, so the handshake eventually succeeded
        assert!(tick_rx.borrow().is_some());
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_loop() {
        let config = ControlLoopConfig {
            tick_interval: Duration::from_millis(10),
            session_duration: Duration::from_secs(3600),
            ..Default::default()
        };
        let (control, _tick_rx, _) = control_loop(config, ScriptedActuator::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(control.run(Instant::now(), shutdown_rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("cancelled loop should stop")
            .unwrap();
    }
}
