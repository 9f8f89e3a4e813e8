//! **GestureEngine** — drives a timed sequence of PTZ motion vectors and
//! guarantees the device is returned to neutral and stopped.
//!
//! State machine: Idle → Stepping(i) → ReturningToNeutral → Stopping → Idle.
//! A failed motion or stop command is logged and the sequence continues;
//! whatever happened earlier, the neutral vector and a final stop are always
//! issued before completion is reported. A camera that cannot move must still
//! let the orchestrator release its resources.

use crate::device::{MotionVector, PtzDevice};
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tunables for the built-in gestures. Step count and magnitudes are
/// configuration, not hardcoded law.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Axis magnitude for each step.
    pub magnitude: f32,
    /// Time the motion command stays active per step.
    pub active_ms: u64,
    /// Pause after each stop before the next step.
    pub rest_ms: u64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            magnitude: 0.3,
            active_ms: 800,
            rest_ms: 800,
        }
    }
}

/// One motion step of a gesture.
#[derive(Debug, Clone)]
pub struct GestureStep {
    pub label: &'static str,
    pub vector: MotionVector,
    pub active: Duration,
    pub rest: Duration,
}

/// An ordered motion sequence. `GestureEngine::run` appends the
/// return-to-neutral tail; it is not part of `steps`.
#[derive(Debug, Clone)]
pub struct Gesture {
    pub name: &'static str,
    steps: Vec<GestureStep>,
}

impl Gesture {
    pub fn new(name: &'static str, steps: Vec<GestureStep>) -> Self {
        Self { name, steps }
    }

    /// Nod: tilt up, tilt down, back to center.
    pub fn affirm(config: &GestureConfig) -> Self {
        let (active, rest) = (
            Duration::from_millis(config.active_ms),
            Duration::from_millis(config.rest_ms),
        );
        Self::new(
            "affirm",
            vec![
                GestureStep {
                    label: "tilt up",
                    vector: MotionVector::new(0.0, config.magnitude, 0.0),
                    active,
                    rest,
                },
                GestureStep {
                    label: "tilt down",
                    vector: MotionVector::new(0.0, -config.magnitude, 0.0),
                    active,
                    rest,
                },
            ],
        )
    }

    /// Head-shake: pan left, pan right, back to center.
    pub fn negate(config: &GestureConfig) -> Self {
        let (active, rest) = (
            Duration::from_millis(config.active_ms),
            Duration::from_millis(config.rest_ms),
        );
        Self::new(
            "negate",
            vec![
                GestureStep {
                    label: "pan left",
                    vector: MotionVector::new(-config.magnitude, 0.0, 0.0),
                    active,
                    rest,
                },
                GestureStep {
                    label: "pan right",
                    vector: MotionVector::new(config.magnitude, 0.0, 0.0),
                    active,
                    rest,
                },
            ],
        )
    }

    pub fn steps(&self) -> &[GestureStep] {
        &self.steps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Idle,
    Stepping(usize),
    ReturningToNeutral,
    Stopping,
}

/// Executes gestures against a PTZ device. Does not touch the activity lock:
/// the caller (a voice session, or the console's standalone path) holds it
/// for the duration of the run.
pub struct GestureEngine<D: PtzDevice + ?Sized> {
    device: std::sync::Arc<D>,
    state: Mutex<EngineState>,
}

impl<D: PtzDevice + ?Sized> GestureEngine<D> {
    pub fn new(device: std::sync::Arc<D>) -> Self {
        Self {
            device,
            state: Mutex::new(EngineState::Idle),
        }
    }

    /// Current state, for logs and diagnostics.
    pub fn state(&self) -> &'static str {
        match *self.state.lock().unwrap() {
            EngineState::Idle => "idle",
            EngineState::Stepping(_) => "stepping",
            EngineState::ReturningToNeutral => "returning_to_neutral",
            EngineState::Stopping => "stopping",
        }
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock().unwrap() = state;
    }

    /// Run the gesture to completion. Individual command failures are
    /// absorbed; the neutral vector and final stop always go out.
    pub async fn run(&self, gesture: &Gesture) {
        info!(gesture = gesture.name, steps = gesture.steps().len(), "gesture started");

        for (i, step) in gesture.steps().iter().enumerate() {
            self.set_state(EngineState::Stepping(i));
            debug!(gesture = gesture.name, step = step.label, "step");
            if let Err(e) = self.device.move_continuous(step.vector).await {
                warn!(step = step.label, error = %e, "motion command failed; continuing");
            }
            tokio::time::sleep(step.active).await;
            if let Err(e) = self.device.stop().await {
                warn!(step = step.label, error = %e, "stop command failed; continuing");
            }
            tokio::time::sleep(step.rest).await;
        }

        self.set_state(EngineState::ReturningToNeutral);
        if let Err(e) = self.device.move_continuous(MotionVector::NEUTRAL).await {
            warn!(error = %e, "neutral command failed");
        }

        self.set_state(EngineState::Stopping);
        if let Err(e) = self.device.stop().await {
            warn!(error = %e, "final stop failed");
        }

        self.set_state(EngineState::Idle);
        info!(gesture = gesture.name, "gesture complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCommand, ScriptedPtz};
    use std::sync::Arc;

    fn quick_config() -> GestureConfig {
        GestureConfig {
            magnitude: 0.3,
            active_ms: 1,
            rest_ms: 1,
        }
    }

    #[tokio::test]
    async fn affirm_ends_neutral_and_stopped() {
        let device = Arc::new(ScriptedPtz::new());
        let engine = GestureEngine::new(Arc::clone(&device));
        engine.run(&Gesture::affirm(&quick_config())).await;

        let commands = device.commands();
        // two steps: move/stop each, then neutral move + final stop
        assert_eq!(commands.len(), 6);
        assert_eq!(
            commands[commands.len() - 2],
            DeviceCommand::Move(MotionVector::NEUTRAL)
        );
        assert_eq!(commands[commands.len() - 1], DeviceCommand::Stop);
        assert_eq!(engine.state(), "idle");
    }

    #[tokio::test]
    async fn negate_pans_left_then_right() {
        let device = Arc::new(ScriptedPtz::new());
        let engine = GestureEngine::new(Arc::clone(&device));
        engine.run(&Gesture::negate(&quick_config())).await;

        let commands = device.commands();
        assert_eq!(
            commands[0],
            DeviceCommand::Move(MotionVector::new(-0.3, 0.0, 0.0))
        );
        assert_eq!(
            commands[2],
            DeviceCommand::Move(MotionVector::new(0.3, 0.0, 0.0))
        );
    }

    #[tokio::test]
    async fn all_commands_failing_still_reaches_neutral() {
        let device = Arc::new(ScriptedPtz::failing());
        let engine = GestureEngine::new(Arc::clone(&device));
        engine.run(&Gesture::affirm(&quick_config())).await;

        let commands = device.commands();
        assert_eq!(commands.len(), 6);
        assert_eq!(
            commands[commands.len() - 2],
            DeviceCommand::Move(MotionVector::NEUTRAL)
        );
        assert_eq!(commands[commands.len() - 1], DeviceCommand::Stop);
        assert_eq!(engine.state(), "idle");
    }

    #[test]
    fn magnitudes_come_from_config() {
        let config = GestureConfig {
            magnitude: 0.5,
            active_ms: 100,
            rest_ms: 50,
        };
        let gesture = Gesture::affirm(&config);
        assert_eq!(gesture.steps()[0].vector.tilt, 0.5);
        assert_eq!(gesture.steps()[1].vector.tilt, -0.5);
        assert_eq!(gesture.steps()[0].active, Duration::from_millis(100));
    }
}
