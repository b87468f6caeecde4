// Message types crossing into the runtime from operator input

use serde::{Deserialize, Serialize};

use crate::swerve::DriveIntent;

/// Competition phase dispatched by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RobotPhase {
    Disabled,
    Autonomous,
    Teleop,
}

/// Fine-positioning override for a single period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Nudge {
    Forward(f32),
    Strafe(f32),
}

// Command from keyboard/stdin -> runtime
// One JSON object per line on stdin, e.g. {"drive":{"x":0.5,"y":0.0,"rcw":0.0}} or "wheel_lock"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorCommand {
    /// Latest joystick intent, reused until the watchdog expires
    Drive(DriveIntent),
    /// X stance for one period
    WheelLock,
    Nudge(Nudge),
    Phase(RobotPhase),
    Quit,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    /// At least one module has a sensor or actuator fault
    Degraded,
}

impl RuntimeHealth {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeHealth::Ok => "ok",
            RuntimeHealth::CmdStale => "cmd_stale",
            RuntimeHealth::Degraded => "degraded",
        }
    }
}
