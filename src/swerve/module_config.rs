// Per-wheel calibration

use serde::{Deserialize, Serialize};

/// Where a module sits on the chassis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WheelPosition {
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
}

impl WheelPosition {
    /// Fixed slot order used everywhere a set of four is stored
    pub const ALL: [WheelPosition; 4] = [
        WheelPosition::FrontLeft,
        WheelPosition::FrontRight,
        WheelPosition::RearLeft,
        WheelPosition::RearRight,
    ];

    pub fn index(self) -> usize {
        match self {
            WheelPosition::FrontLeft => 0,
            WheelPosition::FrontRight => 1,
            WheelPosition::RearLeft => 2,
            WheelPosition::RearRight => 3,
        }
    }

    /// Unit signs of the module's (forward, right) offset from chassis center
    pub fn quadrant(self) -> (f32, f32) {
        match self {
            WheelPosition::FrontLeft => (1.0, -1.0),
            WheelPosition::FrontRight => (1.0, 1.0),
            WheelPosition::RearLeft => (-1.0, -1.0),
            WheelPosition::RearRight => (-1.0, 1.0),
        }
    }
}

/// Immutable calibration for one wheel assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Display name, also the telemetry key prefix
    pub name: String,
    pub position: WheelPosition,
    /// Raw sensor reading with the wheel pointing chassis-forward
    pub zero_offset: f32,
    /// Flip the drive actuator for this mounting
    pub inverted: bool,
    /// Reach a heading through its opposite with reversed drive
    pub allow_reverse: bool,
}

impl ModuleConfig {
    pub fn new(
        name: impl Into<String>,
        position: WheelPosition,
        zero_offset: f32,
        inverted: bool,
        allow_reverse: bool,
    ) -> Self {
        Self {
            name: name.into(),
            position,
            zero_offset,
            inverted,
            allow_reverse,
        }
    }
}
