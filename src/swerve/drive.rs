// Chassis-level coordination of the four swerve modules
//
// Intent and override latches are collected during a period and consumed by
// `update()`, which decides which one source commands the modules this period.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::kinematics::{ChassisGeometry, ModuleTargets, SPEED_EPSILON, chassis_to_modules, lock_pattern};
use super::module::{ModuleSnapshot, SwerveModule};
use super::module_config::WheelPosition;
use crate::config::{ConfigError, INPUT_DEADBAND, validate_modules};
use crate::telemetry::TelemetrySink;

/// Which source commanded the modules in the last period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    /// Flushed, no intent yet; every wheel holds its heading
    Idle,
    Normal,
    WheelLock,
    RawNudge,
}

impl DriveMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DriveMode::Idle => "idle",
            DriveMode::Normal => "normal",
            DriveMode::WheelLock => "wheel_lock",
            DriveMode::RawNudge => "raw_nudge",
        }
    }
}

/// Per-period drive state for telemetry
#[derive(Debug, Clone, Serialize)]
pub struct DriveSnapshot {
    pub mode: DriveMode,
    pub modules: Vec<ModuleSnapshot>,
}

/// Operator intent for one period, each axis in [-1, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DriveIntent {
    /// Forward
    pub x: f32,
    /// Strafe, positive = right
    pub y: f32,
    /// Rotation, positive = clockwise
    pub rcw: f32,
}

impl DriveIntent {
    pub fn new(x: f32, y: f32, rcw: f32) -> Self {
        Self { x, y, rcw }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.rcw == 0.0
    }
}

/// Non-finite axes become 0, everything else is clamped to [-1, 1]
fn sanitize(v: f32) -> f32 {
    if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 }
}

/// `sign(v) * v²`: finer control near zero, same full-scale range
pub fn square_input(v: f32) -> f32 {
    v * v.abs()
}

pub fn threshold_input(v: f32) -> f32 {
    if v.abs() < INPUT_DEADBAND { 0.0 } else { v }
}

pub struct SwerveDrive {
    /// Fixed slots in `WheelPosition::ALL` order
    modules: [SwerveModule; 4],
    geometry: ChassisGeometry,

    pub squared_inputs: bool,
    pub threshold_input_vectors: bool,
    allow_reverse: bool,

    pending_intent: Option<DriveIntent>,
    wheel_lock_requested: bool,
    raw_fwd: Option<f32>,
    raw_strafe: Option<f32>,

    mode: DriveMode,
}

impl SwerveDrive {
    /// Assemble the drive from its four modules, in any order
    ///
    /// Fails if the modules do not cover each wheel position exactly once.
    pub fn new(modules: [SwerveModule; 4], geometry: ChassisGeometry) -> Result<Self, ConfigError> {
        geometry.validate()?;
        let configs: Vec<_> = modules.iter().map(|m| m.config().clone()).collect();
        validate_modules(&configs)?;

        let mut modules = modules;
        modules.sort_by_key(|m| m.config().position.index());

        info!(
            "Swerve drive assembled: {}",
            modules.iter().map(|m| m.name()).collect::<Vec<_>>().join(", ")
        );

        Ok(Self {
            modules,
            geometry,
            squared_inputs: false,
            threshold_input_vectors: false,
            allow_reverse: true,
            pending_intent: None,
            wheel_lock_requested: false,
            raw_fwd: None,
            raw_strafe: None,
            mode: DriveMode::Idle,
        })
    }

    /// Latch this period's chassis intent: forward, strafe right, rotate clockwise
    pub fn move_chassis(&mut self, x: f32, y: f32, rcw: f32) {
        self.pending_intent = Some(DriveIntent::new(sanitize(x), sanitize(y), sanitize(rcw)));
    }

    /// Hold the X stance for the next period only
    pub fn request_wheel_lock(&mut self) {
        self.wheel_lock_requested = true;
    }

    /// Pure forward override for this period, bypassing shaping and `move_chassis`
    pub fn set_raw_fwd(&mut self, v: f32) {
        self.raw_fwd = Some(sanitize(v));
    }

    /// Pure strafe override for this period, bypassing shaping and `move_chassis`
    pub fn set_raw_strafe(&mut self, v: f32) {
        self.raw_strafe = Some(sanitize(v));
    }

    pub fn set_allow_reverse(&mut self, allowed: bool) {
        self.allow_reverse = allowed;
        for module in &mut self.modules {
            module.set_drive_allows_reverse(allowed);
        }
    }

    pub fn allow_reverse(&self) -> bool {
        self.allow_reverse
    }

    /// Forget every latch and flag and bring all wheels to a stop
    ///
    /// Called on each phase transition so nothing from the previous phase carries over.
    pub fn flush(&mut self) {
        self.pending_intent = None;
        self.wheel_lock_requested = false;
        self.raw_fwd = None;
        self.raw_strafe = None;
        self.squared_inputs = false;
        self.threshold_input_vectors = false;
        for module in &mut self.modules {
            module.reset();
        }
        self.mode = DriveMode::Idle;
        debug!("Swerve drive flushed");
    }

    /// Stop every module without touching latches or flags
    pub fn stop(&mut self) {
        for module in &mut self.modules {
            module.stop();
        }
    }

    /// Zero every motor, steering included
    pub fn disable(&mut self) {
        for module in &mut self.modules {
            module.disable();
        }
    }

    /// Sample every sensor, leaving the motors alone
    pub fn refresh(&mut self) {
        for module in &mut self.modules {
            module.refresh();
        }
    }

    /// Run one control period
    pub fn update(&mut self) {
        let intent = self.pending_intent.take();
        let lock = std::mem::take(&mut self.wheel_lock_requested);
        let raw = (self.raw_fwd.take(), self.raw_strafe.take());

        let mode = if lock {
            self.apply(lock_pattern(&self.geometry), false);
            DriveMode::WheelLock
        } else if raw.0.is_some() || raw.1.is_some() {
            let (fwd, strafe) = (raw.0.unwrap_or(0.0), raw.1.unwrap_or(0.0));
            self.apply(chassis_to_modules(fwd, strafe, 0.0, &self.geometry), true);
            DriveMode::RawNudge
        } else if let Some(intent) = intent {
            let shaped = self.shape(intent);
            self.apply(chassis_to_modules(shaped.x, shaped.y, shaped.rcw, &self.geometry), true);
            DriveMode::Normal
        } else if self.mode == DriveMode::Idle {
            self.stop();
            DriveMode::Idle
        } else {
            // A period without intent is a zero command
            self.apply(ModuleTargets::default(), true);
            DriveMode::Normal
        };

        if mode != self.mode {
            debug!("Drive mode {} -> {}", self.mode.as_str(), mode.as_str());
        }
        self.mode = mode;
    }

    /// Squaring then deadband, each only if enabled
    pub fn shape(&self, intent: DriveIntent) -> DriveIntent {
        let shape_axis = |v: f32| {
            let v = if self.squared_inputs { square_input(v) } else { v };
            if self.threshold_input_vectors { threshold_input(v) } else { v }
        };
        DriveIntent::new(shape_axis(intent.x), shape_axis(intent.y), shape_axis(intent.rcw))
    }

    /// Hand targets to the modules; with `hold_idle`, a stationary module keeps its heading
    fn apply(&mut self, targets: ModuleTargets, hold_idle: bool) {
        for (module, target) in self.modules.iter_mut().zip(targets.0) {
            if hold_idle && target.speed < SPEED_EPSILON {
                module.stop();
            } else {
                module.set_target(target.speed, target.angle);
            }
        }
    }

    pub fn mode(&self) -> DriveMode {
        self.mode
    }

    pub fn geometry(&self) -> &ChassisGeometry {
        &self.geometry
    }

    pub fn module(&self, position: WheelPosition) -> &SwerveModule {
        &self.modules[position.index()]
    }

    pub fn modules(&self) -> &[SwerveModule; 4] {
        &self.modules
    }

    pub fn is_degraded(&self) -> bool {
        self.modules.iter().any(|m| m.is_degraded())
    }

    pub fn snapshot(&self) -> DriveSnapshot {
        DriveSnapshot {
            mode: self.mode,
            modules: self.modules.iter().map(|m| m.snapshot()).collect(),
        }
    }

    pub fn update_telemetry(&self, sink: &mut dyn TelemetrySink) {
        for module in &self.modules {
            module.update_telemetry(sink);
        }
        sink.put_text("drive/mode", self.mode.as_str());
        sink.put_bool("drive/degraded", self.is_degraded());
    }
}
