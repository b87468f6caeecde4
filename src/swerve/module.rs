// One swerve wheel: drive motor, steer motor, absolute angle sensor and the steer servo

use serde::Serialize;
use tracing::{debug, info, warn};

use super::angle::{normalize, optimize, raw_to_angle};
use super::module_config::ModuleConfig;
use super::pid::AnglePid;
use crate::motor::{Actuator, AngleSensor, HalError};
use crate::telemetry::TelemetrySink;

/// Per-module state published each period
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModuleSnapshot {
    pub name: String,
    pub current_angle: f32,
    pub target_angle: f32,
    pub speed: f32,
    pub degraded: bool,
}

pub struct SwerveModule {
    config: ModuleConfig,
    drive: Box<dyn Actuator>,
    steer: Box<dyn Actuator>,
    sensor: Box<dyn AngleSensor>,
    servo: AnglePid,

    /// Drive-wide reversal permission, ANDed with the config flag
    drive_allows_reverse: bool,

    /// Drive command as written to the actuator (reversal and inversion applied)
    speed: f32,
    /// Heading the wheel is being steered to, in (-π, π]
    target_angle: f32,
    /// Servo setpoint, unbounded: current angle plus the chosen steering travel
    setpoint: f32,

    last_raw: Option<f32>,
    /// Last corrected angle from a good sensor sample, 0 until `last_raw` is set
    current_angle: f32,
    sensor_fault: bool,
    actuator_fault: bool,
}

impl SwerveModule {
    pub fn new(
        config: ModuleConfig,
        drive: Box<dyn Actuator>,
        steer: Box<dyn Actuator>,
        sensor: Box<dyn AngleSensor>,
        servo: AnglePid,
    ) -> Self {
        Self {
            config,
            drive,
            steer,
            sensor,
            servo,
            drive_allows_reverse: true,
            speed: 0.0,
            target_angle: 0.0,
            setpoint: 0.0,
            last_raw: None,
            current_angle: 0.0,
            sensor_fault: false,
            actuator_fault: false,
        }
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Drive to `speed` in [-1, 1] while steering to `angle` (rad, clockwise from forward)
    pub fn set_target(&mut self, speed: f32, angle: f32) {
        let current = self.sample_angle();

        if !angle.is_finite() {
            warn!("{}: ignoring non-finite target angle", self.config.name);
            self.hold_at(current);
            return;
        }
        let speed = if speed.is_finite() { speed.clamp(-1.0, 1.0) } else { 0.0 };

        let optimized = optimize(speed, angle, current, self.allow_reverse());
        if optimized.speed != speed {
            debug!(
                "{}: reversing drive, steering {:.3} instead of {:.3}",
                self.config.name, optimized.angle, angle
            );
        }

        self.target_angle = optimized.angle;
        self.setpoint = current + optimized.delta;
        self.speed = self.mounted(optimized.speed);
        self.write(current);
    }

    /// Zero drive speed and keep steering to the last commanded heading
    pub fn stop(&mut self) {
        let current = self.sample_angle();
        self.hold_at(current);
    }

    /// Zero drive and reset the servo; the commanded heading is kept
    pub fn reset(&mut self) {
        self.servo.reset();
        self.stop();
    }

    /// Zero both motors and release the servo, for the disabled phase
    pub fn disable(&mut self) {
        self.servo.reset();
        self.speed = 0.0;
        self.setpoint = self.current_angle;
        let results = [self.drive.set(0.0), self.steer.set(0.0)];
        if let Some(e) = results.iter().find_map(|r| r.as_ref().err()) {
            warn!("{}: failed to disable motors: {}", self.config.name, e);
        }
    }

    /// Sample the sensor without writing either motor
    pub fn refresh(&mut self) {
        self.sample_angle();
    }

    fn hold_at(&mut self, current: f32) {
        self.speed = 0.0;
        self.setpoint = current + normalize(self.target_angle - current);
        self.write(current);
    }

    /// Read-then-compute: sample the sensor, falling back to the last good angle
    fn sample_angle(&mut self) -> f32 {
        let full_scale = self.sensor.units_per_revolution();
        let reading = self.sensor.read_raw().and_then(|raw| {
            if raw.is_finite() && (0.0..=full_scale).contains(&raw) {
                Ok(raw)
            } else {
                Err(HalError::OutOfRange { raw, full_scale })
            }
        });

        match reading {
            Ok(raw) => {
                if self.sensor_fault {
                    info!("{}: angle sensor recovered", self.config.name);
                    self.sensor_fault = false;
                }
                self.last_raw = Some(raw);
                self.current_angle = raw_to_angle(raw, self.config.zero_offset, full_scale);
            }
            Err(e) => {
                if !self.sensor_fault {
                    if self.last_raw.is_some() {
                        warn!(
                            "{}: angle sensor fault ({}), holding {:.3} rad",
                            self.config.name, e, self.current_angle
                        );
                    } else {
                        warn!(
                            "{}: angle sensor fault ({}) before any good sample, heading unknown",
                            self.config.name, e
                        );
                    }
                    self.sensor_fault = true;
                }
            }
        }
        self.current_angle
    }

    fn write(&mut self, current: f32) {
        let steer_output = self.servo.calculate(self.setpoint, current);
        let results = [self.drive.set(self.speed), self.steer.set(steer_output)];

        let failed = results.iter().find_map(|r| r.as_ref().err());
        match (failed, self.actuator_fault) {
            (Some(e), false) => {
                warn!("{}: actuator write failed: {}", self.config.name, e);
                self.actuator_fault = true;
            }
            (None, true) => {
                info!("{}: actuator writes recovered", self.config.name);
                self.actuator_fault = false;
            }
            _ => {}
        }
    }

    /// Mounting correction, applied after optimization
    fn mounted(&self, speed: f32) -> f32 {
        if self.config.inverted { -speed } else { speed }
    }

    pub fn set_drive_allows_reverse(&mut self, allowed: bool) {
        self.drive_allows_reverse = allowed;
    }

    pub fn allow_reverse(&self) -> bool {
        self.config.allow_reverse && self.drive_allows_reverse
    }

    /// Corrected wheel angle in (-π, π] from the latest good sample
    pub fn current_angle(&self) -> f32 {
        self.current_angle
    }

    pub fn target_angle(&self) -> f32 {
        self.target_angle
    }

    pub fn setpoint(&self) -> f32 {
        self.setpoint
    }

    /// Drive command last written, including reversal and inversion
    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn last_raw(&self) -> Option<f32> {
        self.last_raw
    }

    /// A sensor or actuator of this module is failing
    pub fn is_degraded(&self) -> bool {
        self.sensor_fault || self.actuator_fault
    }

    pub fn snapshot(&self) -> ModuleSnapshot {
        ModuleSnapshot {
            name: self.config.name.clone(),
            current_angle: self.current_angle,
            target_angle: self.target_angle,
            speed: self.speed,
            degraded: self.is_degraded(),
        }
    }

    pub fn update_telemetry(&self, sink: &mut dyn TelemetrySink) {
        let name = &self.config.name;
        sink.put_number(&format!("{}/current_angle", name), self.current_angle as f64);
        sink.put_number(&format!("{}/target_angle", name), self.target_angle as f64);
        sink.put_number(&format!("{}/speed", name), self.speed as f64);
        sink.put_bool(&format!("{}/degraded", name), self.is_degraded());
    }
}
