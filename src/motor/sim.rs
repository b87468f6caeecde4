// Simulated swerve hardware
//
// Each wheel shares one state cell between its drive motor, steer motor and encoder
// handles. The steer angle integrates the steer output; the encoder reports it in
// raw units like an analog absolute encoder would.

use std::cell::RefCell;
use std::f32::consts::TAU;
use std::rc::Rc;

use super::{Actuator, AngleSensor, HalError};

#[derive(Debug, Default)]
struct WheelState {
    drive_output: f32,
    steer_output: f32,
    /// Raw encoder reading in 0..full_scale
    raw: f32,
    /// Reading override, e.g. f32::NAN or a value past full scale
    forced_raw: Option<f32>,
    stale: bool,
    drive_writes: usize,
}

/// Handle to one simulated wheel assembly
#[derive(Debug, Clone)]
pub struct SimWheel {
    state: Rc<RefCell<WheelState>>,
    full_scale: f32,
    steer_rate: f32,
}

impl SimWheel {
    /// `full_scale` raw units per revolution, `steer_rate` rad/s at full steer output
    pub fn new(full_scale: f32, steer_rate: f32) -> Self {
        Self {
            state: Rc::new(RefCell::new(WheelState::default())),
            full_scale,
            steer_rate,
        }
    }

    pub fn drive_motor(&self) -> SimMotor {
        SimMotor {
            wheel: self.clone(),
            role: Role::Drive,
        }
    }

    pub fn steer_motor(&self) -> SimMotor {
        SimMotor {
            wheel: self.clone(),
            role: Role::Steer,
        }
    }

    pub fn encoder(&self) -> SimEncoder {
        SimEncoder { wheel: self.clone() }
    }

    /// Advance the steering by `dt` seconds of the current steer output
    pub fn step(&self, dt: f32) {
        let mut s = self.state.borrow_mut();
        let turned = s.steer_output * self.steer_rate * dt;
        s.raw = (s.raw + turned / TAU * self.full_scale).rem_euclid(self.full_scale);
    }

    pub fn set_raw(&self, raw: f32) {
        self.state.borrow_mut().raw = raw.rem_euclid(self.full_scale);
    }

    pub fn raw(&self) -> f32 {
        self.state.borrow().raw
    }

    /// Make the encoder report `raw` regardless of the shaft position
    pub fn force_reading(&self, raw: Option<f32>) {
        self.state.borrow_mut().forced_raw = raw;
    }

    pub fn set_stale(&self, stale: bool) {
        self.state.borrow_mut().stale = stale;
    }

    pub fn drive_output(&self) -> f32 {
        self.state.borrow().drive_output
    }

    pub fn steer_output(&self) -> f32 {
        self.state.borrow().steer_output
    }

    /// Number of commands the drive motor has received
    pub fn drive_writes(&self) -> usize {
        self.state.borrow().drive_writes
    }
}

#[derive(Debug, Clone, Copy)]
enum Role {
    Drive,
    Steer,
}

#[derive(Debug)]
pub struct SimMotor {
    wheel: SimWheel,
    role: Role,
}

impl Actuator for SimMotor {
    fn set(&mut self, output: f32) -> Result<(), HalError> {
        let output = output.clamp(-1.0, 1.0);
        let mut s = self.wheel.state.borrow_mut();
        match self.role {
            Role::Drive => {
                s.drive_output = output;
                s.drive_writes += 1;
            }
            Role::Steer => s.steer_output = output,
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct SimEncoder {
    wheel: SimWheel,
}

impl AngleSensor for SimEncoder {
    fn read_raw(&mut self) -> Result<f32, HalError> {
        let s = self.wheel.state.borrow();
        if s.stale {
            return Err(HalError::Stale);
        }
        Ok(s.forced_raw.unwrap_or(s.raw))
    }

    fn units_per_revolution(&self) -> f32 {
        self.wheel.full_scale
    }
}

/// The four simulated wheels in `WheelPosition::ALL` order
#[derive(Debug, Clone)]
pub struct SimPlant {
    pub wheels: [SimWheel; 4],
}

impl SimPlant {
    pub fn new(full_scale: f32, steer_rate: f32) -> Self {
        Self {
            wheels: std::array::from_fn(|_| SimWheel::new(full_scale, steer_rate)),
        }
    }

    pub fn step(&self, dt: f32) {
        for wheel in &self.wheels {
            wheel.step(dt);
        }
    }
}
