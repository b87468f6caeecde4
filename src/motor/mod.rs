// Actuator and sensor channels for the swerve modules
//
// Provides:
// - The two channel traits a swerve module is built from
// - A simulated plant for running without hardware
// - Feetech STS3215 serial protocol and drivetrain wiring

mod driver;
pub mod feetech;
pub mod sim;

pub use driver::{FeetechDrivetrain, FeetechEncoder, FeetechMotor, MAX_DRIVE_RAW, MAX_STEER_DUTY, STEPS_PER_REVOLUTION};
pub use feetech::{FeetechBus, FeetechError};
pub use sim::{SimPlant, SimWheel};

/// Failure of a single actuator or sensor channel
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    #[error("Servo bus error: {0}")]
    Bus(#[from] FeetechError),

    #[error("Sensor reading is stale")]
    Stale,

    #[error("Sensor reading {raw} outside 0..={full_scale}")]
    OutOfRange { raw: f32, full_scale: f32 },
}

/// A normalized motor command channel
pub trait Actuator {
    /// Command output in [-1, 1]
    fn set(&mut self, output: f32) -> Result<(), HalError>;
}

/// An absolute angle sensor reporting raw units
pub trait AngleSensor {
    fn read_raw(&mut self) -> Result<f32, HalError>;

    /// Raw span of one full revolution
    fn units_per_revolution(&self) -> f32;
}
