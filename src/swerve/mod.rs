// Swerve drivetrain core
//
// Provides:
// - Per-wheel calibration and angle math
// - Inverse kinematics for a four-module chassis
// - The swerve module (steer servo + reverse-drive optimization)
// - The swerve drive (input shaping, wheel lock, raw nudges)

pub mod angle;
mod drive;
pub mod kinematics;
mod module;
mod module_config;
pub mod pid;

pub use drive::{DriveIntent, DriveMode, DriveSnapshot, SwerveDrive};
pub use kinematics::{ChassisGeometry, ModuleTarget, ModuleTargets, chassis_to_modules, lock_pattern};
pub use module::{ModuleSnapshot, SwerveModule};
pub use module_config::{ModuleConfig, WheelPosition};
pub use pid::{AnglePid, PidGains};
