// Loop timing, input shaping constants and the deployment-time drive config
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::swerve::{ChassisGeometry, ModuleConfig, PidGains, WheelPosition};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Control period derived from LOOP_HZ
pub const PERIOD: Duration = Duration::from_millis(1000 / LOOP_HZ);

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Axis magnitudes below this are zeroed when thresholding is enabled
pub const INPUT_DEADBAND: f32 = 0.1;

// Raw nudge velocity used by the operator (forward/strafe buttons)
pub const NUDGE_SPEED: f32 = 0.35;

// Rotation scale while "precision rotate" is held
pub const SLOW_ROTATE_SCALE: f32 = 0.7;

// Serial port for the Feetech servo bus
pub const MOTOR_PORT: &str = "/dev/ttyUSB0";

// Servo reply timeout inside the control loop; four silent steer servos must still fit in one period
pub const BUS_TIMEOUT: Duration = Duration::from_millis(2);

// Full scale of the analog absolute encoders the default calibration was taken with (volts)
pub const ANALOG_FULL_SCALE: f32 = 5.0;

// Simulated steer slew rate at full output (rad/s)
pub const SIM_STEER_RATE: f32 = 12.0;

/// Configuration could not be loaded or describes an impossible drivetrain.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Expected 4 modules, got {0}")]
    ModuleCount(usize),

    #[error("Wheel position {0:?} assigned more than once")]
    DuplicatePosition(WheelPosition),

    #[error("No module assigned to {0:?}")]
    MissingPosition(WheelPosition),

    #[error("Module name {0:?} is empty or used twice")]
    BadName(String),

    #[error("Module {name}: zero offset {value} is not a valid sensor reading")]
    BadZeroOffset { name: String, value: f32 },

    #[error("Chassis geometry must be positive, got {half_length} x {half_width}")]
    BadGeometry { half_length: f32, half_width: f32 },

    #[error("Steer gains must be finite and non-negative")]
    BadGains,

    #[error("Bus id {0} used by more than one servo")]
    DuplicateBusId(u8),
}

/// One wheel assembly as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleEntry {
    #[serde(flatten)]
    pub module: ModuleConfig,
    /// Feetech id of the drive servo
    pub drive_id: u8,
    /// Feetech id of the steer servo (also the angle sensor)
    pub steer_id: u8,
}

/// Deployment-time description of the whole drivetrain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    #[serde(default)]
    pub geometry: ChassisGeometry,
    #[serde(default = "default_true")]
    pub allow_reverse: bool,
    #[serde(default)]
    pub steer_gains: PidGains,
    pub modules: Vec<ModuleEntry>,
}

fn default_true() -> bool {
    true
}

impl Default for DriveConfig {
    /// Calibration taken on the competition robot with 5 V analog encoders
    fn default() -> Self {
        let entry = |name: &str, position, zero_offset, inverted, drive_id, steer_id| ModuleEntry {
            module: ModuleConfig::new(name, position, zero_offset, inverted, true),
            drive_id,
            steer_id,
        };

        Self {
            geometry: ChassisGeometry::default(),
            allow_reverse: true,
            steer_gains: PidGains::default(),
            modules: vec![
                entry("FrontLeft_Module", WheelPosition::FrontLeft, 2.97, true, 5, 3),
                entry("FrontRight_Module", WheelPosition::FrontRight, 2.69, false, 8, 14),
                entry("RearLeft_Module", WheelPosition::RearLeft, 0.18, true, 4, 2),
                entry("RearRight_Module", WheelPosition::RearRight, 4.76, false, 9, 15),
            ],
        }
    }
}

impl DriveConfig {
    /// Read and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        info!("Loaded drive config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that must hold before the drivetrain may start
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.geometry.validate()?;
        self.steer_gains.validate()?;

        let modules: Vec<ModuleConfig> = self.modules.iter().map(|e| e.module.clone()).collect();
        validate_modules(&modules)?;

        let mut ids = HashSet::new();
        for entry in &self.modules {
            for id in [entry.drive_id, entry.steer_id] {
                if !ids.insert(id) {
                    return Err(ConfigError::DuplicateBusId(id));
                }
            }
        }
        Ok(())
    }

    /// (drive id, steer id) per module in `WheelPosition::ALL` order
    pub fn bus_ids(&self) -> Result<[(u8, u8); 4], ConfigError> {
        let mut ids = [(0, 0); 4];
        for position in WheelPosition::ALL {
            let entry = self.entry(position).ok_or(ConfigError::MissingPosition(position))?;
            ids[position.index()] = (entry.drive_id, entry.steer_id);
        }
        Ok(ids)
    }

    /// Module entry for a wheel position, if present
    pub fn entry(&self, position: WheelPosition) -> Option<&ModuleEntry> {
        self.modules.iter().find(|e| e.module.position == position)
    }
}

/// Exactly one module per wheel position, unique non-empty names, sane offsets
pub fn validate_modules(modules: &[ModuleConfig]) -> Result<(), ConfigError> {
    if modules.len() != WheelPosition::ALL.len() {
        return Err(ConfigError::ModuleCount(modules.len()));
    }

    let mut positions = HashSet::new();
    let mut names = HashSet::new();
    for module in modules {
        if !positions.insert(module.position) {
            return Err(ConfigError::DuplicatePosition(module.position));
        }
        if module.name.trim().is_empty() || !names.insert(module.name.as_str()) {
            return Err(ConfigError::BadName(module.name.clone()));
        }
        if !module.zero_offset.is_finite() || module.zero_offset < 0.0 {
            return Err(ConfigError::BadZeroOffset {
                name: module.name.clone(),
                value: module.zero_offset,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DriveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.modules.len(), 4);
        assert!(config.entry(WheelPosition::RearRight).is_some());
        assert_eq!(config.bus_ids().unwrap(), [(5, 3), (8, 14), (4, 2), (9, 15)]);
    }

    #[test]
    fn test_bus_timeouts_fit_in_period() {
        // One position read per module per tick; goal writes are unacknowledged
        assert!(BUS_TIMEOUT * 4 <= PERIOD / 2);
    }

    #[test]
    fn test_duplicate_position_rejected() {
        let mut config = DriveConfig::default();
        config.modules[1].module.position = WheelPosition::FrontLeft;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicatePosition(WheelPosition::FrontLeft))
        ));
    }

    #[test]
    fn test_missing_module_rejected() {
        let mut config = DriveConfig::default();
        config.modules.pop();
        assert!(matches!(config.validate(), Err(ConfigError::ModuleCount(3))));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut config = DriveConfig::default();
        config.modules[2].module.name = "FrontLeft_Module".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::BadName(_))));
    }

    #[test]
    fn test_duplicate_bus_id_rejected() {
        let mut config = DriveConfig::default();
        config.modules[3].steer_id = config.modules[0].drive_id;
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateBusId(5))));
    }

    #[test]
    fn test_bad_zero_offset_rejected() {
        let mut config = DriveConfig::default();
        config.modules[0].module.zero_offset = f32::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadZeroOffset { .. })
        ));
    }

    #[test]
    fn test_parse_json() {
        let text = r#"{
            "geometry": { "half_length": 0.3, "half_width": 0.25 },
            "modules": [
                { "name": "fl", "position": "front_left", "zero_offset": 100, "inverted": false, "allow_reverse": true, "drive_id": 1, "steer_id": 2 },
                { "name": "fr", "position": "front_right", "zero_offset": 200, "inverted": false, "allow_reverse": true, "drive_id": 3, "steer_id": 4 },
                { "name": "rl", "position": "rear_left", "zero_offset": 300, "inverted": true, "allow_reverse": false, "drive_id": 5, "steer_id": 6 },
                { "name": "rr", "position": "rear_right", "zero_offset": 400, "inverted": true, "allow_reverse": true, "drive_id": 7, "steer_id": 8 }
            ]
        }"#;
        let config = DriveConfig::from_json(text).unwrap();
        assert!(config.allow_reverse, "allow_reverse defaults to true");
        assert_eq!(config.geometry.half_length, 0.3);
        let rl = config.entry(WheelPosition::RearLeft).unwrap();
        assert!(rl.module.inverted);
        assert!(!rl.module.allow_reverse);
        assert_eq!(rl.steer_id, 6);
    }

    #[test]
    fn test_bundled_feetech_config() {
        let config = DriveConfig::from_json(include_str!("../config/feetech.json")).unwrap();
        assert_eq!(config.bus_ids().unwrap(), [(5, 3), (8, 14), (4, 2), (9, 15)]);
        assert!(config.modules.iter().all(|e| e.module.zero_offset < 4096.0));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            DriveConfig::from_json("{ \"modules\": 3 }"),
            Err(ConfigError::Parse(_))
        ));
    }
}
