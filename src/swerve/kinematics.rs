// Swerve inverse kinematics for a four-module rectangular chassis
// Converts chassis intent (forward, strafe, clockwise rotation) into per-module speed and heading.
//
// Frame: x = forward, y = right, rotation positive clockwise seen from above.
// Module headings are measured clockwise from forward, so heading = atan2(right, forward).

use serde::{Deserialize, Serialize};

use super::angle::fold_half_turn;
use super::module_config::WheelPosition;
use crate::config::ConfigError;

/// Below this a module velocity counts as "no motion" and the wheel keeps its heading
pub const SPEED_EPSILON: f32 = 1e-6;

/// Distances from chassis center to the module contact points
///
/// Only the ratio matters: positions are normalized by the center-to-corner
/// distance so a pure rotation command of 1 gives every module speed 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChassisGeometry {
    pub half_length: f32,
    pub half_width: f32,
}

impl Default for ChassisGeometry {
    fn default() -> Self {
        Self {
            half_length: 1.0,
            half_width: 1.0,
        }
    }
}

impl ChassisGeometry {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ok = |v: f32| v.is_finite() && v > 0.0;
        if ok(self.half_length) && ok(self.half_width) {
            Ok(())
        } else {
            Err(ConfigError::BadGeometry {
                half_length: self.half_length,
                half_width: self.half_width,
            })
        }
    }

    /// Normalized (forward, right) offset of a module from chassis center
    pub fn offset(&self, position: WheelPosition) -> (f32, f32) {
        let radius = self.half_length.hypot(self.half_width);
        let (sf, sr) = position.quadrant();
        (sf * self.half_length / radius, sr * self.half_width / radius)
    }
}

/// Speed and heading for one module
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleTarget {
    /// Normalized wheel speed, 0..=1 straight out of kinematics
    pub speed: f32,
    /// Heading in radians, clockwise from forward
    pub angle: f32,
}

/// Targets for all four modules in `WheelPosition::ALL` order
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModuleTargets(pub [ModuleTarget; 4]);

impl ModuleTargets {
    pub fn get(&self, position: WheelPosition) -> ModuleTarget {
        self.0[position.index()]
    }

    /// Largest module speed
    pub fn max_speed(&self) -> f32 {
        self.0.iter().map(|t| t.speed).fold(0.0f32, f32::max)
    }
}

/// Convert chassis intent into module targets
///
/// # Arguments
/// * `x` - Forward intent in [-1, 1]
/// * `y` - Strafe intent in [-1, 1] (positive = right)
/// * `rcw` - Rotation intent in [-1, 1] (positive = clockwise)
///
/// If any module would exceed speed 1, all four are scaled by the same factor
/// so the largest is exactly 1 and the turning radius is preserved.
pub fn chassis_to_modules(x: f32, y: f32, rcw: f32, geometry: &ChassisGeometry) -> ModuleTargets {
    let mut targets = [ModuleTarget::default(); 4];

    for position in WheelPosition::ALL {
        let (f, r) = geometry.offset(position);

        // Translation plus the rotation-induced velocity perpendicular to the radius
        let v_fwd = x - rcw * r;
        let v_right = y + rcw * f;

        targets[position.index()] = ModuleTarget {
            speed: v_fwd.hypot(v_right),
            angle: v_right.atan2(v_fwd),
        };
    }

    let mut targets = ModuleTargets(targets);

    // Apply scaling if any module exceeds full speed
    let max_speed = targets.max_speed();
    if max_speed > 1.0 {
        let scale = 1.0 / max_speed;
        for target in &mut targets.0 {
            target.speed *= scale;
        }
    }

    targets
}

/// Defensive X stance: every wheel along its radius, no drive
pub fn lock_pattern(geometry: &ChassisGeometry) -> ModuleTargets {
    let mut targets = [ModuleTarget::default(); 4];
    for position in WheelPosition::ALL {
        let (f, r) = geometry.offset(position);
        targets[position.index()] = ModuleTarget {
            speed: 0.0,
            angle: fold_half_turn(r.atan2(f)),
        };
    }
    ModuleTargets(targets)
}
