// Steer angle servo: a PID loop on a wrapping angle, stepped once per control period

use serde::{Deserialize, Serialize};

use super::angle::normalize;
use crate::config::ConfigError;

/// Tuning for the steer servo. Error is in radians, output is a normalized actuator command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Error band (rad) inside which the servo outputs zero
    pub tolerance: f32,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 1.5,
            ki: 0.0,
            kd: 0.0,
            tolerance: 0.02,
        }
    }
}

impl PidGains {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ok = |v: f32| v.is_finite() && v >= 0.0;
        if [self.kp, self.ki, self.kd, self.tolerance].into_iter().all(ok) {
            Ok(())
        } else {
            Err(ConfigError::BadGains)
        }
    }
}

/// PID controller with continuous input over one revolution
///
/// The error is always taken the short way round, so a setpoint of π and a
/// measurement of -π + 0.1 is an error of -0.1, not 2π - 0.1.
#[derive(Debug, Clone)]
pub struct AnglePid {
    gains: PidGains,
    /// seconds per step
    dt: f32,
    max_output: f32,
    integral: f32,
    prev_error: Option<f32>,
}

impl AnglePid {
    pub fn new(gains: PidGains, dt: f32) -> Self {
        Self {
            gains,
            dt,
            max_output: 1.0,
            integral: 0.0,
            prev_error: None,
        }
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    /// Forget accumulated integral and derivative history
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
    }

    /// One servo step. Returns the actuator command in [-max_output, max_output].
    pub fn calculate(&mut self, setpoint: f32, measured: f32) -> f32 {
        let error = normalize(setpoint - measured);

        if error.abs() < self.gains.tolerance {
            self.reset();
            return 0.0;
        }

        self.integral += error * self.dt;
        if self.gains.ki != 0.0 {
            let i_max = self.max_output / self.gains.ki;
            self.integral = self.integral.clamp(-i_max, i_max);
        }

        let derivative = match self.prev_error {
            Some(prev) => normalize(error - prev) / self.dt,
            None => 0.0,
        };
        self.prev_error = Some(error);

        let u = self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative;
        u.clamp(-self.max_output, self.max_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn p_only(kp: f32) -> AnglePid {
        AnglePid::new(
            PidGains {
                kp,
                ki: 0.0,
                kd: 0.0,
                tolerance: 0.01,
            },
            0.02,
        )
    }

    #[test]
    fn test_proportional_sign() {
        let mut pid = p_only(1.0);
        assert!((pid.calculate(0.5, 0.0) - 0.5).abs() < 1e-6);
        assert!((pid.calculate(-0.5, 0.0) + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_error_wraps_short_way() {
        let mut pid = p_only(1.0);
        // Setpoint just past +π, wheel just past -π: 0.2 rad apart, not 2π - 0.2
        let out = pid.calculate(PI - 0.1, -PI + 0.1);
        assert!((out + 0.2).abs() < 1e-4, "output {}", out);
    }

    #[test]
    fn test_output_clamped() {
        let mut pid = p_only(10.0);
        assert_eq!(pid.calculate(1.0, 0.0), 1.0);
        assert_eq!(pid.calculate(-1.0, 0.0), -1.0);
    }

    #[test]
    fn test_inside_tolerance_is_zero() {
        let mut pid = p_only(5.0);
        assert_eq!(pid.calculate(0.005, 0.0), 0.0);
    }

    #[test]
    fn test_integral_accumulates_and_resets() {
        let mut pid = AnglePid::new(
            PidGains {
                kp: 0.0,
                ki: 1.0,
                kd: 0.0,
                tolerance: 0.0,
            },
            0.5,
        );
        let first = pid.calculate(0.2, 0.0);
        let second = pid.calculate(0.2, 0.0);
        assert!(second > first);
        pid.reset();
        assert!((pid.calculate(0.2, 0.0) - first).abs() < 1e-6);
    }

    #[test]
    fn test_gain_validation() {
        assert!(PidGains::default().validate().is_ok());
        let bad = PidGains {
            kp: f32::INFINITY,
            ..PidGains::default()
        };
        assert!(bad.validate().is_err());
    }
}
