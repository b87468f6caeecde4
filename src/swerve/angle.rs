// Angle wrapping, sensor correction and the reverse-drive optimization

use std::f32::consts::{FRAC_PI_2, PI, TAU};

/// Wrap an angle into (-π, π]
pub fn normalize(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped > PI { wrapped - TAU } else { wrapped }
}

/// Fold an angle into (-π/2, π/2], the half-turn a reversible wheel actually needs
pub fn fold_half_turn(angle: f32) -> f32 {
    let angle = normalize(angle);
    if angle > FRAC_PI_2 {
        angle - PI
    } else if angle <= -FRAC_PI_2 {
        angle + PI
    } else {
        angle
    }
}

/// Map a raw absolute sensor reading to a chassis-relative angle in (-π, π]
///
/// `full_scale` is the raw span of one revolution (5.0 for a 5 V analog
/// encoder, 4096 for a 12-bit servo position).
pub fn raw_to_angle(raw: f32, zero_offset: f32, full_scale: f32) -> f32 {
    normalize((raw - zero_offset) / full_scale * TAU)
}

/// Result of choosing how a module reaches a requested heading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Optimized {
    /// Drive speed after any reversal (before mounting inversion)
    pub speed: f32,
    /// Heading the wheel will point at, in (-π, π]
    pub angle: f32,
    /// Steering travel from the current angle to `angle`, in (-π, π]
    pub delta: f32,
}

/// Pick the steering target for `(speed, target)` given the wheel is at `current`
///
/// With `allow_reverse` set, any travel beyond a quarter turn is replaced by
/// pointing the opposite way and reversing the drive, so the wheel never
/// rotates more than π/2. Exactly π/2 is left alone.
pub fn optimize(speed: f32, target: f32, current: f32, allow_reverse: bool) -> Optimized {
    let delta = normalize(target - current);
    if allow_reverse && delta.abs() > FRAC_PI_2 {
        let angle = normalize(target + PI);
        Optimized {
            speed: -speed,
            angle,
            delta: normalize(angle - current),
        }
    } else {
        Optimized {
            speed,
            angle: normalize(target),
            delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn test_normalize_range() {
        assert!((normalize(PI) - PI).abs() < EPS);
        assert!((normalize(-PI) - PI).abs() < EPS, "-π maps to +π");
        assert!((normalize(3.0 * PI / 2.0) + FRAC_PI_2).abs() < EPS);
        assert!((normalize(TAU + 0.25) - 0.25).abs() < EPS);
        assert!((normalize(-0.5) + 0.5).abs() < EPS);
        for i in -40..40 {
            let a = normalize(i as f32 * 0.37);
            assert!(a > -PI && a <= PI + EPS, "{} out of range", a);
        }
    }

    #[test]
    fn test_fold_half_turn() {
        assert!((fold_half_turn(3.0 * PI / 4.0) + PI / 4.0).abs() < EPS);
        assert!((fold_half_turn(-3.0 * PI / 4.0) - PI / 4.0).abs() < EPS);
        assert!((fold_half_turn(0.3) - 0.3).abs() < EPS);
    }

    #[test]
    fn test_zero_offset_round_trip() {
        for (zero, scale) in [(2.97, 5.0), (0.18, 5.0), (4.76, 5.0), (1234.0, 4096.0)] {
            assert!(raw_to_angle(zero, zero, scale).abs() < EPS);
        }
        // A quarter revolution past zero is a quarter turn clockwise
        assert!((raw_to_angle(1.25, 0.0, 5.0) - FRAC_PI_2).abs() < EPS);
        // Wraps across the sensor rollover
        assert!((raw_to_angle(0.5, 4.5, 5.0) - TAU * 0.2).abs() < 1e-4);
    }

    #[test]
    fn test_reverse_when_allowed() {
        let out = optimize(0.8, PI, 0.0, true);
        assert!(out.delta.abs() <= FRAC_PI_2 + EPS);
        assert!(out.angle.abs() < EPS);
        assert_eq!(out.speed, -0.8);
    }

    #[test]
    fn test_no_reverse_when_disallowed() {
        let out = optimize(0.8, PI, 0.0, false);
        assert!((out.delta.abs() - PI).abs() < EPS);
        assert_eq!(out.speed, 0.8);
    }

    #[test]
    fn test_any_large_delta_is_reversed() {
        for i in 0..64 {
            let current = -PI + i as f32 * 0.1;
            for j in 0..64 {
                let target = -PI + j as f32 * 0.1;
                let raw = normalize(target - current);
                let out = optimize(0.5, target, current, true);
                assert!(out.delta.abs() <= FRAC_PI_2 + EPS);
                if raw.abs() > FRAC_PI_2 {
                    assert_eq!(out.speed, -0.5);
                } else {
                    assert_eq!(out.speed, 0.5);
                }
            }
        }
    }

    #[test]
    fn test_quarter_turn_boundary_not_flipped() {
        let out = optimize(1.0, FRAC_PI_2, 0.0, true);
        assert_eq!(out.speed, 1.0);
        assert!((out.angle - FRAC_PI_2).abs() < EPS);
    }
}
