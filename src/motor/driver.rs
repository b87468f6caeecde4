// Feetech wiring for a swerve drivetrain
//
// Eight STS3215 servos on one bus: drive servos run in velocity mode, steer
// servos run open-loop in PWM mode and their position sensor doubles as the
// module's absolute angle sensor.
//
// Goal commands are not written one servo at a time. Actuators only record
// their goal; `flush_goals` sends every goal of the tick in two sync-write
// packets, which servos never answer. The only blocking round trips left in
// a tick are the four position reads.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::feetech::{FeetechBus, FeetechError, OperatingMode, Register, encode_signed};
use super::{Actuator, AngleSensor, HalError};
use crate::config::BUS_TIMEOUT;

/// Steer servo position resolution
pub const STEPS_PER_REVOLUTION: f32 = 4096.0;

/// Drive velocity (steps/s) commanded at full output
pub const MAX_DRIVE_RAW: i16 = 3000;

/// Steer PWM duty commanded at full output
pub const MAX_STEER_DUTY: i16 = 1000;

type SharedBus = Rc<RefCell<FeetechBus>>;
type SharedGoals = Rc<RefCell<PendingGoals>>;

/// Goals recorded during a tick, keyed by servo id
#[derive(Debug, Default)]
struct PendingGoals {
    velocity: BTreeMap<u8, u16>,
    pwm: BTreeMap<u8, u16>,
}

impl PendingGoals {
    fn set(&mut self, id: u8, mode: OperatingMode, output: f32) {
        match mode {
            OperatingMode::Pwm => {
                self.pwm.insert(id, encode_signed(scale_output(output, MAX_STEER_DUTY), 10));
            }
            _ => {
                self.velocity.insert(id, encode_signed(scale_output(output, MAX_DRIVE_RAW), 15));
            }
        }
    }

    /// (velocity goals, pwm goals) ready for sync write; leaves the table empty
    fn take(&mut self) -> (Vec<(u8, u16)>, Vec<(u8, u16)>) {
        (
            std::mem::take(&mut self.velocity).into_iter().collect(),
            std::mem::take(&mut self.pwm).into_iter().collect(),
        )
    }
}

/// The eight drivetrain servos on one bus
pub struct FeetechDrivetrain {
    bus: SharedBus,
    goals: SharedGoals,
    /// (drive id, steer id) per module in `WheelPosition::ALL` order
    ids: [(u8, u8); 4],
}

impl FeetechDrivetrain {
    pub fn open(port: &str, ids: [(u8, u8); 4]) -> Result<Self, FeetechError> {
        info!("Opening servo bus on {}", port);
        let bus = FeetechBus::open(port)?;
        Ok(Self {
            bus: Rc::new(RefCell::new(bus)),
            goals: SharedGoals::default(),
            ids,
        })
    }

    fn all_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.ids.iter().flat_map(|&(drive, steer)| [drive, steer])
    }

    /// Put every servo into the mode the swerve modules expect
    ///
    /// Must be called before the channels are used. Disables torque, sets
    /// velocity mode on drive servos and PWM mode on steer servos, re-enables
    /// torque, then drops the reply timeout to the control-loop value.
    pub fn initialize(&mut self) -> Result<(), FeetechError> {
        info!("Initializing drivetrain servos {:?}", self.ids);
        let mut bus = self.bus.borrow_mut();

        for id in self.all_ids() {
            if bus.ping(id)? {
                debug!("Servo {} responding", id);
            } else {
                warn!("Servo {} not responding to ping", id);
                return Err(FeetechError::Timeout { id });
            }
        }

        for id in self.all_ids() {
            bus.set_torque(id, false)?;
        }
        for &(drive, steer) in &self.ids {
            bus.set_operating_mode(drive, OperatingMode::Velocity)?;
            bus.set_operating_mode(steer, OperatingMode::Pwm)?;
        }
        for id in self.all_ids() {
            bus.set_torque(id, true)?;
        }
        bus.set_timeout(BUS_TIMEOUT)?;

        info!("Drivetrain servos initialized");
        Ok(())
    }

    pub fn drive_motor(&self, module: usize) -> FeetechMotor {
        FeetechMotor {
            goals: self.goals.clone(),
            id: self.ids[module].0,
            mode: OperatingMode::Velocity,
        }
    }

    pub fn steer_motor(&self, module: usize) -> FeetechMotor {
        FeetechMotor {
            goals: self.goals.clone(),
            id: self.ids[module].1,
            mode: OperatingMode::Pwm,
        }
    }

    pub fn encoder(&self, module: usize) -> FeetechEncoder {
        FeetechEncoder {
            bus: self.bus.clone(),
            id: self.ids[module].1,
        }
    }

    /// Send the goals recorded since the last flush, one packet per mode
    pub fn flush_goals(&mut self) -> Result<(), FeetechError> {
        let (velocity, pwm) = self.goals.borrow_mut().take();
        let mut bus = self.bus.borrow_mut();
        bus.sync_write_u16(Register::GoalVelocity, &velocity)?;
        bus.sync_write_u16(Register::GoalTime, &pwm)
    }

    /// Zero every drive and steer command in two broadcast packets
    pub fn stop_all(&mut self) -> Result<(), FeetechError> {
        info!("Stopping all drivetrain servos");
        self.goals.borrow_mut().take();
        let drives: Vec<(u8, u16)> = self.ids.iter().map(|&(d, _)| (d, 0)).collect();
        let steers: Vec<(u8, u16)> = self.ids.iter().map(|&(_, s)| (s, 0)).collect();
        let mut bus = self.bus.borrow_mut();
        bus.sync_write_u16(Register::GoalVelocity, &drives)?;
        bus.sync_write_u16(Register::GoalTime, &steers)
    }
}

impl Drop for FeetechDrivetrain {
    fn drop(&mut self) {
        // Never leave the chassis driving when the runtime exits
        if let Err(e) = self.stop_all() {
            warn!("Failed to stop servos on drop: {}", e);
        }
    }
}

/// Scale a normalized output to a signed raw command
fn scale_output(output: f32, max: i16) -> i16 {
    (output.clamp(-1.0, 1.0) * max as f32).round() as i16
}

/// One servo used as a normalized motor; the goal goes out on the next flush
pub struct FeetechMotor {
    goals: SharedGoals,
    id: u8,
    mode: OperatingMode,
}

impl Actuator for FeetechMotor {
    fn set(&mut self, output: f32) -> Result<(), HalError> {
        self.goals.borrow_mut().set(self.id, self.mode, output);
        Ok(())
    }
}

/// A steer servo's position register as an absolute encoder
pub struct FeetechEncoder {
    bus: SharedBus,
    id: u8,
}

impl AngleSensor for FeetechEncoder {
    fn read_raw(&mut self) -> Result<f32, HalError> {
        Ok(self.bus.borrow_mut().present_position(self.id)? as f32)
    }

    fn units_per_revolution(&self) -> f32 {
        STEPS_PER_REVOLUTION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_output() {
        assert_eq!(scale_output(1.0, MAX_DRIVE_RAW), 3000);
        assert_eq!(scale_output(-0.5, MAX_STEER_DUTY), -500);
        assert_eq!(scale_output(7.0, MAX_STEER_DUTY), 1000);
        assert_eq!(scale_output(0.0, MAX_DRIVE_RAW), 0);
    }

    #[test]
    fn test_pwm_duty_encoding() {
        // Reverse full duty sets the direction bit above the 10-bit magnitude
        assert_eq!(encode_signed(scale_output(-1.0, MAX_STEER_DUTY), 10), 0x400 | 1000);
    }

    #[test]
    fn test_goals_batched_per_mode() {
        let goals = SharedGoals::default();
        let mut drive = FeetechMotor {
            goals: goals.clone(),
            id: 5,
            mode: OperatingMode::Velocity,
        };
        let mut steer = FeetechMotor {
            goals: goals.clone(),
            id: 3,
            mode: OperatingMode::Pwm,
        };

        drive.set(0.5).unwrap();
        steer.set(-1.0).unwrap();
        // A second write in the same tick replaces the first
        drive.set(-0.5).unwrap();

        let (velocity, pwm) = goals.borrow_mut().take();
        assert_eq!(velocity, vec![(5, encode_signed(-1500, 15))]);
        assert_eq!(pwm, vec![(3, 0x400 | 1000)]);

        let (velocity, pwm) = goals.borrow_mut().take();
        assert!(velocity.is_empty() && pwm.is_empty(), "flushed goals are not resent");
    }
}
