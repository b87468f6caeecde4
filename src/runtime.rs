// 50 Hz control loop with command watchdog and robot phases
//
// Each tick: drain operator commands, run one drive period, send the recorded
// motor goals (so every sensor is read before any actuator is written), publish
// telemetry. A tick that takes longer than the period is fatal.

use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::{ANALOG_FULL_SCALE, CMD_TIMEOUT, ConfigError, DriveConfig, LOOP_HZ, PERIOD, SIM_STEER_RATE};
use crate::messages::{Nudge, OperatorCommand, RobotPhase, RuntimeHealth};
use crate::motor::{Actuator, AngleSensor, FeetechDrivetrain, FeetechError, SimPlant};
use crate::swerve::{AnglePid, DriveIntent, SwerveDrive, SwerveModule, WheelPosition};
use crate::telemetry::TelemetrySink;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Servo bus error: {0}")]
    Bus(#[from] FeetechError),

    #[error("Operator input error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Control period overrun: tick took {elapsed:?}, period is {period:?}")]
    Overrun { elapsed: Duration, period: Duration },
}

/// Where the eight channels come from
pub enum Backend {
    Sim(SimPlant),
    Feetech(FeetechDrivetrain),
}

impl Backend {
    /// Simulated plant with every wheel starting at its zero offset (pointing forward)
    pub fn sim(config: &DriveConfig) -> Self {
        let plant = SimPlant::new(ANALOG_FULL_SCALE, SIM_STEER_RATE);
        for position in WheelPosition::ALL {
            if let Some(entry) = config.entry(position) {
                plant.wheels[position.index()].set_raw(entry.module.zero_offset);
            }
        }
        Backend::Sim(plant)
    }

    pub fn feetech(port: &str, config: &DriveConfig) -> Result<Self, RuntimeError> {
        let mut drivetrain = FeetechDrivetrain::open(port, config.bus_ids()?)?;
        drivetrain.initialize()?;
        Ok(Backend::Feetech(drivetrain))
    }

    /// Send the goals recorded this tick
    fn flush(&mut self) -> Result<(), FeetechError> {
        match self {
            Backend::Sim(_) => Ok(()),
            Backend::Feetech(drivetrain) => drivetrain.flush_goals(),
        }
    }

    fn channels(&self, i: usize) -> (Box<dyn Actuator>, Box<dyn Actuator>, Box<dyn AngleSensor>) {
        match self {
            Backend::Sim(plant) => {
                let wheel = &plant.wheels[i];
                (
                    Box::new(wheel.drive_motor()),
                    Box::new(wheel.steer_motor()),
                    Box::new(wheel.encoder()),
                )
            }
            Backend::Feetech(drivetrain) => (
                Box::new(drivetrain.drive_motor(i)),
                Box::new(drivetrain.steer_motor(i)),
                Box::new(drivetrain.encoder(i)),
            ),
        }
    }
}

/// Assemble the four modules and the drive from config and a backend
pub fn build_drive(config: &DriveConfig, backend: &Backend) -> Result<SwerveDrive, ConfigError> {
    config.validate()?;

    let mut modules = Vec::with_capacity(4);
    for position in WheelPosition::ALL {
        let entry = config
            .entry(position)
            .ok_or(ConfigError::MissingPosition(position))?;
        let (drive, steer, sensor) = backend.channels(position.index());
        let servo = AnglePid::new(config.steer_gains, PERIOD.as_secs_f32());
        modules.push(SwerveModule::new(entry.module.clone(), drive, steer, sensor, servo));
    }

    let modules: [SwerveModule; 4] = match modules.try_into() {
        Ok(modules) => modules,
        Err(v) => return Err(ConfigError::ModuleCount(v.len())),
    };
    let mut drive = SwerveDrive::new(modules, config.geometry)?;
    drive.set_allow_reverse(config.allow_reverse);
    Ok(drive)
}

pub struct Runtime {
    drive: SwerveDrive,
    sink: Box<dyn TelemetrySink>,
    backend: Backend,
    phase: RobotPhase,

    latest_intent: Option<DriveIntent>,
    intent_received_at: Option<Instant>,
    lock_requested: bool,
    nudges: Vec<Nudge>,

    health: RuntimeHealth,
    bus_fault: bool,
    ticks: u64,
}

impl Runtime {
    /// Starts disabled with every motor at zero
    pub fn new(mut drive: SwerveDrive, sink: Box<dyn TelemetrySink>, backend: Backend) -> Self {
        drive.disable();
        Self {
            drive,
            sink,
            backend,
            phase: RobotPhase::Disabled,
            latest_intent: None,
            intent_received_at: None,
            lock_requested: false,
            nudges: Vec::new(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
            bus_fault: false,
            ticks: 0,
        }
    }

    pub fn phase(&self) -> RobotPhase {
        self.phase
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn drive(&self) -> &SwerveDrive {
        &self.drive
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Phase transition: flush the drive and set the phase's input shaping
    pub fn enter_phase(&mut self, phase: RobotPhase) {
        if phase == self.phase {
            return;
        }
        info!("Phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        self.latest_intent = None;
        self.intent_received_at = None;
        self.lock_requested = false;
        self.nudges.clear();

        self.drive.flush();
        match phase {
            RobotPhase::Disabled => self.drive.disable(),
            RobotPhase::Autonomous => {
                self.drive.threshold_input_vectors = true;
            }
            RobotPhase::Teleop => {
                self.drive.squared_inputs = true;
                self.drive.threshold_input_vectors = true;
            }
        }
    }

    /// Process incoming command. Returns false when the operator asked to quit.
    pub fn on_command(&mut self, cmd: OperatorCommand) -> bool {
        debug!("Received command: {:?}", &cmd);
        match cmd {
            OperatorCommand::Drive(intent) => {
                self.latest_intent = Some(intent);
                self.intent_received_at = Some(Instant::now());
            }
            OperatorCommand::WheelLock => self.lock_requested = true,
            OperatorCommand::Nudge(nudge) => self.nudges.push(nudge),
            OperatorCommand::Phase(phase) => self.enter_phase(phase),
            OperatorCommand::Quit => return false,
        }
        true
    }

    /// Latest intent if it is younger than the watchdog timeout
    fn fresh_intent(&self, now: Instant) -> Option<DriveIntent> {
        match (self.latest_intent, self.intent_received_at) {
            (Some(intent), Some(at)) if now.saturating_duration_since(at) <= CMD_TIMEOUT => Some(intent),
            _ => None,
        }
    }

    fn set_health(&mut self, health: RuntimeHealth) {
        if health == self.health {
            return;
        }
        match health {
            RuntimeHealth::Ok => info!("Health ok"),
            RuntimeHealth::CmdStale => {
                warn!("Command stale (older than {:?}), stopping chassis", CMD_TIMEOUT)
            }
            RuntimeHealth::Degraded => warn!("Drivetrain degraded, a module has a faulty channel"),
        }
        self.health = health;
    }

    /// One control period
    pub fn tick(&mut self, now: Instant) {
        let lock = std::mem::take(&mut self.lock_requested);
        let nudges = std::mem::take(&mut self.nudges);
        let mut stale = false;

        match self.phase {
            // Motors stay off, sensors keep feeding telemetry
            RobotPhase::Disabled => self.drive.refresh(),
            RobotPhase::Autonomous => self.drive.update(),
            RobotPhase::Teleop => {
                // Watchdog triggered - command zero
                let intent = self.fresh_intent(now).unwrap_or_else(|| {
                    stale = true;
                    DriveIntent::default()
                });
                self.drive.move_chassis(intent.x, intent.y, intent.rcw);
                if lock {
                    self.drive.request_wheel_lock();
                }
                for nudge in nudges {
                    match nudge {
                        Nudge::Forward(v) => self.drive.set_raw_fwd(v),
                        Nudge::Strafe(v) => self.drive.set_raw_strafe(v),
                    }
                }
                self.drive.update();
            }
        }

        match self.backend.flush() {
            Ok(()) if self.bus_fault => {
                info!("Servo bus writes recovered");
                self.bus_fault = false;
            }
            Ok(()) => {}
            Err(e) => {
                if !self.bus_fault {
                    warn!("Failed to send motor goals: {}", e);
                }
                self.bus_fault = true;
            }
        }

        let health = if self.drive.is_degraded() || self.bus_fault {
            RuntimeHealth::Degraded
        } else if stale {
            RuntimeHealth::CmdStale
        } else {
            RuntimeHealth::Ok
        };
        self.set_health(health);

        self.publish();

        if let Backend::Sim(plant) = &self.backend {
            plant.step(PERIOD.as_secs_f32());
        }
        self.ticks += 1;
    }

    fn publish(&mut self) {
        self.drive.update_telemetry(self.sink.as_mut());
        self.sink.put_text("runtime/phase", phase_name(self.phase));
        self.sink.put_text("runtime/health", self.health.as_str());

        if self.ticks % LOOP_HZ == 0 {
            match serde_json::to_string(&self.drive.snapshot()) {
                Ok(json) => debug!("Drive snapshot: {}", json),
                Err(e) => warn!("Failed to serialize drive snapshot: {}", e),
            }
        }
    }

    /// Leave the hardware safe
    pub fn shutdown(&mut self) {
        info!("Shutting down drivetrain");
        self.drive.disable();
        if let Backend::Feetech(drivetrain) = &mut self.backend {
            if let Err(e) = drivetrain.stop_all() {
                warn!("Failed to stop servos: {}", e);
            }
        }
    }
}

fn phase_name(phase: RobotPhase) -> &'static str {
    match phase {
        RobotPhase::Disabled => "disabled",
        RobotPhase::Autonomous => "autonomous",
        RobotPhase::Teleop => "teleop",
    }
}

pub async fn run(
    mut runtime: Runtime,
    mut commands: mpsc::UnboundedReceiver<OperatorCommand>,
) -> Result<(), RuntimeError> {
    let mut tick = interval(PERIOD);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout, phase {:?}",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis(),
        runtime.phase()
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                runtime.shutdown();
                return Ok(());
            }
        }
        let started = Instant::now();

        // 1. Drain all pending commands (non-blocking)
        loop {
            match commands.try_recv() {
                Ok(cmd) => {
                    if !runtime.on_command(cmd) {
                        info!("Quit requested");
                        runtime.shutdown();
                        return Ok(());
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("Operator input closed");
                    runtime.shutdown();
                    return Ok(());
                }
            }
        }

        // 2. Sense, compute, actuate, publish
        runtime.tick(started);

        // 3. Period budget
        let elapsed = started.elapsed();
        if elapsed > PERIOD {
            error!("Tick took {:?}, over the {:?} period", elapsed, PERIOD);
            runtime.shutdown();
            return Err(RuntimeError::Overrun {
                elapsed,
                period: PERIOD,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swerve::DriveMode;
    use crate::telemetry::MemorySink;

    fn sim_runtime() -> Runtime {
        let config = DriveConfig::default();
        let backend = Backend::sim(&config);
        let drive = build_drive(&config, &backend).unwrap();
        Runtime::new(drive, Box::new(MemorySink::default()), backend)
    }

    fn plant(runtime: &Runtime) -> &SimPlant {
        match runtime.backend() {
            Backend::Sim(plant) => plant,
            Backend::Feetech(_) => unreachable!(),
        }
    }

    fn drive_cmd(x: f32, y: f32, rcw: f32) -> OperatorCommand {
        OperatorCommand::Drive(DriveIntent::new(x, y, rcw))
    }

    #[test]
    fn test_built_drive_reads_forward_at_zero_offsets() {
        let mut runtime = sim_runtime();
        runtime.enter_phase(RobotPhase::Teleop);
        runtime.tick(Instant::now());
        for m in runtime.drive().modules() {
            assert!(m.current_angle().abs() < 1e-4, "{}: {}", m.name(), m.current_angle());
        }
    }

    #[test]
    fn test_starts_disabled_and_ignores_drive() {
        let mut runtime = sim_runtime();
        assert_eq!(runtime.phase(), RobotPhase::Disabled);
        runtime.on_command(drive_cmd(1.0, 0.0, 0.0));
        runtime.tick(Instant::now());
        assert!(plant(&runtime).wheels.iter().all(|w| w.drive_output() == 0.0));
    }

    #[test]
    fn test_disabled_keeps_sampling_sensors() {
        let mut runtime = sim_runtime();
        runtime.tick(Instant::now());
        let wheel = &plant(&runtime).wheels[WheelPosition::FrontRight.index()];
        let zero = DriveConfig::default().entry(WheelPosition::FrontRight).unwrap().module.zero_offset;
        let writes = wheel.drive_writes();

        wheel.set_raw(zero + 0.5 / std::f32::consts::TAU * ANALOG_FULL_SCALE);
        runtime.tick(Instant::now());
        let angle = runtime.drive().module(WheelPosition::FrontRight).current_angle();
        assert!((angle - 0.5).abs() < 1e-3, "angle {}", angle);
        assert_eq!(plant(&runtime).wheels[1].drive_writes(), writes, "no motor writes while disabled");
    }

    /// Sensor that spends a full bus timeout and then fails, like a silent servo
    struct SilentServo;

    impl AngleSensor for SilentServo {
        fn read_raw(&mut self) -> Result<f32, crate::motor::HalError> {
            std::thread::sleep(crate::config::BUS_TIMEOUT);
            Err(FeetechError::Timeout { id: 3 }.into())
        }

        fn units_per_revolution(&self) -> f32 {
            crate::motor::STEPS_PER_REVOLUTION
        }
    }

    #[test]
    fn test_silent_servo_degrades_without_overrun() {
        let config = DriveConfig::default();
        let plant = SimPlant::new(ANALOG_FULL_SCALE, SIM_STEER_RATE);
        let modules = WheelPosition::ALL.map(|position| {
            let entry = config.entry(position).unwrap();
            let wheel = &plant.wheels[position.index()];
            wheel.set_raw(entry.module.zero_offset);
            let sensor: Box<dyn AngleSensor> = if position == WheelPosition::FrontLeft {
                Box::new(SilentServo)
            } else {
                Box::new(wheel.encoder())
            };
            SwerveModule::new(
                entry.module.clone(),
                Box::new(wheel.drive_motor()),
                Box::new(wheel.steer_motor()),
                sensor,
                AnglePid::new(config.steer_gains, PERIOD.as_secs_f32()),
            )
        });
        let drive = SwerveDrive::new(modules, config.geometry).unwrap();
        let mut runtime = Runtime::new(drive, Box::new(MemorySink::default()), Backend::Sim(plant.clone()));
        runtime.enter_phase(RobotPhase::Teleop);

        for _ in 0..5 {
            runtime.on_command(drive_cmd(0.5, 0.0, 0.0));
            let started = Instant::now();
            runtime.tick(started);
            assert!(started.elapsed() < PERIOD, "tick took {:?}", started.elapsed());
        }

        assert_eq!(runtime.health(), RuntimeHealth::Degraded);
        assert!(runtime.drive().module(WheelPosition::FrontLeft).is_degraded());
        for position in [WheelPosition::FrontRight, WheelPosition::RearLeft, WheelPosition::RearRight] {
            assert!(!runtime.drive().module(position).is_degraded());
            assert!(plant.wheels[position.index()].drive_output().abs() > 0.1, "{:?} still driving", position);
        }
    }

    #[test]
    fn test_phase_shaping_flags() {
        let mut runtime = sim_runtime();
        runtime.enter_phase(RobotPhase::Autonomous);
        assert!(runtime.drive().threshold_input_vectors);
        assert!(!runtime.drive().squared_inputs);

        runtime.on_command(OperatorCommand::Phase(RobotPhase::Teleop));
        assert_eq!(runtime.phase(), RobotPhase::Teleop);
        assert!(runtime.drive().threshold_input_vectors);
        assert!(runtime.drive().squared_inputs);
        assert_eq!(runtime.drive().mode(), DriveMode::Idle);
    }

    #[test]
    fn test_teleop_drives_with_fresh_command() {
        let mut runtime = sim_runtime();
        runtime.enter_phase(RobotPhase::Teleop);
        runtime.on_command(drive_cmd(1.0, 0.0, 0.0));
        runtime.tick(Instant::now());
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
        assert_eq!(runtime.drive().mode(), DriveMode::Normal);
        assert!(plant(&runtime).wheels.iter().all(|w| w.drive_output().abs() > 0.99));
    }

    #[test]
    fn test_watchdog_zeroes_stale_intent() {
        let mut runtime = sim_runtime();
        runtime.enter_phase(RobotPhase::Teleop);
        runtime.on_command(drive_cmd(1.0, 0.0, 0.0));
        runtime.tick(Instant::now() + CMD_TIMEOUT + Duration::from_millis(50));
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
        assert!(plant(&runtime).wheels.iter().all(|w| w.drive_output() == 0.0));
    }

    #[test]
    fn test_wheel_lock_and_nudge_are_one_shot() {
        let mut runtime = sim_runtime();
        runtime.enter_phase(RobotPhase::Teleop);
        runtime.on_command(OperatorCommand::WheelLock);
        runtime.tick(Instant::now());
        assert_eq!(runtime.drive().mode(), DriveMode::WheelLock);

        runtime.on_command(OperatorCommand::Nudge(Nudge::Forward(0.35)));
        runtime.tick(Instant::now());
        assert_eq!(runtime.drive().mode(), DriveMode::RawNudge);

        runtime.tick(Instant::now());
        assert_eq!(runtime.drive().mode(), DriveMode::Normal);
    }

    #[test]
    fn test_autonomous_holds_without_operator_input() {
        let mut runtime = sim_runtime();
        runtime.enter_phase(RobotPhase::Autonomous);
        runtime.on_command(drive_cmd(1.0, 0.0, 0.0));
        runtime.tick(Instant::now());
        assert_eq!(runtime.drive().mode(), DriveMode::Idle);
        assert!(plant(&runtime).wheels.iter().all(|w| w.drive_output() == 0.0));
    }

    #[test]
    fn test_degraded_health_and_recovery() {
        let mut runtime = sim_runtime();
        runtime.enter_phase(RobotPhase::Teleop);
        plant(&runtime).wheels[1].set_stale(true);
        runtime.on_command(drive_cmd(0.5, 0.0, 0.0));
        runtime.tick(Instant::now());
        assert_eq!(runtime.health(), RuntimeHealth::Degraded);

        plant(&runtime).wheels[1].set_stale(false);
        runtime.on_command(drive_cmd(0.5, 0.0, 0.0));
        runtime.tick(Instant::now());
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_sim_wheels_converge_to_rotation_headings() {
        let mut runtime = sim_runtime();
        runtime.enter_phase(RobotPhase::Teleop);
        for _ in 0..100 {
            runtime.on_command(drive_cmd(0.0, 0.0, 1.0));
            runtime.tick(Instant::now());
        }
        for m in runtime.drive().modules() {
            let error = crate::swerve::angle::normalize(m.target_angle() - m.current_angle());
            assert!(error.abs() < 0.05, "{} still {} rad off", m.name(), error);
        }
    }

    #[test]
    fn test_quit_command() {
        let mut runtime = sim_runtime();
        assert!(runtime.on_command(OperatorCommand::WheelLock));
        assert!(!runtime.on_command(OperatorCommand::Quit));
    }
}
