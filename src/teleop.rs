// Operator input sources: keyboard teleop and JSON lines on stdin
//
// Keyboard: W/S forward/back, A/D strafe, Z/X rotate, R/F speed, Shift slows rotation,
// Space wheel lock, arrows nudge, 1/2/3 phase, Q/Esc quit
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::config::{NUDGE_SPEED, SLOW_ROTATE_SCALE};
use crate::messages::{Nudge, OperatorCommand, RobotPhase};
use crate::swerve::DriveIntent;

const SPEEDS: [f32; 3] = [0.3, 0.6, 1.0]; // fraction of full chassis speed
const INPUT_TIMEOUT: Duration = Duration::from_millis(100); // Reset velocities and nudges after this much time with no input
const POLL_INTERVAL: Duration = Duration::from_millis(20); // ~50Hz publish

/// Persistent velocity state driven by key presses
#[derive(Debug)]
pub struct Keyboard {
    speed_idx: usize,
    intent: DriveIntent,
    last_movement_input: Instant,
    /// Held arrow key, re-sent every cycle like the movement keys
    nudge: Option<Nudge>,
    last_nudge_input: Instant,
}

impl Keyboard {
    pub fn new(now: Instant) -> Self {
        Self {
            speed_idx: 0,
            intent: DriveIntent::default(),
            last_movement_input: now,
            nudge: None,
            last_nudge_input: now,
        }
    }

    /// Apply one key event. Returns a command that must be sent right away.
    pub fn handle(&mut self, key: KeyEvent, now: Instant) -> Option<OperatorCommand> {
        if !matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
            return None;
        }
        // Raw mode swallows SIGINT
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return Some(OperatorCommand::Quit);
        }

        let speed = SPEEDS[self.speed_idx];
        match key.code {
            KeyCode::Char(c) => {
                let shift = key.modifiers.contains(KeyModifiers::SHIFT) || c.is_ascii_uppercase();
                let rotate = if shift { speed * SLOW_ROTATE_SCALE } else { speed };
                match c.to_ascii_lowercase() {
                    // Movement - update velocity and refresh timestamp
                    'w' => self.moved(now, |i| i.x = speed),
                    's' => self.moved(now, |i| i.x = -speed),
                    'd' => self.moved(now, |i| i.y = speed),
                    'a' => self.moved(now, |i| i.y = -speed),
                    'x' => self.moved(now, |i| i.rcw = rotate),
                    'z' => self.moved(now, |i| i.rcw = -rotate),

                    'r' => {
                        self.speed_idx = (self.speed_idx + 1).min(SPEEDS.len() - 1);
                        self.print_speed();
                    }
                    'f' => {
                        self.speed_idx = self.speed_idx.saturating_sub(1);
                        self.print_speed();
                    }

                    ' ' => return Some(OperatorCommand::WheelLock),
                    '1' => return Some(OperatorCommand::Phase(RobotPhase::Disabled)),
                    '2' => return Some(OperatorCommand::Phase(RobotPhase::Autonomous)),
                    '3' => return Some(OperatorCommand::Phase(RobotPhase::Teleop)),
                    'q' => return Some(OperatorCommand::Quit),
                    _ => {}
                }
                None
            }
            KeyCode::Up => self.nudged(now, Nudge::Forward(NUDGE_SPEED)),
            KeyCode::Down => self.nudged(now, Nudge::Forward(-NUDGE_SPEED)),
            KeyCode::Right => self.nudged(now, Nudge::Strafe(NUDGE_SPEED)),
            KeyCode::Left => self.nudged(now, Nudge::Strafe(-NUDGE_SPEED)),
            KeyCode::Esc => Some(OperatorCommand::Quit),
            _ => None,
        }
    }

    fn moved(&mut self, now: Instant, set: impl FnOnce(&mut DriveIntent)) {
        set(&mut self.intent);
        self.last_movement_input = now;
    }

    fn nudged(&mut self, now: Instant, nudge: Nudge) -> Option<OperatorCommand> {
        self.nudge = Some(nudge);
        self.last_nudge_input = now;
        None
    }

    /// Nudge to publish this cycle, if an arrow key is still held
    pub fn nudge(&mut self, now: Instant) -> Option<Nudge> {
        if now.saturating_duration_since(self.last_nudge_input) > INPUT_TIMEOUT {
            self.nudge = None;
        }
        self.nudge
    }

    /// Intent to publish this cycle
    pub fn intent(&mut self, now: Instant) -> DriveIntent {
        // Reset velocities if no movement input for INPUT_TIMEOUT
        if now.saturating_duration_since(self.last_movement_input) > INPUT_TIMEOUT {
            self.intent = DriveIntent::default();
        }
        self.intent
    }

    fn print_speed(&self) {
        let label = ["LOW", "MED", "HIGH"][self.speed_idx];
        info!("Speed: {}", label);
    }
}

/// Read the keyboard on a dedicated thread until quit or the runtime goes away
pub fn spawn_keyboard(tx: UnboundedSender<OperatorCommand>) -> io::Result<thread::JoinHandle<()>> {
    enable_raw_mode()?;
    info!("Controls: WASD=move, Z/X=rotate (Shift=slow), R/F=speed, Space=lock, arrows=nudge, 1/2/3=phase, Q=quit");
    info!("Speed: LOW");

    let handle = thread::spawn(move || {
        if let Err(e) = keyboard_loop(&tx) {
            warn!("Keyboard input failed: {}", e);
        }
        restore_terminal();
    });
    Ok(handle)
}

/// Leave raw mode; harmless when the terminal is already restored
pub fn restore_terminal() {
    if let Err(e) = disable_raw_mode() {
        warn!("Failed to restore terminal: {}", e);
    }
}

fn keyboard_loop(tx: &UnboundedSender<OperatorCommand>) -> io::Result<()> {
    let mut keyboard = Keyboard::new(Instant::now());

    loop {
        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                if let Some(cmd) = keyboard.handle(key, Instant::now()) {
                    let quit = cmd == OperatorCommand::Quit;
                    if tx.send(cmd).is_err() || quit {
                        return Ok(());
                    }
                }
            }
        }

        // Always publish at ~50Hz
        let now = Instant::now();
        let intent = keyboard.intent(now);
        if tx.send(OperatorCommand::Drive(intent)).is_err() {
            return Ok(());
        }
        if let Some(nudge) = keyboard.nudge(now) {
            if tx.send(OperatorCommand::Nudge(nudge)).is_err() {
                return Ok(());
            }
        }
    }
}

/// Forward one JSON `OperatorCommand` per stdin line; EOF closes the channel
pub async fn read_stdin(tx: UnboundedSender<OperatorCommand>) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<OperatorCommand>(line) {
            Ok(cmd) => {
                if tx.send(cmd).is_err() {
                    break;
                }
            }
            Err(e) => warn!("Failed to parse command {:?}: {}", line, e),
        }
    }
    info!("Stdin closed");
    Ok(())
}
