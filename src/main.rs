use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use swerve_runtime::config::{DriveConfig, MOTOR_PORT};
use swerve_runtime::messages::RobotPhase;
use swerve_runtime::runtime::{self, Backend, Runtime, RuntimeError, build_drive};
use swerve_runtime::telemetry::TracingSink;
use swerve_runtime::teleop;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendKind {
    Sim,
    Feetech,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InputKind {
    Keyboard,
    Stdin,
}

/// Swerve drivetrain control loop
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON drive config (built-in calibration when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "sim")]
    backend: BackendKind,

    /// Feetech servo bus serial port
    #[arg(long, default_value = MOTOR_PORT)]
    port: String,

    #[arg(long, value_enum, default_value = "keyboard")]
    input: InputKind,

    /// Phase to enter once the drivetrain is up
    #[arg(long, value_enum, default_value = "teleop")]
    phase: RobotPhase,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Setup logging (set RUST_LOG=debug for snapshots, trace for telemetry)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = start(args).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn start(args: Args) -> Result<(), RuntimeError> {
    let config = match &args.config {
        Some(path) => DriveConfig::load(path)?,
        None => {
            info!("No config given, using built-in calibration");
            DriveConfig::default()
        }
    };

    let backend = match args.backend {
        BackendKind::Sim => Backend::sim(&config),
        BackendKind::Feetech => Backend::feetech(&args.port, &config)?,
    };
    let drive = build_drive(&config, &backend)?;
    let mut runtime = Runtime::new(drive, Box::new(TracingSink), backend);
    runtime.enter_phase(args.phase);

    let (tx, rx) = mpsc::unbounded_channel();
    match args.input {
        InputKind::Keyboard => {
            // The thread exits on its own once the runtime drops the receiver
            teleop::spawn_keyboard(tx)?;
        }
        InputKind::Stdin => {
            tokio::spawn(async move {
                if let Err(e) = teleop::read_stdin(tx).await {
                    warn!("Stdin input failed: {}", e);
                }
            });
        }
    }

    let result = runtime::run(runtime, rx).await;

    if matches!(args.input, InputKind::Keyboard) {
        teleop::restore_terminal();
    }
    result
}
