// Module diagnostic: READ-ONLY check of the eight drivetrain servos
//
// Pings every drive and steer servo, then prints each steer servo's present
// position next to the corrected wheel angle under the current calibration.
// Point every wheel forward before running it: the corrected angles should all
// read close to 0.
//
// Usage: cargo run --example module_diagnostic -- [port] [config.json]
// Example: cargo run --example module_diagnostic -- /dev/ttyUSB0 config/feetech.json

use std::io::{self, Write};

use swerve_runtime::config::{DriveConfig, MOTOR_PORT};
use swerve_runtime::motor::feetech::{FeetechBus, Register};
use swerve_runtime::motor::STEPS_PER_REVOLUTION;
use swerve_runtime::swerve::WheelPosition;
use swerve_runtime::swerve::angle::raw_to_angle;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| MOTOR_PORT.to_string());
    let config = match args.next() {
        Some(path) => DriveConfig::load(path)?,
        None => DriveConfig::default(),
    };
    let ids = config.bus_ids()?;

    println!("Swerve module diagnostic (READ-ONLY, nothing is written to the servos)");
    println!("Serial port: {}", port);
    println!();

    println!("Step 1: Opening serial port...");
    let mut bus = match FeetechBus::open(&port) {
        Ok(bus) => {
            println!("  ✓ Serial port opened");
            bus
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!("  - Check the port path and the USB cable");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Pinging servos...");
    let mut all_found = true;
    for position in WheelPosition::ALL {
        let (drive_id, steer_id) = ids[position.index()];
        for (role, id) in [("drive", drive_id), ("steer", steer_id)] {
            print!("  {:?} {} (ID {}): ", position, role, id);
            io::stdout().flush()?;
            match bus.ping(id) {
                Ok(true) => println!("✓ RESPONDING"),
                Ok(false) => {
                    println!("✗ NO RESPONSE");
                    all_found = false;
                }
                Err(e) => {
                    println!("✗ ERROR: {}", e);
                    all_found = false;
                }
            }
        }
    }
    println!();
    if !all_found {
        println!("⚠ Not all servos responded, check power and ids in the config");
        println!();
    }

    println!("Step 3: Reading steer positions...");
    println!();
    println!("  {:<20} {:>6} {:>8} {:>10} {:>10}", "module", "mode", "raw", "zero", "angle");
    for position in WheelPosition::ALL {
        let Some(entry) = config.entry(position) else {
            continue;
        };
        let steer_id = ids[position.index()].1;

        let mode = match bus.read_u8(steer_id, Register::OperatingMode) {
            Ok(0) => "pos",
            Ok(1) => "vel",
            Ok(2) => "pwm",
            Ok(_) => "?",
            Err(_) => "err",
        };
        match bus.read_u16(steer_id, Register::PresentPosition) {
            Ok(raw) => {
                let angle = raw_to_angle(raw as f32, entry.module.zero_offset, STEPS_PER_REVOLUTION);
                println!(
                    "  {:<20} {:>6} {:>8} {:>10.0} {:>+9.1}°",
                    entry.module.name,
                    mode,
                    raw,
                    entry.module.zero_offset,
                    angle.to_degrees()
                );
            }
            Err(e) => println!("  {:<20} {:>6} ERROR - {}", entry.module.name, mode, e),
        }
    }
    println!();
    println!("A wheel reading far from 0° while pointed forward needs its zero_offset");
    println!("set to the raw value shown.");

    Ok(())
}
