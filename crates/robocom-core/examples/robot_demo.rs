//! Robocom demo driver
//!
//! Runs one of the stock demo sequences against a robot on a serial port, or
//! against the built-in simulator.
//!
//! Usage:
//!   cargo run --example robot_demo -- [OPTIONS] [MODE]
//!
//! Modes:
//!   echo      Round-trip echo requests and print the latency (default)
//!   spin      Drive both wheels and print encoder ticks
//!   servo     Sweep the servo 0 -> 180 -> 0
//!   gyro      Subscribe to the gyro and print readings
//!
//! Options:
//!   --port PORT       Serial port (default: first detected)
//!   --baud RATE       Baud rate (default: 57600)
//!   --config FILE     Load link settings from a JSON file
//!   --remocon         Speak the older Remocon protocol
//!   --seconds N       How long to run (default: 3)
//!   --demo            Use the simulated robot instead of a serial port
//!
//! Set RUST_LOG=robocom_core=debug to see frame-level logging.

use anyhow::{bail, Context, Result};
use robocom_core::prelude::*;
use robocom_core::protocol::{list_ports, GyroReading};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Echo,
    Spin,
    Servo,
    Gyro,
}

impl Mode {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "echo" => Some(Mode::Echo),
            "spin" => Some(Mode::Spin),
            "servo" => Some(Mode::Servo),
            "gyro" => Some(Mode::Gyro),
            _ => None,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = LinkConfig::default();
    let mut port_override = None;
    let mut baud_override = None;
    let mut remocon = false;
    let mut seconds = 3u64;
    let mut demo = false;
    let mut mode = Mode::Echo;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    port_override = Some(args[i].clone());
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if i < args.len() {
                    baud_override = Some(args[i].parse().context("invalid baud rate")?);
                }
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config = LinkConfig::from_file(&args[i])?;
                }
            }
            "--seconds" | "-s" => {
                i += 1;
                if i < args.len() {
                    seconds = args[i].parse().unwrap_or(3);
                }
            }
            "--remocon" => remocon = true,
            "--demo" => demo = true,
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            arg if !arg.starts_with('-') => match Mode::parse(arg) {
                Some(m) => mode = m,
                None => bail!("unknown mode '{}'", arg),
            },
            other => eprintln!("Unknown option: {}", other),
        }
        i += 1;
    }

    if let Some(port) = port_override {
        config.port_name = port;
    }
    if let Some(baud) = baud_override {
        config.baud_rate = baud;
    }
    if remocon {
        config.protocol = ProtocolVersion::Remocon;
    }
    let duration = Duration::from_secs(seconds);

    if demo {
        println!("Running {:?} against the simulated robot", mode);
        let robot = SimulatedRobot::new(config.protocol);
        let mut client = Client::from_config(robot, &config);
        return run(&mut client, mode, duration, config.flush_timeout());
    }

    if config.port_name.is_empty() {
        let ports = list_ports();
        let Some(first) = ports.first() else {
            bail!("no serial ports found; pass --port or use --demo");
        };
        config.port_name = first.name.clone();
    }

    println!(
        "Running {:?} on {} at {} baud ({:?})",
        mode, config.port_name, config.baud_rate, config.protocol
    );
    let mut client = Client::open(&config)
        .with_context(|| format!("failed to open {}", config.port_name))?;
    run(&mut client, mode, duration, config.flush_timeout())
}

fn run<T: Transport>(
    client: &mut Client<T>,
    mode: Mode,
    duration: Duration,
    timeout: Duration,
) -> Result<()> {
    let echo = client.echo(timeout)?;
    println!("Robot answered echo (task {})", echo.task_id);
    client.reset()?;
    client.flush(timeout)?;

    let result = match mode {
        Mode::Echo => echo_loop(client, duration, timeout),
        Mode::Spin => spin(client, duration, timeout),
        Mode::Servo => servo_sweep(client, timeout),
        Mode::Gyro => print_gyro(client, duration, timeout),
    };

    // Always leave the robot stopped
    client.reset()?;
    client.flush(timeout)?;
    print_messages(client)?;

    let stats = client.stats();
    let (tx_bytes, tx_frames) = client.tx_counters();
    println!(
        "Frames in: {} ({} dropped, {} noise bytes), frames out: {} ({} bytes)",
        stats.frames, stats.dropped, stats.discarded_bytes, tx_frames, tx_bytes
    );
    result
}

fn echo_loop<T: Transport>(
    client: &mut Client<T>,
    duration: Duration,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    let mut rounds = 0u32;
    let mut worst = Duration::ZERO;
    while start.elapsed() < duration {
        let sent = Instant::now();
        client.echo(timeout)?;
        worst = worst.max(sent.elapsed());
        rounds += 1;
        std::thread::sleep(Duration::from_millis(100));
    }
    println!("{} echoes, slowest {:?}", rounds, worst);
    Ok(())
}

/// Poll with a flush every 100ms until `duration` is up
fn flush_loop<T: Transport>(
    client: &mut Client<T>,
    duration: Duration,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    while start.elapsed() < duration {
        std::thread::sleep(Duration::from_millis(100));
        client.flush(timeout)?;
        print_messages(client)?;
    }
    Ok(())
}

fn spin<T: Transport>(client: &mut Client<T>, duration: Duration, timeout: Duration) -> Result<()> {
    client.subscribe_encoder(0)?;
    client.subscribe_encoder(1)?;
    client.drive(Direction::Forward, 100, Direction::Forward, 100)?;
    flush_loop(client, duration, timeout)
}

fn servo_sweep<T: Transport>(client: &mut Client<T>, timeout: Duration) -> Result<()> {
    if client.version() == ProtocolVersion::Remocon {
        bail!("the Remocon protocol has no servo control");
    }
    for angle in [0u8, 90, 180, 90, 0] {
        client.set_servo_angle(0, angle)?;
        std::thread::sleep(Duration::from_millis(100));
        client.flush(timeout)?;
        println!("Servo at {} degrees", angle);
    }
    Ok(())
}

fn print_gyro<T: Transport>(
    client: &mut Client<T>,
    duration: Duration,
    timeout: Duration,
) -> Result<()> {
    client.subscribe_gyro(1000)?;
    client.flush(timeout)?;
    flush_loop(client, duration, timeout)
}

fn print_messages<T: Transport>(client: &mut Client<T>) -> Result<()> {
    for message in client.drain()? {
        match message.kind {
            ResponseKind::EncoderReading(r) => {
                println!("Encoder {}: tick {} at {}us", r.encoder_id, r.tick_index, r.micros)
            }
            ResponseKind::GyroReading(GyroReading {
                yaw, pitch, roll, ..
            }) => println!(
                "Gyro: yaw {:.2} pitch {:.2} roll {:.2}",
                yaw.degrees(),
                pitch.degrees(),
                roll.degrees()
            ),
            ResponseKind::WheelDriveChanged(d) => println!(
                "Wheels: {:?} {} / {:?} {}",
                d.motor1.direction, d.motor1.magnitude, d.motor2.direction, d.motor2.magnitude
            ),
            other => println!("Task {}: {:?}", message.task_id, other),
        }
    }
    Ok(())
}

fn print_help() {
    println!("Robocom demo driver");
    println!();
    println!("Usage: robot_demo [OPTIONS] [echo|spin|servo|gyro]");
    println!();
    println!("Options:");
    println!("  --port PORT, -p PORT     Serial port (default: first detected)");
    println!("  --baud RATE, -b RATE     Baud rate (default: 57600)");
    println!("  --config FILE, -c FILE   Load link settings from JSON");
    println!("  --remocon                Use the Remocon protocol");
    println!("  --seconds N, -s N        Run time for looping modes (default: 3)");
    println!("  --demo                   Use the simulated robot");
    println!("  --help, -h               Show this help");
}
