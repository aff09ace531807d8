//! Command-line control of the three-axis stage.
//!
//! Subcommands:
//! - `ports`: list serial ports with their USB serial numbers
//! - `config`: print the effective configuration as JSON
//! - `enable`: clear faults, enable all axes, wait until enabled
//! - `status`: enable state, motion state, speed limits
//! - `home`: home X/Y, Z, or everything
//! - `move`: absolute or relative move on one axis
//! - `jog`: relative step at a percentage of the axis speed limit
//! - `ramp`: endurance loop bouncing every axis between two positions

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use motion_platform::port::describe_ports;
use motion_platform::{
    Axis, DriveLink, JogRequest, MotionPlatform, PlatformConfig, RegisterDrive, ScriptedLink,
    VarcomDrive,
};
use strum::IntoEnumIterator;
use tracing::info;

/// Poll interval while waiting on the drives.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Three-axis stage control tool
#[derive(Parser, Debug)]
#[command(name = "stage_tool")]
#[command(about = "Control tool for the XY servo / Z register-drive stage")]
#[command(version)]
struct Args {
    /// JSON configuration file (defaults to the built-in configuration)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log the traffic without opening any port; drives never answer
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports
    Ports,

    /// Print the effective configuration as JSON
    Config,

    /// Clear faults and enable all axes
    Enable {
        /// Seconds to wait for the drives to report enabled
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },

    /// Query enable and motion state
    Status,

    /// Home one or all axes
    Home {
        /// Axis to home (X and Y always home together); all if omitted
        #[arg(short, long, value_enum)]
        axis: Option<Axis>,

        /// Don't wait for homing to complete
        #[arg(long)]
        no_wait: bool,

        /// Seconds to wait for homing to complete
        #[arg(short, long, default_value = "60")]
        timeout: u64,
    },

    /// Move one axis
    Move {
        #[arg(short, long, value_enum)]
        axis: Axis,

        /// Absolute target in mm
        #[arg(short, long, conflicts_with = "distance", allow_negative_numbers = true)]
        position: Option<f64>,

        /// Relative distance in mm (X/Y only)
        #[arg(short, long, allow_negative_numbers = true)]
        distance: Option<f64>,

        /// mm/s for X/Y, percent for Z
        #[arg(short, long)]
        speed: f64,

        /// Don't wait for motion to complete
        #[arg(long)]
        no_wait: bool,

        /// Seconds to wait for motion to complete
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },

    /// Jog one axis by a relative step
    Jog {
        #[arg(short, long, value_enum)]
        axis: Axis,

        /// Step in mm
        #[arg(short, long, allow_negative_numbers = true)]
        distance: f64,

        /// Speed as a percentage of the axis limit (0-100)
        #[arg(short = 'p', long, default_value = "10")]
        speed_percent: f64,
    },

    /// Bounce every axis back and forth at full speed
    Ramp {
        /// X/Y stroke in mm
        #[arg(long, default_value = "500")]
        distance: f64,

        /// Z upper position in mm
        #[arg(long, default_value = "200")]
        z_height: f64,

        /// Number of strokes per axis (0 = until interrupted)
        #[arg(short, long, default_value = "0")]
        cycles: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PlatformConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PlatformConfig::default(),
    };

    match args.command {
        Command::Ports => cmd_ports(),
        Command::Config => {
            println!("{}", config.to_json()?);
            Ok(())
        }
        command if args.dry_run => {
            let xy = ScriptedLink::new();
            let z = ScriptedLink::new();
            let mut platform = MotionPlatform::from_drives(
                VarcomDrive::new(xy.clone()),
                RegisterDrive::new(z.clone(), config.z_station, config.z_capabilities),
                &config,
            )?;
            let result = run(&mut platform, command);
            for line in xy.sent_lines().iter().chain(z.sent_lines().iter()) {
                println!("sent {line:?}");
            }
            result
        }
        command => {
            let mut platform = MotionPlatform::connect(&config)?;
            run(&mut platform, command)
        }
    }
}

fn run<A: DriveLink, B: DriveLink>(
    platform: &mut MotionPlatform<A, B>,
    command: Command,
) -> Result<()> {
    match command {
        Command::Ports | Command::Config => Ok(()),
        Command::Enable { timeout } => cmd_enable(platform, timeout),
        Command::Status => cmd_status(platform),
        Command::Home {
            axis,
            no_wait,
            timeout,
        } => cmd_home(platform, axis, no_wait, timeout),
        Command::Move {
            axis,
            position,
            distance,
            speed,
            no_wait,
            timeout,
        } => cmd_move(platform, axis, position, distance, speed, no_wait, timeout),
        Command::Jog {
            axis,
            distance,
            speed_percent,
        } => {
            platform.jog(
                axis,
                JogRequest {
                    distance_mm: distance,
                    speed_percent,
                },
            )?;
            Ok(())
        }
        Command::Ramp {
            distance,
            z_height,
            cycles,
        } => cmd_ramp(platform, distance, z_height, cycles),
    }
}

fn cmd_ports() -> Result<()> {
    let ports = describe_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

/// Poll `done` until it returns true or `timeout` elapses.
fn wait_until<A: DriveLink, B: DriveLink>(
    platform: &mut MotionPlatform<A, B>,
    timeout: Duration,
    what: &str,
    mut done: impl FnMut(&mut MotionPlatform<A, B>) -> motion_platform::PlatformResult<bool>,
) -> Result<()> {
    let start = Instant::now();
    loop {
        if done(platform)? {
            info!("{} after {:.1}s", what, start.elapsed().as_secs_f64());
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("Timed out waiting: {what}");
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn cmd_enable<A: DriveLink, B: DriveLink>(
    platform: &mut MotionPlatform<A, B>,
    timeout: u64,
) -> Result<()> {
    platform.enable()?;
    wait_until(
        platform,
        Duration::from_secs(timeout),
        "Enabled",
        MotionPlatform::is_enabled,
    )
}

fn cmd_status<A: DriveLink, B: DriveLink>(platform: &mut MotionPlatform<A, B>) -> Result<()> {
    println!("Enabled: {}", platform.is_enabled()?);
    for axis in Axis::iter() {
        let done = platform.is_move_completed(axis)?;
        match platform.max_speed(axis) {
            Some(limit) => println!("{axis}: stopped={done} max_speed={limit} mm/s"),
            None => match platform.position_z() {
                Some(position) => println!("{axis}: stopped={done} commanded={position:.2} mm"),
                None => println!("{axis}: stopped={done} not homed"),
            },
        }
    }
    Ok(())
}

fn cmd_home<A: DriveLink, B: DriveLink>(
    platform: &mut MotionPlatform<A, B>,
    axis: Option<Axis>,
    no_wait: bool,
    timeout: u64,
) -> Result<()> {
    let (xy, z) = match axis {
        None => (true, true),
        Some(Axis::X | Axis::Y) => (true, false),
        Some(Axis::Z) => (false, true),
    };

    if xy {
        platform.home_xy()?;
    }
    if z {
        platform.home_z()?;
    }
    if no_wait {
        return Ok(());
    }

    wait_until(platform, Duration::from_secs(timeout), "Homed", |p| {
        Ok((!xy || (p.is_move_completed_x()? && p.is_move_completed_y()?))
            && (!z || p.is_move_completed_z()?))
    })
}

#[allow(clippy::too_many_arguments)]
fn cmd_move<A: DriveLink, B: DriveLink>(
    platform: &mut MotionPlatform<A, B>,
    axis: Axis,
    position: Option<f64>,
    distance: Option<f64>,
    speed: f64,
    no_wait: bool,
    timeout: u64,
) -> Result<()> {
    match (axis, position, distance) {
        (Axis::X, Some(p), None) => platform.move_absolute_x(p, speed)?,
        (Axis::Y, Some(p), None) => platform.move_absolute_y(p, speed)?,
        (Axis::Z, Some(p), None) => platform.move_absolute_z(p, speed)?,
        (Axis::X, None, Some(d)) => platform.move_increment_x(d, speed)?,
        (Axis::Y, None, Some(d)) => platform.move_increment_y(d, speed)?,
        (Axis::Z, None, Some(_)) => bail!("Z only supports absolute moves; use `jog` for steps"),
        _ => bail!("Specify exactly one of --position or --distance"),
    }

    if no_wait {
        return Ok(());
    }
    wait_until(platform, Duration::from_secs(timeout), "Move complete", |p| {
        p.is_move_completed(axis)
    })
}

fn cmd_ramp<A: DriveLink, B: DriveLink>(
    platform: &mut MotionPlatform<A, B>,
    distance: f64,
    z_height: f64,
    cycles: u32,
) -> Result<()> {
    platform.enable()?;
    std::thread::sleep(Duration::from_secs(5));
    platform.home_xy()?;
    platform.home_z()?;
    wait_until(
        platform,
        Duration::from_secs(120),
        "Homed",
        MotionPlatform::all_moves_completed,
    )?;

    let mut x_distance = distance;
    let mut y_distance = distance;
    let mut strokes = [0u32; 3];

    while cycles == 0 || strokes.iter().any(|&n| n < cycles) {
        if platform.is_move_completed_x()? {
            platform.move_increment_x(x_distance, platform.max_speed_x())?;
            x_distance = -x_distance;
            strokes[0] += 1;
        }

        if platform.is_move_completed_y()? {
            platform.move_increment_y(y_distance, platform.max_speed_y())?;
            y_distance = -y_distance;
            strokes[1] += 1;
        }

        if platform.is_move_completed_z()? {
            let target = if platform.position_z() == Some(0.0) {
                z_height
            } else {
                0.0
            };
            platform.move_absolute_z(target, 100.0)?;
            strokes[2] += 1;
        }

        std::thread::sleep(POLL_INTERVAL);
    }

    info!("Completed {:?} strokes (X, Y, Z)", strokes);
    Ok(())
}
