//! Three-axis motion platform.
//!
//! [`MotionPlatform`] owns the two drive transports and exposes the stage in
//! engineering units:
//!
//! - **X, Y**: servo drives at VARCOM addresses 1 and 2 on one serial line.
//!   Positions and distances in millimeters, speeds in mm/s.
//! - **Z**: register drive on a second line. Positions in millimeters, speed
//!   as a percentage of the drive's maximum.
//!
//! Every call is a blocking request/response on the calling thread. Nothing is
//! retried and no call waits for motion to finish: poll the
//! `is_move_completed_*` queries with your own delay.
//!
//! Drive state is never cached, with one exception: the Z position last
//! commanded (or zero after homing) is kept so that Z can be jogged
//! relative to it.
//!
//! The platform does not police the order of operations. Moving a disabled
//! axis is sent to the drive like any other command.
//!
//! # Example
//!
//! ```no_run
//! use motion_platform::{MotionPlatform, PlatformConfig};
//! use std::time::Duration;
//!
//! let mut platform = MotionPlatform::connect(&PlatformConfig::default())?;
//! platform.enable()?;
//! while !platform.is_enabled()? {
//!     std::thread::sleep(Duration::from_millis(100));
//! }
//!
//! platform.home_xy()?;
//! platform.home_z()?;
//! while !platform.all_moves_completed()? {
//!     std::thread::sleep(Duration::from_millis(100));
//! }
//!
//! platform.move_absolute_x(120.0, platform.max_speed_x() / 2.0)?;
//! platform.move_absolute_z(15.5, 50.0)?;
//! # Ok::<(), motion_platform::PlatformError>(())
//! ```

use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use tracing::{debug, info, warn};

use crate::codec::Reading;
use crate::config::PlatformConfig;
use crate::error::PlatformResult;
use crate::link::DriveLink;
use crate::port::resolve_port;
use crate::register::{speed_register_value, RegisterDrive};
use crate::varcom::{reports_active, reports_stopped, Varcom, VarcomDrive};

/// VARCOM address of the X drive.
pub const X_ADDRESS: u8 = 1;

/// VARCOM address of the Y drive.
pub const Y_ADDRESS: u8 = 2;

/// Servo drive counts per millimeter of X/Y travel.
pub const COUNTS_PER_MM: f64 = 1000.0;

/// Distance moved off the hard stop before X/Y homing.
pub const HOMING_BACKOFF_MM: f64 = 5.0;

/// Speed of the pre-homing backoff move (mm/s).
pub const HOMING_BACKOFF_SPEED: f64 = 10.0;

/// Stage axes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    strum::Display,
    strum::EnumIter,
)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// VARCOM address for the servo axes, `None` for Z.
    pub fn varcom_address(self) -> Option<u8> {
        match self {
            Axis::X => Some(X_ADDRESS),
            Axis::Y => Some(Y_ADDRESS),
            Axis::Z => None,
        }
    }
}

/// Convert millimeters to servo drive counts, truncating toward zero.
pub fn mm_to_counts(mm: f64) -> i64 {
    (mm * COUNTS_PER_MM) as i64
}

/// One jog step: a relative distance and a speed as percent of the axis maximum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JogRequest {
    pub distance_mm: f64,
    pub speed_percent: f64,
}

/// The stage: X/Y servo drives plus the Z register drive.
pub struct MotionPlatform<A: DriveLink = Box<dyn SerialPort>, B: DriveLink = Box<dyn SerialPort>> {
    servo: VarcomDrive<A>,
    z_drive: RegisterDrive<B>,
    max_speed_x: f64,
    max_speed_y: f64,
    /// `None` until Z is homed or moved to an absolute target.
    position_z: Option<f64>,
}

impl MotionPlatform {
    /// Resolve both ports, open them, and initialise the drives.
    ///
    /// # Errors
    ///
    /// Fails if either port cannot be resolved unambiguously or opened.
    pub fn connect(config: &PlatformConfig) -> PlatformResult<Self> {
        let xy_path = resolve_port(&config.xy_port)?;
        let servo = VarcomDrive::open(&xy_path, config.xy_link)?;
        info!("X/Y servo drives on {}", xy_path);

        let z_path = resolve_port(&config.z_port)?;
        let z_drive = RegisterDrive::open(
            &z_path,
            config.z_link,
            config.z_station,
            config.z_capabilities,
        )?;
        info!("Z drive on {}", z_path);

        Self::from_drives(servo, z_drive, config)
    }
}

impl<A: DriveLink, B: DriveLink> MotionPlatform<A, B> {
    /// Build a platform over already-open drives.
    ///
    /// Selects the configured operating mode on X and Y, then reads their
    /// velocity limits once.
    pub fn from_drives(
        mut servo: VarcomDrive<A>,
        z_drive: RegisterDrive<B>,
        config: &PlatformConfig,
    ) -> PlatformResult<Self> {
        let mode = Varcom::OpMode(config.xy_operating_mode);
        servo.communicate(X_ADDRESS, &mode)?;
        servo.communicate(Y_ADDRESS, &mode)?;

        let max_speed_x = Self::read_max_speed(&mut servo, X_ADDRESS, config.fallback_max_speed_x)?;
        let max_speed_y = Self::read_max_speed(&mut servo, Y_ADDRESS, config.fallback_max_speed_y)?;
        info!(
            "Max speeds: X {} mm/s, Y {} mm/s",
            max_speed_x, max_speed_y
        );

        Ok(Self {
            servo,
            z_drive,
            max_speed_x,
            max_speed_y,
            position_z: None,
        })
    }

    fn read_max_speed(servo: &mut VarcomDrive<A>, address: u8, fallback: f64) -> PlatformResult<f64> {
        match servo.communicate(address, &Varcom::Vlim)? {
            Some(limit) => Ok(limit.as_f64()),
            None => {
                warn!("No VLIM reply from drive {}, using {}", address, fallback);
                Ok(fallback)
            }
        }
    }

    fn x(&mut self, command: Varcom) -> PlatformResult<Option<Reading>> {
        self.servo.communicate(X_ADDRESS, &command)
    }

    fn y(&mut self, command: Varcom) -> PlatformResult<Option<Reading>> {
        self.servo.communicate(Y_ADDRESS, &command)
    }

    // ==================== Enable ====================

    /// Clear faults and enable every axis.
    ///
    /// Sends CLEARFAULTS and EN to X and Y, then the Z fault-clear/power-on
    /// sequence. Replies are not checked; poll [`is_enabled`](Self::is_enabled).
    pub fn enable(&mut self) -> PlatformResult<()> {
        debug!("Enabling all axes");
        self.x(Varcom::ClearFaults)?;
        self.y(Varcom::ClearFaults)?;
        self.x(Varcom::Enable)?;
        self.y(Varcom::Enable)?;
        self.z_drive.clear_fault_and_power_on()
    }

    /// True when X and Y report `ACTIVE` = 1, and Z reports ready if its
    /// firmware supports the query.
    pub fn is_enabled(&mut self) -> PlatformResult<bool> {
        Ok(reports_active(self.x(Varcom::Active)?)
            && reports_active(self.y(Varcom::Active)?)
            && self.z_drive.is_ready()?.unwrap_or(true))
    }

    // ==================== Homing ====================

    /// Home X and Y.
    ///
    /// Both axes first back off [`HOMING_BACKOFF_MM`] so the homing routine
    /// never starts against the hard stop.
    pub fn home_xy(&mut self) -> PlatformResult<()> {
        self.move_increment_x(HOMING_BACKOFF_MM, HOMING_BACKOFF_SPEED)?;
        self.move_increment_y(HOMING_BACKOFF_MM, HOMING_BACKOFF_SPEED)?;
        self.x(Varcom::HomeCmd)?;
        self.y(Varcom::HomeCmd)?;
        Ok(())
    }

    /// Home Z. The cached Z position becomes zero once the command is sent.
    pub fn home_z(&mut self) -> PlatformResult<()> {
        self.z_drive.home()?;
        self.position_z = Some(0.0);
        Ok(())
    }

    // ==================== Motion ====================

    /// Move X by `distance_mm` at `speed_mm_s`.
    pub fn move_increment_x(&mut self, distance_mm: f64, speed_mm_s: f64) -> PlatformResult<()> {
        self.x(Varcom::MoveInc {
            counts: mm_to_counts(distance_mm),
            speed: speed_mm_s,
        })?;
        Ok(())
    }

    /// Move Y by `distance_mm` at `speed_mm_s`.
    pub fn move_increment_y(&mut self, distance_mm: f64, speed_mm_s: f64) -> PlatformResult<()> {
        self.y(Varcom::MoveInc {
            counts: mm_to_counts(distance_mm),
            speed: speed_mm_s,
        })?;
        Ok(())
    }

    /// Move X to `position_mm` at `speed_mm_s`.
    pub fn move_absolute_x(&mut self, position_mm: f64, speed_mm_s: f64) -> PlatformResult<()> {
        self.x(Varcom::MoveAbs {
            counts: mm_to_counts(position_mm),
            speed: speed_mm_s,
        })?;
        Ok(())
    }

    /// Move Y to `position_mm` at `speed_mm_s`.
    pub fn move_absolute_y(&mut self, position_mm: f64, speed_mm_s: f64) -> PlatformResult<()> {
        self.y(Varcom::MoveAbs {
            counts: mm_to_counts(position_mm),
            speed: speed_mm_s,
        })?;
        Ok(())
    }

    /// Move Z to `position_mm` at `speed_percentage` of its maximum speed.
    ///
    /// Negative targets are clamped to zero.
    ///
    /// # Errors
    ///
    /// [`SpeedOutOfRange`](crate::PlatformError::SpeedOutOfRange) if
    /// `speed_percentage` is outside 0-100; nothing is sent in that case.
    pub fn move_absolute_z(&mut self, position_mm: f64, speed_percentage: f64) -> PlatformResult<()> {
        self.position_z = Some(self.z_drive.move_absolute(position_mm, speed_percentage)?);
        Ok(())
    }

    /// Jog one axis relative to where it is.
    ///
    /// X/Y speed is `speed_percent` of the axis velocity limit. Z moves to
    /// the cached Z position plus the distance; until Z has been homed or
    /// given an absolute target there is no position to step from, and the
    /// jog is skipped.
    pub fn jog(&mut self, axis: Axis, request: JogRequest) -> PlatformResult<()> {
        speed_register_value(request.speed_percent)?;
        debug!("Jog {} by {:?}", axis, request);

        match axis {
            Axis::X => {
                let speed = request.speed_percent / 100.0 * self.max_speed_x;
                self.move_increment_x(request.distance_mm, speed)
            }
            Axis::Y => {
                let speed = request.speed_percent / 100.0 * self.max_speed_y;
                self.move_increment_y(request.distance_mm, speed)
            }
            Axis::Z => match self.position_z {
                Some(position) => {
                    self.move_absolute_z(position + request.distance_mm, request.speed_percent)
                }
                None => {
                    warn!("Z position unknown, home Z before jogging");
                    Ok(())
                }
            },
        }
    }

    // ==================== Status ====================

    /// X reports `STOPPED` 1 or 2.
    pub fn is_move_completed_x(&mut self) -> PlatformResult<bool> {
        Ok(reports_stopped(self.x(Varcom::Stopped)?))
    }

    /// Y reports `STOPPED` 1 or 2.
    pub fn is_move_completed_y(&mut self) -> PlatformResult<bool> {
        Ok(reports_stopped(self.y(Varcom::Stopped)?))
    }

    /// Z status register reads stopped.
    ///
    /// Always `false` when the Z firmware has no status query: completion is
    /// never assumed.
    pub fn is_move_completed_z(&mut self) -> PlatformResult<bool> {
        Ok(self.z_drive.is_move_complete()?.unwrap_or(false))
    }

    pub fn is_move_completed(&mut self, axis: Axis) -> PlatformResult<bool> {
        match axis {
            Axis::X => self.is_move_completed_x(),
            Axis::Y => self.is_move_completed_y(),
            Axis::Z => self.is_move_completed_z(),
        }
    }

    /// All three axes report motion complete.
    pub fn all_moves_completed(&mut self) -> PlatformResult<bool> {
        Ok(self.is_move_completed_x()?
            && self.is_move_completed_y()?
            && self.is_move_completed_z()?)
    }

    /// X velocity limit read at construction.
    pub fn max_speed_x(&self) -> f64 {
        self.max_speed_x
    }

    /// Y velocity limit read at construction.
    pub fn max_speed_y(&self) -> f64 {
        self.max_speed_y
    }

    /// Velocity limit of a servo axis; `None` for Z, whose speed is a percentage.
    pub fn max_speed(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::X => Some(self.max_speed_x),
            Axis::Y => Some(self.max_speed_y),
            Axis::Z => None,
        }
    }

    /// Last commanded Z position (mm), `None` before the first home or
    /// absolute move. Not read back from the drive.
    pub fn position_z(&self) -> Option<f64> {
        self.position_z
    }
}
