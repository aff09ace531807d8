//! Binary register transport for the Z drive.
//!
//! The Z drive speaks a Modbus-ASCII style protocol: each request is a station
//! byte plus a register command, protected by an LRC and sent as uppercase
//! hexadecimal between `:` and CR LF (see [`crate::codec`]). Exactly one reply
//! line is read back per request.
//!
//! # Command Payloads
//!
//! | Opcode | Layout                                                   |
//! |--------|----------------------------------------------------------|
//! | `0x03` | register (BE u16), register count (BE u16)               |
//! | `0x06` | register (BE u16), value (BE u16)                        |
//! | `0x10` | register (BE u16), register count (BE u16), byte count, data |
//!
//! # Register Map
//!
//! | Register | Use                                                   |
//! |----------|-------------------------------------------------------|
//! | `0x2011` | fault latch / power control                           |
//! | `0x201E` | command: 1 = run move, 3 = home, 6 = reset            |
//! | `0x2014` | speed, percent of maximum                             |
//! | `0x2002` | target position, hundredths of a mm (two registers)   |
//! | `0x1000` | motion status                                         |
//! | `0x1020` | drive ready status                                    |
//!
//! Firmware revisions disagree about which status reads are meaningful, and
//! reply LRCs are trusted unless asked otherwise. Both are switched by
//! [`RegisterCapabilities`].

use std::io::Write;

use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use tracing::{debug, trace, warn};

use crate::codec::{decode_frame, encode_frame, Envelope};
use crate::error::{PlatformError, PlatformResult};
use crate::link::{open_serial, read_line, DriveLink, LinkSettings};

pub const OP_READ_REGISTERS: u8 = 0x03;
pub const OP_WRITE_REGISTER: u8 = 0x06;
pub const OP_WRITE_REGISTERS: u8 = 0x10;

pub const CONTROL_REGISTER: u16 = 0x2011;
pub const COMMAND_REGISTER: u16 = 0x201E;
pub const SPEED_REGISTER: u16 = 0x2014;
pub const POSITION_REGISTER: u16 = 0x2002;
pub const STATUS_REGISTER: u16 = 0x1000;
pub const READY_REGISTER: u16 = 0x1020;

pub const COMMAND_RUN: u16 = 1;
pub const COMMAND_HOME: u16 = 3;
pub const COMMAND_RESET: u16 = 6;

/// Status register reply when the axis is not moving.
pub const STOPPED_REPLY: [u8; 4] = [0x03, 0x02, 0x00, 0x00];

/// Ready register reply when the axis is powered and fault-free.
pub const READY_REPLY: [u8; 4] = [0x03, 0x02, 0x00, 0x0E];

/// Station byte of the Z drive on its line.
pub const DEFAULT_STATION: u8 = 0x01;

/// A single register-protocol request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterCommand {
    Read { register: u16, count: u16 },
    Write { register: u16, value: u16 },
    WriteMultiple { register: u16, data: Vec<u8> },
}

impl RegisterCommand {
    /// Opcode and arguments, without station byte or LRC.
    pub fn to_payload(&self) -> Vec<u8> {
        match self {
            RegisterCommand::Read { register, count } => {
                let mut payload = vec![OP_READ_REGISTERS];
                payload.extend_from_slice(&register.to_be_bytes());
                payload.extend_from_slice(&count.to_be_bytes());
                payload
            }
            RegisterCommand::Write { register, value } => {
                let mut payload = vec![OP_WRITE_REGISTER];
                payload.extend_from_slice(&register.to_be_bytes());
                payload.extend_from_slice(&value.to_be_bytes());
                payload
            }
            RegisterCommand::WriteMultiple { register, data } => {
                let registers = data.len().div_ceil(2) as u16;
                let mut payload = vec![OP_WRITE_REGISTERS];
                payload.extend_from_slice(&register.to_be_bytes());
                payload.extend_from_slice(&registers.to_be_bytes());
                payload.push(data.len() as u8);
                payload.extend_from_slice(data);
                payload
            }
        }
    }
}

/// Protocol behaviours that vary between Z drive firmware revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterCapabilities {
    /// Status register 0x1000 reports motion completion.
    pub status_query: bool,
    /// Ready register 0x1020 reports power-on state.
    pub ready_query: bool,
    /// Reject replies whose LRC does not match. Off by default: the wire is trusted.
    pub verify_checksum: bool,
    /// Envelope check applied to replies.
    pub envelope: Envelope,
}

impl Default for RegisterCapabilities {
    fn default() -> Self {
        Self {
            status_query: true,
            ready_query: false,
            verify_checksum: false,
            envelope: Envelope::Loose,
        }
    }
}

/// Fault-clear and power-on sequence, in send order.
pub fn enable_sequence() -> [RegisterCommand; 4] {
    [
        RegisterCommand::Write {
            register: CONTROL_REGISTER,
            value: 1,
        },
        RegisterCommand::Write {
            register: CONTROL_REGISTER,
            value: 0,
        },
        RegisterCommand::Write {
            register: COMMAND_REGISTER,
            value: COMMAND_RESET,
        },
        RegisterCommand::Write {
            register: CONTROL_REGISTER,
            value: 0,
        },
    ]
}

/// Convert millimeters to the position register's hundredths of a millimeter.
///
/// Truncates toward zero. Negative targets clamp to zero: the axis is never
/// commanded below its mechanical zero.
pub fn mm_to_hundredths(position_mm: f64) -> u32 {
    (position_mm * 100.0).max(0.0) as u32
}

/// Check a speed percentage and convert it to the register value.
pub fn speed_register_value(speed_percent: f64) -> PlatformResult<u16> {
    if !(0.0..=100.0).contains(&speed_percent) {
        return Err(PlatformError::SpeedOutOfRange(speed_percent));
    }
    Ok(speed_percent as u16)
}

/// Speed, target, commit: the three writes of an absolute move.
pub fn move_absolute_sequence(
    position_mm: f64,
    speed_percent: f64,
) -> PlatformResult<[RegisterCommand; 3]> {
    let speed = speed_register_value(speed_percent)?;
    let target = mm_to_hundredths(position_mm);

    Ok([
        RegisterCommand::Write {
            register: SPEED_REGISTER,
            value: speed,
        },
        RegisterCommand::WriteMultiple {
            register: POSITION_REGISTER,
            data: target.to_be_bytes().to_vec(),
        },
        RegisterCommand::Write {
            register: COMMAND_REGISTER,
            value: COMMAND_RUN,
        },
    ])
}

/// Z drive connection.
pub struct RegisterDrive<L: DriveLink = Box<dyn SerialPort>> {
    link: L,
    station: u8,
    capabilities: RegisterCapabilities,
}

impl RegisterDrive<Box<dyn SerialPort>> {
    /// Open the serial device at `path`.
    pub fn open(
        path: &str,
        settings: LinkSettings,
        station: u8,
        capabilities: RegisterCapabilities,
    ) -> PlatformResult<Self> {
        Ok(Self::new(open_serial(path, settings)?, station, capabilities))
    }
}

impl<L: DriveLink> RegisterDrive<L> {
    pub fn new(link: L, station: u8, capabilities: RegisterCapabilities) -> Self {
        Self {
            link,
            station,
            capabilities,
        }
    }

    pub fn capabilities(&self) -> RegisterCapabilities {
        self.capabilities
    }

    pub fn station(&self) -> u8 {
        self.station
    }

    /// Send one command and return the reply payload (opcode onward).
    ///
    /// `Ok(None)` when the drive stays silent for the whole read timeout.
    ///
    /// # Errors
    ///
    /// - [`PlatformError::Frame`] if the reply is malformed, or its LRC is
    ///   wrong and checksum verification is enabled
    /// - [`PlatformError::Io`] on link failure
    pub fn exchange(&mut self, command: &RegisterCommand) -> PlatformResult<Option<Vec<u8>>> {
        self.link.discard_input()?;

        let line = encode_frame(self.station, &command.to_payload());
        self.link.write_all(line.as_bytes())?;
        self.link.flush()?;
        debug!("REGISTER send {:?}", line);

        let reply = read_line(&mut self.link)?;
        debug!("REGISTER read {:?}", reply.as_deref().unwrap_or(""));

        let Some(reply) = reply.filter(|r| !r.trim().is_empty()) else {
            return Ok(None);
        };

        let frame = decode_frame(&reply, self.capabilities.envelope)?;
        let frame = if self.capabilities.verify_checksum {
            frame.verify()?
        } else {
            frame
        };
        Ok(Some(frame.payload))
    }

    /// Send a command whose reply is not inspected.
    ///
    /// A malformed reply is logged and ignored; link failures still propagate.
    fn fire(&mut self, command: &RegisterCommand) -> PlatformResult<()> {
        match self.exchange(command) {
            Ok(_) => Ok(()),
            Err(PlatformError::Frame(e)) => {
                warn!("Ignoring malformed reply to {:?}: {}", command, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Clear the fault latch and power the axis on.
    pub fn clear_fault_and_power_on(&mut self) -> PlatformResult<()> {
        for command in enable_sequence() {
            self.fire(&command)?;
        }
        Ok(())
    }

    /// Start the drive's homing routine.
    pub fn home(&mut self) -> PlatformResult<()> {
        self.fire(&RegisterCommand::Write {
            register: COMMAND_REGISTER,
            value: COMMAND_HOME,
        })
    }

    /// Move to `position_mm` at `speed_percent` of maximum speed.
    ///
    /// Returns the position actually commanded, after truncation to
    /// hundredths and clamping at zero.
    ///
    /// # Errors
    ///
    /// [`PlatformError::SpeedOutOfRange`] before anything is sent if
    /// `speed_percent` is outside 0-100.
    pub fn move_absolute(&mut self, position_mm: f64, speed_percent: f64) -> PlatformResult<f64> {
        let sequence = move_absolute_sequence(position_mm, speed_percent)?;
        for command in &sequence {
            self.fire(command)?;
        }
        Ok(f64::from(mm_to_hundredths(position_mm)) / 100.0)
    }

    /// Whether the axis reports motion complete.
    ///
    /// `None` if this firmware has no usable status register.
    pub fn is_move_complete(&mut self) -> PlatformResult<Option<bool>> {
        if !self.capabilities.status_query {
            trace!("Z status query disabled");
            return Ok(None);
        }
        let reply = self.exchange(&RegisterCommand::Read {
            register: STATUS_REGISTER,
            count: 1,
        })?;
        Ok(Some(reply.as_deref() == Some(&STOPPED_REPLY[..])))
    }

    /// Whether the axis reports powered and ready.
    ///
    /// `None` if this firmware has no usable ready register.
    pub fn is_ready(&mut self) -> PlatformResult<Option<bool>> {
        if !self.capabilities.ready_query {
            trace!("Z ready query disabled");
            return Ok(None);
        }
        let reply = self.exchange(&RegisterCommand::Read {
            register: READY_REGISTER,
            count: 1,
        })?;
        Ok(Some(reply.as_deref() == Some(&READY_REPLY[..])))
    }
}
