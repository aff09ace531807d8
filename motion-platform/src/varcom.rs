//! ASCII VARCOM transport for the X/Y servo drives.
//!
//! Both servo drives share one serial line. Every exchange is:
//!
//! 1. Discard anything left in the receive buffer
//! 2. Send the address-select line `\<addr>\r\n` and read back its echo
//! 3. Send the command line, e.g. `MOVEINC 5000 10\r\n`
//! 4. Collect reply lines until the read times out
//! 5. Return the first numeric value found (see [`parse_numeric_line`])
//!
//! The drive echoes commands and prints a prompt, so most reply lines carry no
//! value. A reply with no numeric line, and no reply at all, both give `None`;
//! the two cases cannot be told apart at this layer.
//!
//! # Example
//!
//! ```
//! use motion_platform::link::ScriptedLink;
//! use motion_platform::varcom::{Varcom, VarcomDrive};
//! use motion_platform::codec::Reading;
//!
//! let link = ScriptedLink::new();
//! link.queue_reply("\\1\r\n");
//! link.queue_reply("ACTIVE\r\n1<01>\r\n-->");
//!
//! let mut drive = VarcomDrive::new(link);
//! let active = drive.communicate(1, &Varcom::Active)?;
//! assert_eq!(active, Some(Reading::Integer(1)));
//! # Ok::<(), motion_platform::PlatformError>(())
//! ```

use std::fmt;
use std::io::Write;

use serialport::SerialPort;
use tracing::debug;

use crate::codec::{parse_numeric_line, Reading, LINE_TERMINATOR};
use crate::error::PlatformResult;
use crate::link::{open_serial, read_line, read_lines, DriveLink, LinkSettings};

/// Commands understood by the servo drives.
#[derive(Debug, Clone, PartialEq)]
pub enum Varcom {
    /// Clear latched faults. No meaningful reply.
    ClearFaults,
    /// Enable the power stage. No meaningful reply.
    Enable,
    /// Query enable state; `1` means enabled and not faulted.
    Active,
    /// Query motion status; `1` or `2` mean motion complete.
    Stopped,
    /// Start the drive's homing routine.
    HomeCmd,
    /// Query the velocity limit.
    Vlim,
    /// Select the drive operating mode.
    OpMode(u8),
    /// Relative move by `counts` at `speed` (drive units).
    MoveInc { counts: i64, speed: f64 },
    /// Absolute move to `counts` at `speed` (drive units).
    MoveAbs { counts: i64, speed: f64 },
}

impl Varcom {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Varcom::ClearFaults => "CLEARFAULTS",
            Varcom::Enable => "EN",
            Varcom::Active => "ACTIVE",
            Varcom::Stopped => "STOPPED",
            Varcom::HomeCmd => "HOMECMD",
            Varcom::Vlim => "VLIM",
            Varcom::OpMode(_) => "OPMODE",
            Varcom::MoveInc { .. } => "MOVEINC",
            Varcom::MoveAbs { .. } => "MOVEABS",
        }
    }
}

impl fmt::Display for Varcom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Varcom::OpMode(mode) => write!(f, "{} {mode}", self.mnemonic()),
            Varcom::MoveInc { counts, speed } | Varcom::MoveAbs { counts, speed } => {
                write!(f, "{} {counts} {speed}", self.mnemonic())
            }
            _ => f.write_str(self.mnemonic()),
        }
    }
}

/// `ACTIVE` reply means enabled.
pub fn reports_active(reply: Option<Reading>) -> bool {
    reply.and_then(Reading::as_integer) == Some(1)
}

/// `STOPPED` reply means motion complete. Other codes are firmware-defined.
pub fn reports_stopped(reply: Option<Reading>) -> bool {
    matches!(reply.and_then(Reading::as_integer), Some(1 | 2))
}

/// Servo drive connection speaking VARCOM over a shared line.
pub struct VarcomDrive<L: DriveLink = Box<dyn SerialPort>> {
    link: L,
}

impl VarcomDrive<Box<dyn SerialPort>> {
    /// Open the serial device at `path`.
    pub fn open(path: &str, settings: LinkSettings) -> PlatformResult<Self> {
        Ok(Self::new(open_serial(path, settings)?))
    }
}

impl<L: DriveLink> VarcomDrive<L> {
    pub fn new(link: L) -> Self {
        Self { link }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    fn send(&mut self, line: &str) -> PlatformResult<()> {
        self.link.write_all(line.as_bytes())?;
        self.link.flush()?;
        debug!("VARCOM send {:?}", line);
        Ok(())
    }

    /// Select the drive at `address` and issue `command`.
    ///
    /// Returns the first numeric value in the reply, or `None`.
    ///
    /// # Errors
    ///
    /// Only I/O failures on the link. Silence and non-numeric replies are `Ok(None)`.
    pub fn communicate(&mut self, address: u8, command: &Varcom) -> PlatformResult<Option<Reading>> {
        self.link.discard_input()?;

        self.send(&format!("\\{address}{LINE_TERMINATOR}"))?;
        let echo = read_line(&mut self.link)?;
        debug!("VARCOM read {:?}", echo.as_deref().unwrap_or(""));

        self.send(&format!("{command}{LINE_TERMINATOR}"))?;
        let response = read_lines(&mut self.link)?;
        debug!("VARCOM read {:?}", response.concat());

        Ok(response.iter().find_map(|line| parse_numeric_line(line)))
    }
}
