use thiserror::Error;

use crate::codec::FrameError;
use crate::port::PortSelector;

/// Errors raised by the drive transports and the platform facade.
///
/// A drive that answers nothing, or answers something that is not a number,
/// is not an error: those cases come back as `Ok(None)`. Everything here is
/// either a configuration mistake, a rejected argument, or a hard fault on
/// the serial link.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Low-level I/O error on an open link.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to enumerate or open a serial port.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No enumerated port matched the selector.
    #[error("Cannot find port with {0}")]
    PortNotFound(PortSelector),

    /// More than one enumerated port matched the selector.
    #[error("Port selection {selector} is ambiguous, candidates: {candidates:?}")]
    AmbiguousPort {
        selector: PortSelector,
        candidates: Vec<String>,
    },

    /// Z speed outside 0-100 %. Rejected before any bytes are sent.
    #[error("speed_percentage={0} exceeds limits (0-100)")]
    SpeedOutOfRange(f64),

    /// Malformed register-protocol reply.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Configuration file could not be read or parsed.
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;
