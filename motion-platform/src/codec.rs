//! Frame codec shared by both drive transports.
//!
//! Everything in this module is a pure function over bytes and strings:
//!
//! - [`compute_lrc`] - longitudinal redundancy check used by the register protocol
//! - [`encode_frame`] / [`decode_frame`] - the `:<HEX>\r\n` register-protocol envelope
//! - [`parse_numeric_line`] - recognition of numeric replies from the VARCOM drives
//!
//! # Register Frame Format
//!
//! ```text
//! :010620110001C7\r\n
//! │└┬┘└───┬────┘└┤
//! │ │     │      └─ LRC of station + payload
//! │ │     └──────── payload (opcode, register, value)
//! │ └────────────── station byte
//! └──────────────── start marker
//! ```
//!
//! # VARCOM Reply Format
//!
//! Numeric replies are printed as a literal followed by the responding
//! drive's address marker, e.g. `1500<01>` or `12.5<02>`. Echo lines and
//! prompts carry no numeric prefix and are skipped.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// First character of every register-protocol frame.
pub const FRAME_START: char = ':';

/// Line terminator used by both protocols.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Character that opens the address marker on a VARCOM reply line.
pub const ADDRESS_MARKER: char = '<';

/// Errors produced while decoding a register-protocol frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer characters than station + LRC require.
    #[error("frame too short ({len} characters): {line:?}")]
    TooShort { len: usize, line: String },

    /// Strict envelope only: line does not begin with `:`.
    #[error("frame does not start with ':': {0:?}")]
    MissingStart(String),

    /// Strict envelope only: line does not end with CR LF.
    #[error("frame is not terminated by CR LF: {0:?}")]
    MissingTerminator(String),

    /// Body is not an even-length run of hexadecimal digits.
    #[error("invalid hexadecimal in frame: {0:?}")]
    InvalidHex(String),

    /// Received LRC does not match the one computed over station + payload.
    #[error("LRC mismatch: frame carries {actual:#04x}, computed {expected:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// Compute the LRC of a byte slice.
///
/// Sum of all bytes modulo 256, then two's-complement negated. Appending the
/// result to `bytes` makes the whole sequence sum to zero modulo 256.
pub fn compute_lrc(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        .wrapping_neg()
}

/// Render bytes as uppercase hexadecimal.
pub fn to_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0F) as usize] as char);
    }
    out
}

/// Parse an even-length string of hexadecimal digits (either case).
pub fn from_hex(text: &str) -> Result<Vec<u8>, FrameError> {
    if text.len() % 2 != 0 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FrameError::InvalidHex(text.to_string()));
    }

    // Every character is an ASCII hex digit at this point.
    Ok(text
        .as_bytes()
        .chunks_exact(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16).unwrap_or(0) as u8;
            let lo = (pair[1] as char).to_digit(16).unwrap_or(0) as u8;
            (hi << 4) | lo
        })
        .collect())
}

/// Build a complete register-protocol line: `:` + HEX(station, payload, LRC) + CR LF.
pub fn encode_frame(station: u8, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(payload.len() + 2);
    data.push(station);
    data.extend_from_slice(payload);
    data.push(compute_lrc(&data));

    format!("{FRAME_START}{}{LINE_TERMINATOR}", to_hex(&data))
}

/// How strictly the envelope of an incoming frame is checked.
///
/// Drive firmware revisions differ in how cleanly they terminate replies, so
/// the transport is configured with one of these rather than guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Envelope {
    /// Trim surrounding whitespace and drop the first character unchecked.
    #[default]
    Loose,
    /// Require a leading `:` and a trailing CR LF.
    Strict,
}

/// A decoded register-protocol frame.
///
/// The LRC is carried as received; use [`DecodedFrame::verify`] to reject a
/// frame whose checksum does not match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub station: u8,
    pub payload: Vec<u8>,
    pub lrc: u8,
}

impl DecodedFrame {
    /// LRC computed over the received station byte and payload.
    pub fn computed_lrc(&self) -> u8 {
        let mut data = Vec::with_capacity(self.payload.len() + 1);
        data.push(self.station);
        data.extend_from_slice(&self.payload);
        compute_lrc(&data)
    }

    pub fn checksum_ok(&self) -> bool {
        self.computed_lrc() == self.lrc
    }

    /// Return the frame unchanged if its LRC matches, otherwise an error.
    pub fn verify(self) -> Result<Self, FrameError> {
        let expected = self.computed_lrc();
        if expected == self.lrc {
            Ok(self)
        } else {
            Err(FrameError::ChecksumMismatch {
                expected,
                actual: self.lrc,
            })
        }
    }
}

/// Strip the envelope from a received line and hex-decode it.
///
/// The LRC is not verified here; see [`DecodedFrame::verify`].
pub fn decode_frame(line: &str, envelope: Envelope) -> Result<DecodedFrame, FrameError> {
    let body = match envelope {
        Envelope::Loose => {
            let trimmed = line.trim();
            if !trimmed.is_ascii() {
                return Err(FrameError::InvalidHex(trimmed.to_string()));
            }
            if trimmed.len() < 5 {
                return Err(FrameError::TooShort {
                    len: trimmed.len(),
                    line: line.to_string(),
                });
            }
            &trimmed[1..]
        }
        Envelope::Strict => {
            let inner = line
                .strip_prefix(FRAME_START)
                .ok_or_else(|| FrameError::MissingStart(line.to_string()))?;
            let inner = inner
                .strip_suffix(LINE_TERMINATOR)
                .ok_or_else(|| FrameError::MissingTerminator(line.to_string()))?;
            if inner.len() < 4 {
                return Err(FrameError::TooShort {
                    len: line.len(),
                    line: line.to_string(),
                });
            }
            inner
        }
    };

    let bytes = from_hex(body)?;
    // At least four hex digits were present, so station and LRC both exist.
    let (station, rest) = bytes
        .split_first()
        .ok_or_else(|| FrameError::InvalidHex(body.to_string()))?;
    let (lrc, payload) = rest
        .split_last()
        .ok_or_else(|| FrameError::InvalidHex(body.to_string()))?;

    Ok(DecodedFrame {
        station: *station,
        payload: payload.to_vec(),
        lrc: *lrc,
    })
}

/// Decode a line and return only the payload (opcode onward, LRC removed).
pub fn decode_payload(line: &str, envelope: Envelope) -> Result<Vec<u8>, FrameError> {
    decode_frame(line, envelope).map(|frame| frame.payload)
}

/// A numeric value read back from a VARCOM drive.
///
/// The drive prints integers and floating-point values differently and the
/// distinction is kept: a literal containing `.`, `e` or `E` is a float.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Integer(i64),
    Float(f64),
}

impl Reading {
    pub fn as_f64(self) -> f64 {
        match self {
            Reading::Integer(v) => v as f64,
            Reading::Float(v) => v,
        }
    }

    /// Integer value, if the reading is integral (`1` and `1.0` both qualify).
    pub fn as_integer(self) -> Option<i64> {
        match self {
            Reading::Integer(v) => Some(v),
            Reading::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(v as i64),
            Reading::Float(_) => None,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Integer(v) => write!(f, "{v}"),
            Reading::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Check that `text` is exactly a signed decimal literal with optional exponent.
fn is_numeric_literal(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }

    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut mantissa_digits = i - int_start;

    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        mantissa_digits += i - frac_start;
    }

    if mantissa_digits == 0 {
        return false;
    }

    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        i += 1;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }

    i == bytes.len()
}

/// `01>` and the like: drive address digits, then the closing `>` or end of line.
fn is_address_token(rest: &str) -> bool {
    let tail = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    tail.len() < rest.len() && (tail.starts_with('>') || tail.trim().is_empty())
}

/// Extract the numeric value from a VARCOM reply line such as `1500<01>`.
///
/// Returns `None` when the line carries no `<digits>` address marker directly
/// after a number.
pub fn parse_numeric_line(line: &str) -> Option<Reading> {
    let (literal, marker) = line.split_once(ADDRESS_MARKER)?;

    if !is_numeric_literal(literal) || !is_address_token(marker) {
        return None;
    }

    if literal.contains(['.', 'e', 'E']) {
        literal.parse().ok().map(Reading::Float)
    } else {
        literal.parse().ok().map(Reading::Integer)
    }
}
