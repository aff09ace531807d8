//! Serial port resolution.
//!
//! Drives are identified by something stable about their USB adapter rather
//! than by an OS device path, which changes between machines and reboots.
//! The caller states which attribute to match with a [`PortSelector`]; the
//! resolver never falls back from one strategy to another.

use std::fmt;

use serde::{Deserialize, Serialize};
use serialport::{SerialPortInfo, SerialPortType};
use tracing::debug;

use crate::error::{PlatformError, PlatformResult};

/// How to pick a serial port out of the enumerated system ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum PortSelector {
    /// Exact USB serial number (e.g. an FTDI adapter's `FTB6SPL3A`).
    SerialNumber(String),
    /// Exact USB product description string.
    Product(String),
    /// Use this device path as-is, skipping enumeration.
    Path(String),
}

impl fmt::Display for PortSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSelector::SerialNumber(s) => write!(f, "serial number '{s}'"),
            PortSelector::Product(s) => write!(f, "product name '{s}'"),
            PortSelector::Path(s) => write!(f, "path '{s}'"),
        }
    }
}

impl PortSelector {
    fn matches(&self, info: &SerialPortInfo) -> bool {
        let SerialPortType::UsbPort(usb) = &info.port_type else {
            return false;
        };
        match self {
            PortSelector::SerialNumber(want) => usb.serial_number.as_deref() == Some(want.as_str()),
            PortSelector::Product(want) => usb.product.as_deref() == Some(want.as_str()),
            PortSelector::Path(_) => false,
        }
    }
}

/// Pick exactly one port from `ports` matching `selector`.
///
/// # Errors
///
/// - [`PlatformError::PortNotFound`] if nothing matches
/// - [`PlatformError::AmbiguousPort`] if more than one port matches
pub fn select_port(ports: &[SerialPortInfo], selector: &PortSelector) -> PlatformResult<String> {
    if let PortSelector::Path(path) = selector {
        return Ok(path.clone());
    }

    let candidates: Vec<String> = ports
        .iter()
        .filter(|info| selector.matches(info))
        .map(|info| info.port_name.clone())
        .collect();

    match candidates.as_slice() {
        [] => Err(PlatformError::PortNotFound(selector.clone())),
        [only] => {
            debug!("Resolved {} to {}", selector, only);
            Ok(only.clone())
        }
        _ => Err(PlatformError::AmbiguousPort {
            selector: selector.clone(),
            candidates,
        }),
    }
}

/// Enumerate the system's serial ports and resolve `selector` against them.
pub fn resolve_port(selector: &PortSelector) -> PlatformResult<String> {
    if let PortSelector::Path(path) = selector {
        return Ok(path.clone());
    }
    let ports = serialport::available_ports()?;
    select_port(&ports, selector)
}

/// One-line description of every enumerated port, for diagnostics.
pub fn describe_ports() -> PlatformResult<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports.iter().map(describe_port).collect())
}

fn describe_port(info: &SerialPortInfo) -> String {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => format!(
            "{} - USB {:04x}:{:04x} serial={} product={}",
            info.port_name,
            usb.vid,
            usb.pid,
            usb.serial_number.as_deref().unwrap_or("-"),
            usb.product.as_deref().unwrap_or("-"),
        ),
        SerialPortType::PciPort => format!("{} - PCI", info.port_name),
        SerialPortType::BluetoothPort => format!("{} - Bluetooth", info.port_name),
        SerialPortType::Unknown => format!("{} - unknown", info.port_name),
    }
}
