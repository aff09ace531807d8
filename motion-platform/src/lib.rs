//! Drive protocol layer for a three-axis motorized stage.
//!
//! X and Y are driven by a pair of servo drives speaking the ASCII VARCOM
//! protocol on one serial line; Z is driven by a register-based drive speaking
//! LRC-checked hex frames on another. [`MotionPlatform`] hides both behind
//! axis-level operations in millimeters.
//!
//! # Modules
//!
//! - [`codec`] - LRC, hex frame envelope, numeric reply parsing (no I/O)
//! - [`port`] - resolve a USB serial number or product name to a device path
//! - [`link`] - byte link abstraction, serial and scripted implementations
//! - [`varcom`] - X/Y servo drive transport
//! - [`register`] - Z drive transport
//! - [`platform`] - the stage facade
//! - [`config`] - JSON-loadable connection settings
//!
//! Everything is synchronous and single-threaded. Each transport exclusively
//! owns its link; callers needing a responsive UI should run the platform on
//! a dedicated thread.

pub mod codec;
pub mod config;
pub mod error;
pub mod link;
pub mod platform;
pub mod port;
pub mod register;
pub mod varcom;

pub use codec::{FrameError, Reading};
pub use config::PlatformConfig;
pub use error::{PlatformError, PlatformResult};
pub use link::{DriveLink, LinkSettings, ScriptedLink};
pub use platform::{mm_to_counts, Axis, JogRequest, MotionPlatform};
pub use port::PortSelector;
pub use register::{RegisterCapabilities, RegisterDrive};
pub use varcom::{Varcom, VarcomDrive};
