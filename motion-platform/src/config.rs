//! Platform configuration.
//!
//! Which ports the drives live on, how fast to talk to them, and which Z
//! firmware behaviours to rely on. [`PlatformConfig::default`] describes the
//! stage as built; a JSON file can override any subset of fields.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, PlatformResult};
use crate::link::LinkSettings;
use crate::port::PortSelector;
use crate::register::{RegisterCapabilities, DEFAULT_STATION};

/// Connection and protocol settings for a [`MotionPlatform`](crate::MotionPlatform).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Port carrying both X/Y servo drives.
    pub xy_port: PortSelector,
    pub xy_link: LinkSettings,
    /// `OPMODE` sent to X and Y at startup.
    pub xy_operating_mode: u8,

    /// Port carrying the Z drive.
    pub z_port: PortSelector,
    pub z_link: LinkSettings,
    pub z_station: u8,
    pub z_capabilities: RegisterCapabilities,

    /// Used when `VLIM` on X returns no value.
    pub fallback_max_speed_x: f64,
    /// Used when `VLIM` on Y returns no value.
    pub fallback_max_speed_y: f64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            xy_port: PortSelector::SerialNumber("FTB6SPL3A".to_string()),
            xy_link: LinkSettings {
                baud_rate: 115_200,
                timeout_ms: 10,
            },
            xy_operating_mode: 8,
            z_port: PortSelector::SerialNumber("DN034V26A".to_string()),
            z_link: LinkSettings {
                baud_rate: 19_200,
                timeout_ms: 100,
            },
            z_station: DEFAULT_STATION,
            z_capabilities: RegisterCapabilities::default(),
            fallback_max_speed_x: 2500.0,
            fallback_max_speed_y: 2000.0,
        }
    }
}

impl PlatformConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> PlatformResult<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| PlatformError::Config(format!("{}: {e}", path.display())))
    }

    /// Save the config as pretty-printed JSON.
    pub fn save_to_file(&self, path: &Path) -> PlatformResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn to_json(&self) -> PlatformResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| PlatformError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Envelope;

    #[test]
    fn test_default_matches_hardware() {
        let config = PlatformConfig::default();
        assert_eq!(config.xy_link.baud_rate, 115_200);
        assert_eq!(config.z_link.baud_rate, 19_200);
        assert_eq!(config.z_station, 0x01);
        assert!(config.z_capabilities.status_query);
        assert!(!config.z_capabilities.ready_query);
        assert!(!config.z_capabilities.verify_checksum);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("platform.json");

        let mut config = PlatformConfig::default();
        config.z_port = PortSelector::Path("/dev/ttyUSB3".to_string());
        config.z_capabilities.envelope = Envelope::Strict;
        config.save_to_file(&path).unwrap();

        let loaded = PlatformConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("platform.json");
        std::fs::write(
            &path,
            r#"{ "z_capabilities": { "ready_query": true }, "xy_operating_mode": 1 }"#,
        )
        .unwrap();

        let config = PlatformConfig::load_from_file(&path).unwrap();
        assert_eq!(config.xy_operating_mode, 1);
        assert!(config.z_capabilities.ready_query);
        assert!(config.z_capabilities.status_query);
        assert_eq!(config.xy_port, PlatformConfig::default().xy_port);
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("platform.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            PlatformConfig::load_from_file(&path),
            Err(PlatformError::Config(_))
        ));
        assert!(matches!(
            PlatformConfig::load_from_file(&dir.path().join("missing.json")),
            Err(PlatformError::Io(_))
        ));
    }
}
