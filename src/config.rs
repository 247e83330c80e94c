use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    bearing::PlatformKind, error::ConfigError, geo::GeoCoordinate, location::LocationAccuracy,
    view_model::CompassSettings,
};

pub const DEFAULT_CONFIG_PATH: &str = "qibla-compass.toml";
pub const CONFIG_ENV_VAR: &str = "QIBLA_COMPASS_CONFIG";

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct CompassConfig {
    pub target: GeoCoordinate,
    pub compass: CompassSection,
    pub location: LocationConfig,
    pub sensor: SensorConfig,
    pub storage: StorageConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CompassSection {
    pub platform: PlatformKind,
    pub sample_interval_ms: u64,
    /// Weight of the newest sample, 1.0 means no smoothing.
    pub smoothing: f64,
    pub apply_declination: bool,
}

impl Default for CompassSection {
    fn default() -> Self {
        CompassSection {
            platform: PlatformKind::Standard,
            sample_interval_ms: 100,
            smoothing: 1.0,
            apply_declination: false,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LocationConfig {
    pub gpsd_addr: String,
    /// Persisted user consent for location access.
    pub allow: bool,
    pub accuracy: LocationAccuracy,
    pub fix_timeout_secs: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        LocationConfig {
            gpsd_addr: "127.0.0.1:2947".to_owned(),
            allow: true,
            accuracy: LocationAccuracy::Balanced,
            fix_timeout_secs: 30,
        }
    }
}

impl LocationConfig {
    pub fn fix_timeout(&self) -> Duration {
        Duration::from_secs(self.fix_timeout_secs)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SensorConfig {
    pub i2c_bus: u8,
}

impl Default for SensorConfig {
    fn default() -> Self {
        SensorConfig { i2c_bus: 1 }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            path: PathBuf::from("qibla-compass-state.toml"),
        }
    }
}

impl CompassConfig {
    /// Reads the config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(CompassConfig::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CompassConfig = toml_edit::de::from_str(text)?;
        if !config.target.is_valid() {
            return Err(ConfigError::InvalidTarget(config.target));
        }
        Ok(config)
    }

    pub fn settings(&self) -> CompassSettings {
        CompassSettings {
            target: self.target,
            platform: self.compass.platform,
            smoothing: (self.compass.smoothing < 1.0).then_some(self.compass.smoothing),
            apply_declination: self.compass.apply_declination,
            sample_interval: Duration::from_millis(self.compass.sample_interval_ms.max(1)),
        }
    }
}
