use std::fmt;

use crate::geo::GeoCoordinate;

/// Failures of the compass collaborators. None of them are fatal; each one
/// is shown to the user with a retry action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompassError {
    PermissionDenied,
    LocationUnavailable(String),
    SensorUnavailable(String),
}

impl CompassError {
    pub fn is_retryable(&self) -> bool {
        true
    }

    /// Short text for the compass screen.
    pub fn user_message(&self) -> &'static str {
        match self {
            CompassError::PermissionDenied => {
                "Location permission is required to find the Qibla direction."
            }
            CompassError::LocationUnavailable(_) => {
                "Your location could not be determined. Please try again."
            }
            CompassError::SensorUnavailable(_) => {
                "The compass sensor is not available on this device."
            }
        }
    }
}

impl fmt::Display for CompassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompassError::PermissionDenied => write!(f, "location permission denied"),
            CompassError::LocationUnavailable(reason) => {
                write!(f, "location unavailable: {reason}")
            }
            CompassError::SensorUnavailable(reason) => write!(f, "sensor unavailable: {reason}"),
        }
    }
}

impl std::error::Error for CompassError {}

#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Toml(toml_edit::TomlError),
    Json(serde_json::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "storage I/O error: {e}"),
            StorageError::Toml(e) => write!(f, "storage file is not valid TOML: {e}"),
            StorageError::Json(e) => write!(f, "invalid stored value: {e}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            StorageError::Toml(e) => Some(e),
            StorageError::Json(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

impl From<toml_edit::TomlError> for StorageError {
    fn from(e: toml_edit::TomlError) -> Self {
        StorageError::Toml(e)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Json(e)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml_edit::de::Error),
    /// `[target]` is outside the valid latitude/longitude ranges.
    InvalidTarget(GeoCoordinate),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read config: {e}"),
            ConfigError::Parse(e) => write!(f, "invalid config: {e}"),
            ConfigError::InvalidTarget(target) => write!(
                f,
                "target {}, {} is out of range",
                target.latitude, target.longitude
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml_edit::de::Error> for ConfigError {
    fn from(e: toml_edit::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_compass_error_is_retryable() {
        for e in [
            CompassError::PermissionDenied,
            CompassError::LocationUnavailable("timeout".into()),
            CompassError::SensorUnavailable("no device".into()),
        ] {
            assert!(e.is_retryable());
            assert!(!e.user_message().is_empty());
        }
    }

    #[test]
    fn test_display_includes_reason() {
        let e = CompassError::LocationUnavailable("gpsd closed the stream".into());
        assert_eq!(e.to_string(), "location unavailable: gpsd closed the stream");
    }
}
