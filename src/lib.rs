//! Qibla compass: great-circle bearing to the Kaaba, device heading from a
//! raw magnetometer, and the per-screen state that ties them together.

pub mod bearing;
pub mod config;
pub mod error;
pub mod geo;
pub mod gnss;
pub mod location;
pub mod magnetic;
pub mod sensor;
pub mod session;
pub mod storage;
pub mod view_model;

pub use bearing::{
    compute_bearing, compute_display_rotation, compute_heading, normalize_degrees, rose_rotation,
    PlatformKind,
};
pub use error::CompassError;
pub use geo::{GeoCoordinate, KAABA};
pub use magnetic::MagnetometerSample;
