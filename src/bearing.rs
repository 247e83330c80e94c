//! Bearing and heading calculations for the compass.
//!
//! Pure functions only. Angles handed to the presentation layer are
//! normalized into `[0, 360)`, except the display rotation which is applied
//! directly as a rotation transform.

use serde::{Deserialize, Serialize};

use crate::{geo::GeoCoordinate, magnetic::MagnetometerSample};

/// Sensor axis convention used to turn a raw field vector into a heading.
#[derive(
    Clone, Copy, Default, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PlatformKind {
    /// heading = atan2(y, x)
    #[default]
    Standard = 0,
    /// heading = atan2(x, y)
    Swapped = 1,
}

impl PlatformKind {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Swapped => "swapped",
        }
    }

    pub fn from_str_name(value: &str) -> Option<Self> {
        match value {
            "standard" => Some(Self::Standard),
            "swapped" => Some(Self::Swapped),
            _ => None,
        }
    }

    /// Resolves the convention into a plain function so the per-sample path
    /// does not branch on the platform.
    pub fn heading_fn(self) -> HeadingFn {
        match self {
            Self::Standard => standard_heading,
            Self::Swapped => swapped_heading,
        }
    }
}

pub type HeadingFn = fn(&MagnetometerSample) -> f64;

fn standard_heading(sample: &MagnetometerSample) -> f64 {
    normalize_atan2_degrees(sample.y.atan2(sample.x).to_degrees())
}

fn swapped_heading(sample: &MagnetometerSample) -> f64 {
    normalize_atan2_degrees(sample.x.atan2(sample.y).to_degrees())
}

// atan2 lands in [-180, 180], so a single shift is enough
fn normalize_atan2_degrees(angle: f64) -> f64 {
    (angle + 360.0) % 360.0
}

/// Wraps any finite angle into `[0, 360)`.
pub fn normalize_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid rounds tiny negatives up to exactly 360
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Initial great-circle bearing from `observer` to `target`, clockwise from
/// true north.
///
/// Identical points give a bearing of 0.
pub fn compute_bearing(observer: GeoCoordinate, target: GeoCoordinate) -> f64 {
    let lat1 = observer.latitude.to_radians();
    let lat2 = target.latitude.to_radians();
    let delta_lon = (target.longitude - observer.longitude).to_radians();

    let y = delta_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();
    normalize_atan2_degrees(y.atan2(x).to_degrees())
}

/// Device heading from a raw magnetometer sample. The z axis is ignored.
pub fn compute_heading(sample: &MagnetometerSample, platform: PlatformKind) -> f64 {
    (platform.heading_fn())(sample)
}

/// Rotation of the target marker relative to the device, in degrees.
///
/// Not normalized: any real angle is a valid rotation transform.
pub fn compute_display_rotation(bearing: f64, heading: f64) -> f64 {
    bearing - heading
}

/// Rotation that keeps the compass rose pointing north.
pub fn rose_rotation(heading: f64) -> f64 {
    -heading
}
