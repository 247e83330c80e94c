use chrono::{DateTime, Utc};
use gpsd_proto::UnifiedResponse;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::geo::GeoCoordinate;

/// A position report taken from a gpsd TPV message.
#[derive(Deserialize, Debug, Serialize, Clone, Copy, PartialEq)]
pub struct GnssFix {
    pub lat: f64,
    pub lon: f64,
    pub alt: f32,
    pub mode: Mode,
    /// Horizontal error estimate in metres, when gpsd reports one.
    pub estimated_error_plane: Option<f32>,
    pub received_at: DateTime<Utc>,
}

impl GnssFix {
    pub fn coordinate(&self) -> GeoCoordinate {
        GeoCoordinate::new(self.lat, self.lon)
    }
}

#[derive(
    Clone, Default, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Mode {
    #[default]
    NoFix = 0,
    Fix2d = 1,
    Fix3d = 2,
}

impl Mode {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Self::NoFix => "NO_FIX",
            Self::Fix2d => "FIX_2D",
            Self::Fix3d => "FIX_3D",
        }
    }
}

impl From<gpsd_proto::Mode> for Mode {
    fn from(value: gpsd_proto::Mode) -> Self {
        match value {
            gpsd_proto::Mode::NoFix => Mode::NoFix,
            gpsd_proto::Mode::Fix2d => Mode::Fix2d,
            gpsd_proto::Mode::Fix3d => Mode::Fix3d,
        }
    }
}

/// Decodes one line of gpsd output into a fix.
///
/// Anything that is not a TPV report with a usable position yields `None`.
pub fn parse_gpsd_line(line: &str) -> Option<GnssFix> {
    let response: UnifiedResponse = match serde_json::from_str(line) {
        Ok(response) => response,
        Err(e) => {
            debug!("Error decoding gpsd line: {e}");
            return None;
        }
    };
    let UnifiedResponse::Tpv(tpv) = response else {
        trace!("skipping non TPV report");
        return None;
    };
    let mode = Mode::from(tpv.mode);
    let (Some(lat), Some(lon)) = (tpv.lat, tpv.lon) else {
        trace!("TPV without position, mode {}", mode.as_str_name());
        return None;
    };
    if mode == Mode::NoFix {
        return None;
    }
    let fix = GnssFix {
        lat,
        lon,
        alt: tpv.alt.unwrap_or_default(),
        mode,
        estimated_error_plane: tpv.eph,
        received_at: Utc::now(),
    };
    fix.coordinate().is_valid().then_some(fix)
}
