use chrono::{DateTime, Datelike, NaiveDate, Utc};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use world_magnetic_model::{
    time::Date,
    uom::si::{
        angle::{degree, Angle},
        f32::Length,
        length::meter,
        magnetic_flux_density::microtesla,
    },
    GeomagneticField,
};

use crate::geo::GeoCoordinate;

/// One raw reading of the magnetic field in device axes.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct MagnetometerSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub at: DateTime<Utc>,
}

impl MagnetometerSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        MagnetometerSample {
            x,
            y,
            z,
            at: Utc::now(),
        }
    }

    pub fn as_vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}

impl From<mint::Vector3<f32>> for MagnetometerSample {
    fn from(value: mint::Vector3<f32>) -> Self {
        MagnetometerSample::new(value.x.into(), value.y.into(), value.z.into())
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, PartialEq)]
pub struct MagneticData {
    /// in degrees, east positive
    pub declination: f32,
    /// in degrees
    pub inclination: f32,
    /// in µT
    pub magnetic_flux_density: f32,
}

impl MagneticData {
    /// Looks up the World Magnetic Model at a position and date.
    ///
    /// Returns `None` when the date falls outside the model's validity window.
    pub fn at(position: GeoCoordinate, altitude_m: f32, date: NaiveDate) -> Option<Self> {
        let date = Date::from_ordinal_date(date.year(), date.ordinal() as u16).ok()?;
        let field = GeomagneticField::new(
            Length::new::<meter>(altitude_m),
            Angle::new::<degree>(position.latitude as f32),
            Angle::new::<degree>(position.longitude as f32),
            date,
        )
        .ok()?;
        Some(MagneticData {
            declination: field.declination().get::<degree>(),
            inclination: field.inclination().get::<degree>(),
            magnetic_flux_density: field.f().get::<microtesla>(),
        })
    }
}

/// Exponential moving average over the raw field vector.
///
/// Averaging the vector instead of the angle keeps the 359 -> 0 wrap from
/// producing a swing through south.
#[derive(Clone, Debug)]
pub struct HeadingFilter {
    factor: f64,
    state: Option<Vector3<f64>>,
}

impl HeadingFilter {
    /// `factor` is the weight of the newest sample; 1 disables filtering.
    pub fn new(factor: f64) -> Self {
        let factor = if factor.is_finite() && factor > 0.0 {
            factor.min(1.0)
        } else {
            1.0
        };
        HeadingFilter {
            factor,
            state: None,
        }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn apply(&mut self, sample: &MagnetometerSample) -> MagnetometerSample {
        let current = sample.as_vector();
        let filtered = match self.state {
            Some(previous) => previous.lerp(&current, self.factor),
            None => current,
        };
        self.state = Some(filtered);
        MagnetometerSample {
            x: filtered.x,
            y: filtered.y,
            z: filtered.z,
            at: sample.at,
        }
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}
