use anyhow::{anyhow, Context};
use bno055::{BNO055Calibration, BNO055OperationMode, Bno055, BNO055_CALIB_SIZE};
use linux_embedded_hal::Delay;
use qibla_compass::{
    error::CompassError, magnetic::MagnetometerSample, sensor::MagnetometerSource,
    storage::KeyValueStore,
};
use rppal::i2c::I2c;
use tracing::{debug, info};

use crate::helpers::{hex_decode, hex_encode};

pub(crate) const CALIBRATION_KEY: &str = "bno055.calibration";

/// BNO055 running in magnetometer-only mode, read raw without fusion.
pub(crate) struct Bno055Magnetometer {
    imu: Bno055<I2c>,
    delay: Delay,
}

fn unavailable(e: impl std::fmt::Debug) -> CompassError {
    CompassError::SensorUnavailable(format!("{e:?}"))
}

impl Bno055Magnetometer {
    pub(crate) fn open(bus: u8) -> Result<Self, CompassError> {
        let i2c = I2c::with_bus(bus).map_err(unavailable)?;
        let mut imu = Bno055::new(i2c);
        let mut delay = Delay;

        imu.init(&mut delay).map_err(unavailable)?;
        imu.set_mode(BNO055OperationMode::MAG_ONLY, &mut delay)
            .map_err(unavailable)?;
        info!("BNO055 on i2c bus {bus} in magnetometer mode");
        Ok(Bno055Magnetometer { imu, delay })
    }

    /// Loads a calibration profile saved by an earlier run. Returns whether
    /// one was found.
    pub(crate) fn restore_calibration(
        &mut self,
        store: &impl KeyValueStore,
    ) -> anyhow::Result<bool> {
        let Some(hex) = store.get(CALIBRATION_KEY)? else {
            return Ok(false);
        };
        let bytes = hex_decode(&hex).ok_or_else(|| anyhow!("stored calibration is not hex"))?;
        let mut buf = [0u8; BNO055_CALIB_SIZE];
        let len = bytes.len().min(BNO055_CALIB_SIZE);
        buf[..len].copy_from_slice(&bytes[..len]);
        self.imu
            .set_calibration_profile(BNO055Calibration::from_buf(&buf), &mut self.delay)
            .map_err(|e| anyhow!("writing calibration failed: {e:?}"))?;
        debug!("restored BNO055 calibration");
        Ok(true)
    }

    pub(crate) fn save_calibration(
        &mut self,
        store: &mut impl KeyValueStore,
    ) -> anyhow::Result<()> {
        let calib = self
            .imu
            .calibration_profile(&mut self.delay)
            .map_err(|e| anyhow!("reading calibration failed: {e:?}"))?;
        store
            .set(CALIBRATION_KEY, &hex_encode(calib.as_bytes()))
            .context("saving calibration")?;
        Ok(())
    }
}

impl MagnetometerSource for Bno055Magnetometer {
    fn read(&mut self) -> Result<MagnetometerSample, CompassError> {
        let field = self.imu.mag_data().map_err(unavailable)?;
        Ok(MagnetometerSample::from(field))
    }
}
