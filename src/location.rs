use std::time::Duration;

use futures::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::{
    error::CompassError,
    geo::GeoCoordinate,
    gnss::{parse_gpsd_line, GnssFix, Mode},
};

/// How good a fix has to be before it is handed to the compass.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationAccuracy {
    Low,
    #[default]
    Balanced,
    High,
}

impl LocationAccuracy {
    pub fn minimum_mode(self) -> Mode {
        match self {
            Self::Low | Self::Balanced => Mode::Fix2d,
            Self::High => Mode::Fix3d,
        }
    }

    /// Largest acceptable horizontal error in metres.
    pub fn max_horizontal_error_m(self) -> Option<f32> {
        match self {
            Self::Low => None,
            Self::Balanced => Some(100.0),
            Self::High => Some(20.0),
        }
    }

    /// A fix without an error estimate is judged by its mode alone.
    pub fn accepts(self, fix: &GnssFix) -> bool {
        if fix.mode < self.minimum_mode() {
            return false;
        }
        match (self.max_horizontal_error_m(), fix.estimated_error_plane) {
            (Some(max), Some(error)) => error <= max,
            _ => true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

#[allow(async_fn_in_trait)]
pub trait LocationProvider {
    async fn request_permission(&mut self) -> PermissionStatus;

    async fn current_coordinate(
        &mut self,
        accuracy: LocationAccuracy,
    ) -> Result<GeoCoordinate, CompassError>;
}

/// Location provider reading fixes from a local gpsd daemon.
#[derive(Debug, Clone)]
pub struct GpsdLocationProvider {
    addr: String,
    allowed: bool,
    fix_timeout: Duration,
    last_fix: Option<GnssFix>,
}

impl GpsdLocationProvider {
    pub fn new(addr: impl Into<String>, allowed: bool, fix_timeout: Duration) -> Self {
        GpsdLocationProvider {
            addr: addr.into(),
            allowed,
            fix_timeout,
            last_fix: None,
        }
    }

    /// The complete report behind the last coordinate handed out.
    pub fn last_fix(&self) -> Option<&GnssFix> {
        self.last_fix.as_ref()
    }

    async fn wait_for_fix(&self, accuracy: LocationAccuracy) -> Result<GnssFix, CompassError> {
        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            CompassError::LocationUnavailable(format!("cannot reach gpsd at {}: {e}", self.addr))
        })?;
        let mut framed: Framed<TcpStream, LinesCodec> = Framed::new(stream, LinesCodec::new());
        framed
            .send(gpsd_proto::ENABLE_WATCH_CMD)
            .await
            .map_err(|e| CompassError::LocationUnavailable(format!("gpsd watch failed: {e}")))?;

        while let Some(line) = framed.next().await {
            let line = line
                .map_err(|e| CompassError::LocationUnavailable(format!("gpsd read failed: {e}")))?;
            let Some(fix) = parse_gpsd_line(&line) else {
                continue;
            };
            if accuracy.accepts(&fix) {
                return Ok(fix);
            }
            debug!(
                "Fix: {} / error {:?} m below requested {:?}",
                fix.mode.as_str_name(),
                fix.estimated_error_plane,
                accuracy
            );
        }
        Err(CompassError::LocationUnavailable(
            "gpsd closed the connection".to_owned(),
        ))
    }
}

impl LocationProvider for GpsdLocationProvider {
    async fn request_permission(&mut self) -> PermissionStatus {
        if self.allowed {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }

    async fn current_coordinate(
        &mut self,
        accuracy: LocationAccuracy,
    ) -> Result<GeoCoordinate, CompassError> {
        let fix = match tokio::time::timeout(self.fix_timeout, self.wait_for_fix(accuracy)).await
        {
            Ok(fix) => fix?,
            Err(_) => {
                warn!("No usable fix from gpsd within {:?}", self.fix_timeout);
                return Err(CompassError::LocationUnavailable(format!(
                    "no fix within {} s",
                    self.fix_timeout.as_secs_f32()
                )));
            }
        };
        info!(
            "Fix: {} at {:.5}, {:.5}",
            fix.mode.as_str_name(),
            fix.lat,
            fix.lon
        );
        self.last_fix = Some(fix);
        Ok(fix.coordinate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::{io::AsyncWriteExt, net::TcpListener, task::JoinHandle};

    const VERSION: &str = r#"{"class":"VERSION","release":"3.25","rev":"3.25","proto_major":3,"proto_minor":15}"#;
    const TPV_NO_FIX: &str = r#"{"class":"TPV","device":"/dev/ttyACM0","mode":1}"#;
    const TPV_2D_ROUGH: &str = r#"{"class":"TPV","device":"/dev/ttyACM0","mode":2,"lat":51.5,"lon":-0.12,"eph":450.0}"#;
    const TPV_3D: &str = r#"{"class":"TPV","device":"/dev/ttyACM0","mode":3,"lat":51.5074,"lon":-0.1278,"alt":11.0,"eph":6.5}"#;

    fn fix(mode: Mode, error: Option<f32>) -> GnssFix {
        GnssFix {
            lat: 0.0,
            lon: 0.0,
            alt: 0.0,
            mode,
            estimated_error_plane: error,
            received_at: Utc::now(),
        }
    }

    async fn fake_gpsd(lines: Vec<&'static str>) -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for line in lines {
                let _ = socket.write_all(line.as_bytes()).await;
                let _ = socket.write_all(b"\n").await;
            }
            // hold the connection open like a quiet daemon
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        (addr, handle)
    }

    #[test]
    fn test_accuracy_rules() {
        assert!(LocationAccuracy::Low.accepts(&fix(Mode::Fix2d, Some(5000.0))));
        assert!(!LocationAccuracy::Low.accepts(&fix(Mode::NoFix, None)));
        assert!(LocationAccuracy::Balanced.accepts(&fix(Mode::Fix2d, Some(80.0))));
        assert!(!LocationAccuracy::Balanced.accepts(&fix(Mode::Fix3d, Some(120.0))));
        assert!(!LocationAccuracy::High.accepts(&fix(Mode::Fix2d, Some(1.0))));
        assert!(LocationAccuracy::High.accepts(&fix(Mode::Fix3d, None)));
    }

    #[tokio::test]
    async fn test_permission_follows_consent_flag() {
        let mut granted = GpsdLocationProvider::new("127.0.0.1:1", true, Duration::from_secs(1));
        assert_eq!(granted.request_permission().await, PermissionStatus::Granted);
        let mut denied = GpsdLocationProvider::new("127.0.0.1:1", false, Duration::from_secs(1));
        assert_eq!(denied.request_permission().await, PermissionStatus::Denied);
    }

    #[tokio::test]
    async fn test_waits_for_fix_matching_accuracy() {
        let (addr, server) = fake_gpsd(vec![VERSION, TPV_NO_FIX, TPV_2D_ROUGH, TPV_3D]).await;
        let mut provider = GpsdLocationProvider::new(addr, true, Duration::from_secs(5));

        let coordinate = provider
            .current_coordinate(LocationAccuracy::High)
            .await
            .unwrap();
        assert_eq!(coordinate, GeoCoordinate::new(51.5074, -0.1278));
        assert_eq!(provider.last_fix().map(|f| f.mode), Some(Mode::Fix3d));
        server.abort();
    }

    #[tokio::test]
    async fn test_low_accuracy_takes_first_fix() {
        let (addr, server) = fake_gpsd(vec![TPV_2D_ROUGH, TPV_3D]).await;
        let mut provider = GpsdLocationProvider::new(addr, true, Duration::from_secs(5));
        let coordinate = provider
            .current_coordinate(LocationAccuracy::Low)
            .await
            .unwrap();
        assert_eq!(coordinate, GeoCoordinate::new(51.5, -0.12));
        server.abort();
    }

    #[tokio::test]
    async fn test_times_out_without_usable_fix() {
        let (addr, server) = fake_gpsd(vec![VERSION, TPV_NO_FIX]).await;
        let mut provider = GpsdLocationProvider::new(addr, true, Duration::from_millis(200));
        let err = provider
            .current_coordinate(LocationAccuracy::Balanced)
            .await
            .unwrap_err();
        assert!(matches!(err, CompassError::LocationUnavailable(_)));
        assert!(provider.last_fix().is_none());
        server.abort();
    }

    #[tokio::test]
    async fn test_unreachable_daemon() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let mut provider = GpsdLocationProvider::new(addr, true, Duration::from_secs(2));
        let err = provider
            .current_coordinate(LocationAccuracy::Low)
            .await
            .unwrap_err();
        assert!(matches!(err, CompassError::LocationUnavailable(_)));
    }
}
