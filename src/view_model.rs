//! Per-screen compass state.
//!
//! The view-model is created when the compass screen mounts and consumed
//! when it unmounts. It owns the observer position, the latest heading and
//! the sensor subscription; nothing here is global.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    bearing::{
        compute_bearing, compute_display_rotation, normalize_degrees, rose_rotation, HeadingFn,
        PlatformKind,
    },
    error::CompassError,
    geo::{great_circle_distance_km, GeoCoordinate, KAABA},
    location::{LocationAccuracy, LocationProvider, PermissionStatus},
    magnetic::{HeadingFilter, MagneticData, MagnetometerSample},
    sensor::Subscription,
    storage::{load_cached_location, save_cached_location, CachedLocation, KeyValueStore},
};

#[derive(Debug, Clone, PartialEq)]
pub struct CompassSettings {
    pub target: GeoCoordinate,
    pub platform: PlatformKind,
    /// EMA factor for the raw field vector, `None` for unfiltered samples.
    pub smoothing: Option<f64>,
    pub apply_declination: bool,
    pub sample_interval: Duration,
}

impl Default for CompassSettings {
    fn default() -> Self {
        CompassSettings {
            target: KAABA,
            platform: PlatformKind::Standard,
            smoothing: None,
            apply_declination: false,
            sample_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompassStatus {
    Locating,
    Ready,
    Failed(CompassError),
}

/// Everything the compass screen needs to draw one frame.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct CompassReading {
    pub bearing: f64,
    pub heading: f64,
    pub rotation: f64,
    pub rose_rotation: f64,
    pub distance_km: f64,
    /// Declination added to the magnetic heading, if any.
    pub declination: Option<f32>,
}

pub struct CompassViewModel<S> {
    store: S,
    target: GeoCoordinate,
    heading_fn: HeadingFn,
    filter: Option<HeadingFilter>,
    apply_declination: bool,
    observer: Option<GeoCoordinate>,
    bearing: Option<f64>,
    distance_km: Option<f64>,
    declination: Option<f32>,
    heading: Option<f64>,
    status: CompassStatus,
    subscription: Option<Subscription>,
}

impl<S: KeyValueStore> CompassViewModel<S> {
    /// Sets up screen state, restoring the last known position if one was
    /// cached by an earlier session.
    pub fn mount(store: S, settings: &CompassSettings) -> Self {
        let mut view_model = CompassViewModel {
            store,
            target: settings.target,
            heading_fn: settings.platform.heading_fn(),
            filter: settings.smoothing.map(HeadingFilter::new),
            apply_declination: settings.apply_declination,
            observer: None,
            bearing: None,
            distance_km: None,
            declination: None,
            heading: None,
            status: CompassStatus::Locating,
            subscription: None,
        };
        match load_cached_location(&view_model.store) {
            Ok(Some(cached)) if cached.coordinate.is_valid() => {
                info!(
                    "Using cached location from {}",
                    cached.fixed_at.format("%Y-%m-%d %H:%M")
                );
                view_model.set_observer(cached.coordinate);
            }
            Ok(Some(_)) => warn!("Ignoring cached location outside valid range"),
            Ok(None) => debug!("no cached location"),
            Err(e) => warn!("Ignoring cached location: {e}"),
        }
        view_model
    }

    /// Asks the provider for a fresh fix and recomputes the bearing.
    ///
    /// On failure the previous position, if any, stays in use.
    pub async fn refresh_location<P: LocationProvider>(
        &mut self,
        provider: &mut P,
        accuracy: LocationAccuracy,
    ) -> Result<GeoCoordinate, CompassError> {
        if provider.request_permission().await == PermissionStatus::Denied {
            return Err(self.fail(CompassError::PermissionDenied));
        }
        let coordinate = match provider.current_coordinate(accuracy).await {
            Ok(coordinate) if coordinate.is_valid() => coordinate,
            Ok(coordinate) => {
                return Err(self.fail(CompassError::LocationUnavailable(format!(
                    "provider returned out of range position {coordinate:?}"
                ))))
            }
            Err(e) => return Err(self.fail(e)),
        };

        let cached = CachedLocation {
            coordinate,
            fixed_at: Utc::now(),
        };
        if let Err(e) = save_cached_location(&mut self.store, &cached) {
            warn!("Could not cache location: {e}");
        }
        self.set_observer(coordinate);
        Ok(coordinate)
    }

    /// New observer position: the only input that moves the bearing.
    pub fn set_observer(&mut self, coordinate: GeoCoordinate) {
        let bearing = compute_bearing(coordinate, self.target);
        self.observer = Some(coordinate);
        self.bearing = Some(bearing);
        self.distance_km = Some(great_circle_distance_km(coordinate, self.target));
        self.declination = if self.apply_declination {
            let data = MagneticData::at(coordinate, 0.0, Utc::now().date_naive());
            if data.is_none() {
                warn!("No magnetic model for today, using magnetic heading");
            }
            data.map(|d| d.declination)
        } else {
            None
        };
        self.status = CompassStatus::Ready;
        debug!(bearing, "observer updated");
    }

    /// New magnetometer sample: only the heading moves.
    pub fn on_sample(&mut self, sample: MagnetometerSample) -> Option<CompassReading> {
        if !(sample.x.is_finite() && sample.y.is_finite()) {
            debug!("dropping non finite sample");
            return self.reading();
        }
        let sample = match self.filter.as_mut() {
            Some(filter) => filter.apply(&sample),
            None => sample,
        };
        let mut heading = (self.heading_fn)(&sample);
        if let Some(declination) = self.declination {
            heading = normalize_degrees(heading + f64::from(declination));
        }
        self.heading = Some(heading);
        self.reading()
    }

    pub fn reading(&self) -> Option<CompassReading> {
        let bearing = self.bearing?;
        let heading = self.heading?;
        Some(CompassReading {
            bearing,
            heading,
            rotation: compute_display_rotation(bearing, heading),
            rose_rotation: rose_rotation(heading),
            distance_km: self.distance_km.unwrap_or_default(),
            declination: self.declination,
        })
    }

    /// Keeps `subscription` alive for the screen, releasing the one it replaces.
    pub fn attach_subscription(&mut self, subscription: Subscription) {
        if let Some(previous) = self.subscription.replace(subscription) {
            debug!(id = previous.id(), "replacing sensor subscription");
            previous.unsubscribe();
        }
    }

    pub fn release_subscription(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    pub fn has_subscription(&self) -> bool {
        self.subscription.as_ref().is_some_and(Subscription::is_active)
    }

    /// Tears the screen down and hands the store back.
    pub fn unmount(mut self) -> S {
        self.release_subscription();
        self.store
    }

    pub fn status(&self) -> &CompassStatus {
        &self.status
    }

    pub fn observer(&self) -> Option<GeoCoordinate> {
        self.observer
    }

    pub fn bearing(&self) -> Option<f64> {
        self.bearing
    }

    pub fn heading(&self) -> Option<f64> {
        self.heading
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    fn fail(&mut self, error: CompassError) -> CompassError {
        warn!("Compass: {error}");
        self.status = CompassStatus::Failed(error.clone());
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bearing::compute_heading,
        storage::{MemoryStore, LAST_LOCATION_KEY},
    };
    use approx::assert_relative_eq;
    use tokio_util::sync::CancellationToken;

    const LONDON: GeoCoordinate = GeoCoordinate::new(51.5074, -0.1278);
    const JAKARTA: GeoCoordinate = GeoCoordinate::new(-6.2, 106.8);

    struct FakeProvider {
        permission: PermissionStatus,
        result: Result<GeoCoordinate, CompassError>,
        calls: usize,
    }

    impl FakeProvider {
        fn at(coordinate: GeoCoordinate) -> Self {
            FakeProvider {
                permission: PermissionStatus::Granted,
                result: Ok(coordinate),
                calls: 0,
            }
        }
    }

    impl LocationProvider for FakeProvider {
        async fn request_permission(&mut self) -> PermissionStatus {
            self.permission
        }

        async fn current_coordinate(
            &mut self,
            _accuracy: LocationAccuracy,
        ) -> Result<GeoCoordinate, CompassError> {
            self.calls += 1;
            self.result.clone()
        }
    }

    fn mount(store: MemoryStore) -> CompassViewModel<MemoryStore> {
        CompassViewModel::mount(store, &CompassSettings::default())
    }

    #[tokio::test]
    async fn test_no_reading_until_position_and_sample() {
        let mut vm = mount(MemoryStore::new());
        assert_eq!(vm.status(), &CompassStatus::Locating);
        assert!(vm.on_sample(MagnetometerSample::new(1.0, 0.0, 0.0)).is_none());
        assert_relative_eq!(vm.heading().unwrap(), 0.0);

        let mut provider = FakeProvider::at(LONDON);
        vm.refresh_location(&mut provider, LocationAccuracy::Balanced)
            .await
            .unwrap();
        assert_eq!(vm.status(), &CompassStatus::Ready);

        let reading = vm.reading().unwrap();
        assert_relative_eq!(reading.bearing, compute_bearing(LONDON, KAABA));
        assert_relative_eq!(reading.rotation, reading.bearing - reading.heading);
        assert_relative_eq!(reading.rose_rotation, -reading.heading);
        assert!(reading.distance_km > 4000.0);
        assert_eq!(reading.declination, None);
    }

    #[tokio::test]
    async fn test_samples_move_heading_not_bearing() {
        let mut vm = mount(MemoryStore::new());
        vm.set_observer(JAKARTA);
        let bearing = vm.bearing().unwrap();

        let first = vm.on_sample(MagnetometerSample::new(0.0, 1.0, 0.0)).unwrap();
        let second = vm.on_sample(MagnetometerSample::new(-1.0, 0.0, 0.0)).unwrap();
        assert_eq!(first.bearing.to_bits(), bearing.to_bits());
        assert_eq!(second.bearing.to_bits(), bearing.to_bits());
        assert_relative_eq!(first.heading, 90.0);
        assert_relative_eq!(second.heading, 180.0);
    }

    #[tokio::test]
    async fn test_refresh_caches_location_for_next_mount() {
        let mut vm = mount(MemoryStore::new());
        let mut provider = FakeProvider::at(JAKARTA);
        vm.refresh_location(&mut provider, LocationAccuracy::Low)
            .await
            .unwrap();
        let store = vm.unmount();
        assert!(store.get(LAST_LOCATION_KEY).unwrap().is_some());

        let vm = mount(store);
        assert_eq!(vm.observer(), Some(JAKARTA));
        assert_eq!(vm.status(), &CompassStatus::Ready);
    }

    #[tokio::test]
    async fn test_permission_denied_keeps_previous_position() {
        let mut vm = mount(MemoryStore::new());
        vm.set_observer(LONDON);
        let mut provider = FakeProvider::at(JAKARTA);
        provider.permission = PermissionStatus::Denied;

        let err = vm
            .refresh_location(&mut provider, LocationAccuracy::Balanced)
            .await
            .unwrap_err();
        assert_eq!(err, CompassError::PermissionDenied);
        assert_eq!(vm.status(), &CompassStatus::Failed(CompassError::PermissionDenied));
        assert_eq!(vm.observer(), Some(LONDON));
        assert_eq!(provider.calls, 0);
    }

    #[tokio::test]
    async fn test_location_failure_is_reported() {
        let mut vm = mount(MemoryStore::new());
        let mut provider = FakeProvider::at(LONDON);
        provider.result = Err(CompassError::LocationUnavailable("no satellites".into()));

        let err = vm
            .refresh_location(&mut provider, LocationAccuracy::High)
            .await
            .unwrap_err();
        assert!(matches!(err, CompassError::LocationUnavailable(_)));
        assert!(matches!(vm.status(), CompassStatus::Failed(_)));
        assert!(vm.observer().is_none());
        assert!(vm.store().get(LAST_LOCATION_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_out_of_range_fix_is_rejected() {
        let mut vm = mount(MemoryStore::new());
        let mut provider = FakeProvider::at(GeoCoordinate::new(120.0, 0.0));
        let err = vm
            .refresh_location(&mut provider, LocationAccuracy::Low)
            .await
            .unwrap_err();
        assert!(matches!(err, CompassError::LocationUnavailable(_)));
    }

    #[test]
    fn test_corrupt_cache_is_ignored() {
        let mut store = MemoryStore::new();
        store.set(LAST_LOCATION_KEY, "garbage").unwrap();
        let vm = mount(store);
        assert!(vm.observer().is_none());
        assert_eq!(vm.status(), &CompassStatus::Locating);
    }

    #[test]
    fn test_swapped_platform_strategy() {
        let settings = CompassSettings {
            platform: PlatformKind::Swapped,
            ..CompassSettings::default()
        };
        let mut vm = CompassViewModel::mount(MemoryStore::new(), &settings);
        vm.set_observer(LONDON);
        let sample = MagnetometerSample::new(0.3, -0.7, 0.1);
        let reading = vm.on_sample(sample).unwrap();
        assert_eq!(reading.heading, compute_heading(&sample, PlatformKind::Swapped));
    }

    #[test]
    fn test_non_finite_sample_is_dropped() {
        let mut vm = mount(MemoryStore::new());
        vm.set_observer(LONDON);
        vm.on_sample(MagnetometerSample::new(0.0, 1.0, 0.0));
        let reading = vm
            .on_sample(MagnetometerSample::new(f64::NAN, 1.0, 0.0))
            .unwrap();
        assert_relative_eq!(reading.heading, 90.0);
    }

    #[test]
    fn test_smoothing_damps_jumps() {
        let settings = CompassSettings {
            smoothing: Some(0.5),
            ..CompassSettings::default()
        };
        let mut vm = CompassViewModel::mount(MemoryStore::new(), &settings);
        vm.set_observer(LONDON);
        vm.on_sample(MagnetometerSample::new(1.0, 0.0, 0.0));
        let reading = vm.on_sample(MagnetometerSample::new(0.0, 1.0, 0.0)).unwrap();
        // halfway between east-of-x and y axis
        assert_relative_eq!(reading.heading, 45.0, epsilon = 1e-9);
    }

    #[test]
    fn test_declination_shifts_heading_when_enabled() {
        let settings = CompassSettings {
            apply_declination: true,
            ..CompassSettings::default()
        };
        let mut vm = CompassViewModel::mount(MemoryStore::new(), &settings);
        vm.set_observer(JAKARTA);
        let reading = vm.on_sample(MagnetometerSample::new(1.0, 0.0, 0.0)).unwrap();
        match MagneticData::at(JAKARTA, 0.0, Utc::now().date_naive()) {
            Some(data) => {
                assert_eq!(reading.declination, Some(data.declination));
                assert_relative_eq!(
                    reading.heading,
                    normalize_degrees(f64::from(data.declination)),
                    epsilon = 1e-9
                );
            }
            None => {
                assert_eq!(reading.declination, None);
                assert_relative_eq!(reading.heading, 0.0);
            }
        }
    }

    #[tokio::test]
    async fn test_replacing_subscription_releases_previous() {
        let mut vm = mount(MemoryStore::new());
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        vm.attach_subscription(Subscription::new(first.clone(), tokio::spawn(async {})));
        assert!(vm.has_subscription());
        vm.attach_subscription(Subscription::new(second.clone(), tokio::spawn(async {})));
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        vm.unmount();
        assert!(second.is_cancelled());
    }
}
