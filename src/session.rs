//! Event loop of one compass screen.
//!
//! Sensor samples, refresh requests and the close request all arrive on one
//! queue and are applied to the view-model strictly one after another, so
//! the view-model never needs a lock.

use std::time::Duration;

use tokio::sync::{
    mpsc::{self, error::TrySendError},
    watch,
};
use tracing::{debug, info, trace};

use crate::{
    error::CompassError,
    location::{LocationAccuracy, LocationProvider},
    magnetic::MagnetometerSample,
    sensor::MagneticSensor,
    storage::KeyValueStore,
    view_model::{CompassReading, CompassStatus, CompassViewModel},
};

const EVENT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScreenEvent {
    Sample(MagnetometerSample),
    RefreshLocation,
    Close,
}

/// Event queue feeding a session. Hosts keep a [`ScreenEvents::sender`]
/// to request refreshes or close the screen.
pub struct ScreenEvents {
    tx: mpsc::Sender<ScreenEvent>,
    rx: mpsc::Receiver<ScreenEvent>,
}

impl ScreenEvents {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        ScreenEvents { tx, rx }
    }

    pub fn sender(&self) -> mpsc::Sender<ScreenEvent> {
        self.tx.clone()
    }
}

impl Default for ScreenEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// What the presentation layer renders.
#[derive(Debug, Clone, PartialEq)]
pub struct CompassFrame {
    pub status: CompassStatus,
    pub reading: Option<CompassReading>,
}

impl Default for CompassFrame {
    fn default() -> Self {
        CompassFrame {
            status: CompassStatus::Locating,
            reading: None,
        }
    }
}

pub struct CompassSession<'a, S, M, P> {
    view_model: &'a mut CompassViewModel<S>,
    sensor: &'a mut M,
    provider: &'a mut P,
    accuracy: LocationAccuracy,
    interval: Duration,
}

impl<'a, S, M, P> CompassSession<'a, S, M, P>
where
    S: KeyValueStore,
    M: MagneticSensor,
    P: LocationProvider,
{
    pub fn new(
        view_model: &'a mut CompassViewModel<S>,
        sensor: &'a mut M,
        provider: &'a mut P,
        accuracy: LocationAccuracy,
        interval: Duration,
    ) -> Self {
        CompassSession {
            view_model,
            sensor,
            provider,
            accuracy,
            interval,
        }
    }

    /// Runs until a [`ScreenEvent::Close`] arrives or every sender is gone.
    ///
    /// Location failures are published and the loop keeps going; only a
    /// missing sensor ends the session early. The sensor subscription is
    /// released before this returns.
    pub async fn run(
        self,
        events: ScreenEvents,
        frames: &watch::Sender<CompassFrame>,
    ) -> Result<(), CompassError> {
        let ScreenEvents { tx, mut rx } = events;
        // The poller must not keep the queue open, or `recv` never sees the
        // host hang up.
        let samples = tx.downgrade();
        drop(tx);

        let subscription = self
            .sensor
            .subscribe(self.interval, move |sample| {
                let Some(tx) = samples.upgrade() else {
                    return;
                };
                if let Err(TrySendError::Full(_)) = tx.try_send(ScreenEvent::Sample(sample)) {
                    trace!("event queue full, dropping sample");
                }
            })
            .await;
        let subscription = match subscription {
            Ok(subscription) => subscription,
            Err(e) => {
                frames.send_replace(CompassFrame {
                    status: CompassStatus::Failed(e.clone()),
                    reading: None,
                });
                return Err(e);
            }
        };
        self.view_model.attach_subscription(subscription);

        if self.view_model.observer().is_none() {
            publish(self.view_model, frames);
            // failure is already recorded in the status
            let _ = self
                .view_model
                .refresh_location(self.provider, self.accuracy)
                .await;
        }
        publish(self.view_model, frames);

        while let Some(event) = rx.recv().await {
            match event {
                ScreenEvent::Sample(sample) => {
                    self.view_model.on_sample(sample);
                }
                ScreenEvent::RefreshLocation => {
                    info!("Refreshing location");
                    let _ = self
                        .view_model
                        .refresh_location(self.provider, self.accuracy)
                        .await;
                }
                ScreenEvent::Close => {
                    debug!("compass screen closing");
                    break;
                }
            }
            publish(self.view_model, frames);
        }

        self.view_model.release_subscription();
        Ok(())
    }
}

fn publish<S: KeyValueStore>(
    view_model: &CompassViewModel<S>,
    frames: &watch::Sender<CompassFrame>,
) {
    frames.send_replace(CompassFrame {
        status: view_model.status().clone(),
        reading: view_model.reading(),
    });
}
