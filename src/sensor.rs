//! Magnetic field sensor boundary.
//!
//! A [`Subscription`] owns the polling task behind a sensor callback and
//! stops it exactly once, either through [`Subscription::unsubscribe`] or
//! when the handle is dropped.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{error::CompassError, magnetic::MagnetometerSample};

/// Anything that can produce a raw magnetometer reading on demand.
pub trait MagnetometerSource: Send + 'static {
    fn read(&mut self) -> Result<MagnetometerSample, CompassError>;
}

#[allow(async_fn_in_trait)]
pub trait MagneticSensor {
    async fn subscribe<F>(
        &mut self,
        interval: Duration,
        callback: F,
    ) -> Result<Subscription, CompassError>
    where
        F: FnMut(MagnetometerSample) + Send + 'static;
}

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct Subscription {
    id: u64,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Subscription {
            id: NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed),
            cancel: Some(cancel),
            task: Some(task),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) -> bool {
        let Some(token) = self.cancel.take() else {
            return false;
        };
        token.cancel();
        // the task observes the token and exits on its own
        self.task.take();
        debug!(id = self.id, "sensor subscription released");
        true
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Sensor that polls a [`MagnetometerSource`] on a tokio task.
pub struct PollingSensor<S> {
    source: Arc<Mutex<S>>,
}

impl<S: MagnetometerSource> PollingSensor<S> {
    pub fn new(source: S) -> Self {
        PollingSensor {
            source: Arc::new(Mutex::new(source)),
        }
    }

    /// Runs `f` with exclusive access to the source, between two polls.
    pub async fn with_source<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut source = self.source.lock().await;
        f(&mut source)
    }

    /// Number of polling tasks still holding the source.
    pub fn active_pollers(&self) -> usize {
        Arc::strong_count(&self.source) - 1
    }
}

impl<S: MagnetometerSource> MagneticSensor for PollingSensor<S> {
    async fn subscribe<F>(
        &mut self,
        interval: Duration,
        mut callback: F,
    ) -> Result<Subscription, CompassError>
    where
        F: FnMut(MagnetometerSample) + Send + 'static,
    {
        // read once so a missing sensor fails the subscription itself
        let first = self.source.lock().await.read().inspect_err(|e| {
            warn!("First magnetometer read failed: {e}");
        })?;
        callback(first);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let source = Arc::clone(&self.source);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let reading = source.lock().await.read();
                        match reading {
                            Ok(sample) => callback(sample),
                            Err(e) => warn!("Magnetometer read failed: {e}"),
                        }
                    }
                }
            }
            debug!("magnetometer polling stopped");
        });
        Ok(Subscription::new(cancel, task))
    }
}
