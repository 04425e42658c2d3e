use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use super::error::{CaptureUnavailable, SamplerError};
use super::source::{FixSource, FixSubscription};
use super::types::{Fix, FixEvent, SamplerEvent, SamplerState, SamplerStatus, SessionConfig};
use crate::bus::ObserverBus;
use crate::store::{Sample, SampleStore};

const ABSENCE_FACTOR: u32 = 3;
const MIN_ABSENCE_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Shared {
    status: SamplerStatus,
    /// Bumped on every start and stop; fixes from an older session are dropped.
    generation: u64,
}

#[derive(Debug)]
struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

/// Drives periodic capture from a [`FixSource`] into the store and the
/// sample bus.
pub struct Sampler {
    store: Arc<SampleStore>,
    source: Arc<dyn FixSource>,
    samples: Arc<ObserverBus<Sample>>,
    events: Arc<ObserverBus<SamplerEvent>>,
    shared: Arc<StdMutex<Shared>>,
    worker: Option<WorkerHandle>,
}

impl Sampler {
    pub fn new(store: Arc<SampleStore>, source: Arc<dyn FixSource>) -> Self {
        Self {
            store,
            source,
            samples: Arc::new(ObserverBus::new("sample")),
            events: Arc::new(ObserverBus::new("sampler event")),
            shared: Arc::new(StdMutex::new(Shared {
                status: SamplerStatus::stopped(),
                generation: 0,
            })),
            worker: None,
        }
    }

    /// Every accepted sample is published here after it was queued for storage.
    pub fn samples(&self) -> &Arc<ObserverBus<Sample>> {
        &self.samples
    }

    pub fn events(&self) -> &Arc<ObserverBus<SamplerEvent>> {
        &self.events
    }

    pub fn status(&self) -> SamplerStatus {
        lock(&self.shared).status.clone()
    }

    pub async fn start(&mut self, interval_ms: i64, high_accuracy: bool) -> Result<(), SamplerError> {
        let session = SessionConfig::new(interval_ms, high_accuracy)?;
        self.start_session(session).await
    }

    /// Starts capturing, or rebinds the running session to `session`.
    ///
    /// A fresh subscription is requested on every call. If the source
    /// refuses, the sampler stays in `Starting` and reports why.
    pub async fn start_session(&mut self, session: SessionConfig) -> Result<(), SamplerError> {
        if self.worker.is_some() {
            debug!("Rebinding sampler to {} ms", session.interval_ms);
            self.halt_worker().await;
        }

        let generation = {
            let mut locked = lock(&self.shared);
            locked.generation += 1;
            locked.status = SamplerStatus {
                state: SamplerState::Starting,
                session: Some(session),
                last_sample: None,
                unavailable: None,
                captured: 0,
            };
            locked.generation
        };
        self.events.publish(&SamplerEvent::Starting {
            interval_ms: session.interval_ms,
        });

        let ctx = FixContext {
            store: self.store.clone(),
            samples: self.samples.clone(),
            events: self.events.clone(),
            shared: self.shared.clone(),
            generation,
        };

        let subscription = match self.source.request_updates(session.request()) {
            Ok(subscription) => subscription,
            Err(reason) => {
                warn!("Location updates unavailable: {}", reason);
                ctx.unavailable(reason.clone());
                return Err(SamplerError::Unavailable(reason));
            }
        };

        info!(
            "Sampling every {} ms ({} accuracy)",
            session.interval_ms, session.accuracy
        );

        let (stop_tx, stop_rx) = oneshot::channel();
        let window = absence_window(&session);
        let join = tokio::spawn(run_sampler_loop(ctx, subscription, window, stop_rx));
        self.worker = Some(WorkerHandle { stop_tx, join });

        Ok(())
    }

    /// Stops capturing. A fix that is being processed right now is dropped.
    /// Calling this while stopped does nothing.
    pub async fn stop(&mut self) {
        let was_running = {
            let mut locked = lock(&self.shared);
            locked.generation += 1;
            let was_running = locked.status.state != SamplerState::Stopped;
            locked.status.state = SamplerState::Stopped;
            locked.status.session = None;
            locked.status.unavailable = None;
            was_running
        };

        self.halt_worker().await;

        if was_running {
            info!("Sampler stopped");
            self.events.publish(&SamplerEvent::Stopped);
        }
    }

    async fn halt_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if let Err(e) = worker.join.await {
                error!("Sampler worker failed: {}", e);
            }
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
        }
    }
}

fn lock(shared: &StdMutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn absence_window(session: &SessionConfig) -> Duration {
    (session.interval() * ABSENCE_FACTOR).max(MIN_ABSENCE_WINDOW)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FixOutcome {
    Stored(Sample),
    Sentinel,
    Invalid,
    Stale,
}

/// Everything a worker needs to turn fixes into samples.
struct FixContext {
    store: Arc<SampleStore>,
    samples: Arc<ObserverBus<Sample>>,
    events: Arc<ObserverBus<SamplerEvent>>,
    shared: Arc<StdMutex<Shared>>,
    generation: u64,
}

impl FixContext {
    fn on_fix(&self, fix: Fix) -> FixOutcome {
        if fix.is_sentinel() {
            debug!("Ignoring empty fix");
            return FixOutcome::Sentinel;
        }
        if !fix.is_valid() {
            warn!(
                "Ignoring invalid fix {}, {} (accuracy {})",
                fix.latitude, fix.longitude, fix.accuracy
            );
            return FixOutcome::Invalid;
        }

        let (sample, became_active) = {
            let mut locked = lock(&self.shared);
            if locked.generation != self.generation {
                return FixOutcome::Stale;
            }

            let sample = fix.to_sample(Utc::now().timestamp_millis());
            if let Err(e) = self.store.insert(sample) {
                error!("Failed to save location: {}", e);
            }

            let status = &mut locked.status;
            let became_active = status.state != SamplerState::Active;
            status.state = SamplerState::Active;
            status.unavailable = None;
            status.last_sample = Some(sample);
            status.captured += 1;
            (sample, became_active)
        };

        if became_active {
            self.events.publish(&SamplerEvent::Active);
        }
        self.samples.publish(&sample);

        FixOutcome::Stored(sample)
    }

    fn unavailable(&self, reason: CaptureUnavailable) {
        {
            let mut locked = lock(&self.shared);
            if locked.generation != self.generation {
                return;
            }
            locked.status.state = SamplerState::Starting;
            locked.status.unavailable = Some(reason.clone());
        }
        warn!("Capture unavailable: {}", reason);
        self.events.publish(&SamplerEvent::Unavailable { reason });
    }
}

async fn run_sampler_loop(
    ctx: FixContext,
    mut subscription: FixSubscription,
    window: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut deadline = Instant::now() + window;
    let mut absence_reported = false;

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = sleep_until(deadline), if !absence_reported => {
                absence_reported = true;
                ctx.unavailable(CaptureUnavailable::NoFix {
                    window_ms: window.as_millis() as u64,
                });
            }
            event = subscription.next() => match event {
                Some(FixEvent::Fix(fix)) => {
                    if let FixOutcome::Stored(sample) = ctx.on_fix(fix) {
                        debug!("Location saved: {:.6}, {:.6}", sample.latitude, sample.longitude);
                        deadline = Instant::now() + window;
                        absence_reported = false;
                    }
                }
                Some(FixEvent::Unavailable(reason)) => ctx.unavailable(reason),
                None => {
                    ctx.unavailable(CaptureUnavailable::Closed);
                    break;
                }
            },
        }
    }

    subscription.cancel();
    debug!("Sampler worker exited");
}
