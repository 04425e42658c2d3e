use log::{debug, info, trace, warn};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;

use super::error::CaptureUnavailable;
use super::types::{Fix, FixEvent, FixRequest};

const PUSH_QUEUE: usize = 64;

/// Something that can deliver position fixes on request.
pub trait FixSource: Send + Sync {
    /// Starts a new subscription. Any subscription handed out earlier by
    /// the same source may be superseded.
    fn request_updates(&self, request: FixRequest) -> Result<FixSubscription, CaptureUnavailable>;
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Live stream of fixes. Unregisters from its source exactly once, either
/// through [`FixSubscription::cancel`] or on drop.
pub struct FixSubscription {
    receiver: mpsc::Receiver<FixEvent>,
    cancel: Option<CancelFn>,
}

impl FixSubscription {
    pub fn new(receiver: mpsc::Receiver<FixEvent>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            receiver,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// `None` once the source has closed the stream.
    pub async fn next(&mut self) -> Option<FixEvent> {
        self.receiver.recv().await
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
        self.receiver.close();
    }
}

impl Drop for FixSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError {
    #[error("no sampler is listening for fixes")]
    NotSubscribed,
    #[error("location source disabled")]
    Disabled,
    #[error("fix queue is full")]
    Backlogged,
}

#[derive(Debug)]
struct PushSlot {
    id: u64,
    sender: mpsc::Sender<FixEvent>,
}

#[derive(Debug)]
struct PushInner {
    enabled: bool,
    next_id: u64,
    slot: Option<PushSlot>,
    request: Option<FixRequest>,
}

/// Fix source fed from outside the process, e.g. a device posting its
/// position over HTTP.
#[derive(Debug, Clone)]
pub struct PushSource {
    inner: Arc<Mutex<PushInner>>,
}

impl Default for PushSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PushSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PushInner {
                enabled: true,
                next_id: 1,
                slot: None,
                request: None,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PushInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, fix: Fix) -> Result<(), PushError> {
        let inner = self.lock();
        if !inner.enabled {
            return Err(PushError::Disabled);
        }
        let slot = inner.slot.as_ref().ok_or(PushError::NotSubscribed)?;
        if let Some(request) = inner.request {
            trace!("Pushing fix for subscription {} ({} accuracy)", slot.id, request.accuracy);
        }
        slot.sender
            .try_send(FixEvent::Fix(fix))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PushError::Backlogged,
                mpsc::error::TrySendError::Closed(_) => PushError::NotSubscribed,
            })
    }

    /// Withdraws access, as when location permission is revoked.
    pub fn revoke(&self, reason: CaptureUnavailable) {
        let mut inner = self.lock();
        inner.enabled = false;
        if let Some(slot) = &inner.slot {
            if slot.sender.try_send(FixEvent::Unavailable(reason.clone())).is_err() {
                warn!("Could not notify subscriber of revoked source: {}", reason);
            }
        }
        info!("Push source revoked: {}", reason);
    }

    pub fn grant(&self) {
        self.lock().enabled = true;
        info!("Push source granted");
    }

    #[cfg(test)]
    pub fn is_subscribed(&self) -> bool {
        self.lock()
            .slot
            .as_ref()
            .is_some_and(|slot| !slot.sender.is_closed())
    }

    /// Request of the current subscription, if any.
    #[cfg(test)]
    pub fn current_request(&self) -> Option<FixRequest> {
        let inner = self.lock();
        inner.slot.as_ref().and(inner.request)
    }
}

impl FixSource for PushSource {
    fn request_updates(&self, request: FixRequest) -> Result<FixSubscription, CaptureUnavailable> {
        let mut inner = self.lock();
        if !inner.enabled {
            return Err(CaptureUnavailable::PermissionDenied);
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let (sender, receiver) = mpsc::channel(PUSH_QUEUE);
        inner.slot = Some(PushSlot { id, sender });
        inner.request = Some(request);
        debug!(
            "Push subscription {} registered ({:?}, {})",
            id, request.min_interval, request.accuracy
        );

        let shared = self.inner.clone();
        Ok(FixSubscription::new(receiver, move || {
            let mut inner = shared.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.slot.as_ref().is_some_and(|slot| slot.id == id) {
                inner.slot = None;
                inner.request = None;
                debug!("Push subscription {} removed", id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::AccuracyClass;
    use std::time::Duration;

    fn request() -> FixRequest {
        FixRequest {
            min_interval: Duration::from_secs(10),
            accuracy: AccuracyClass::High,
        }
    }

    #[test]
    fn push_without_subscriber_fails() {
        let source = PushSource::new();
        assert_eq!(
            source.push(Fix::new(1.0, 2.0, 3.0)),
            Err(PushError::NotSubscribed)
        );
    }

    #[tokio::test]
    async fn delivers_pushed_fixes() {
        let source = PushSource::new();
        let mut sub = source.request_updates(request()).unwrap();
        assert!(source.is_subscribed());
        assert_eq!(source.current_request(), Some(request()));

        source.push(Fix::new(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(sub.next().await, Some(FixEvent::Fix(Fix::new(1.0, 2.0, 3.0))));
    }

    #[tokio::test]
    async fn cancel_unregisters_once() {
        let source = PushSource::new();
        let mut sub = source.request_updates(request()).unwrap();
        sub.cancel();
        sub.cancel();
        assert!(!source.is_subscribed());
        assert_eq!(
            source.push(Fix::new(1.0, 2.0, 3.0)),
            Err(PushError::NotSubscribed)
        );
        drop(sub);
    }

    #[tokio::test]
    async fn stale_cancel_keeps_newer_subscription() {
        let source = PushSource::new();
        let old = source.request_updates(request()).unwrap();
        let mut new = source.request_updates(request()).unwrap();
        drop(old);

        source.push(Fix::new(4.0, 5.0, 6.0)).unwrap();
        assert_eq!(new.next().await, Some(FixEvent::Fix(Fix::new(4.0, 5.0, 6.0))));
    }

    #[tokio::test]
    async fn revoke_notifies_and_blocks_new_subscriptions() {
        let source = PushSource::new();
        let mut sub = source.request_updates(request()).unwrap();

        source.revoke(CaptureUnavailable::PermissionDenied);
        assert_eq!(
            sub.next().await,
            Some(FixEvent::Unavailable(CaptureUnavailable::PermissionDenied))
        );
        assert_eq!(source.push(Fix::new(1.0, 1.0, 1.0)), Err(PushError::Disabled));
        assert_eq!(
            source.request_updates(request()).err(),
            Some(CaptureUnavailable::PermissionDenied)
        );

        source.grant();
        assert!(source.request_updates(request()).is_ok());
    }
}
