//! Typed in-process publish/subscribe.
//!
//! Handlers run synchronously on the publishing thread, in registration
//! order. A failing or panicking handler is logged and skipped; it never
//! reaches the publisher.

use log::warn;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Handler<T> = Arc<dyn Fn(&T) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

pub struct ObserverBus<T> {
    name: &'static str,
    next_token: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionToken, Handler<T>)>>,
}

impl<T> ObserverBus<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_token: AtomicU64::new(1),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&T) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((token, Arc::new(handler)));
        token
    }

    /// Removing an unknown or already removed token does nothing.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(t, _)| *t != token);
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Delivers `event` to every handler registered at call time.
    /// Returns how many handlers completed without error.
    pub fn publish(&self, event: &T) -> usize {
        // Snapshot so handlers may (un)subscribe while being called.
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, h)| h.clone())
            .collect();

        let mut delivered = 0;
        for handler in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!("{} subscriber failed: {}", self.name, e),
                Err(_) => warn!("{} subscriber panicked", self.name),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(bus: &ObserverBus<u32>) -> (SubscriptionToken, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let token = bus.subscribe(move |v: &u32| {
            sink.lock().unwrap().push(*v);
            Ok(())
        });
        (token, seen)
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus: ObserverBus<u32> = ObserverBus::new("test");
        assert_eq!(bus.publish(&7), 0);
    }

    #[test]
    fn delivers_in_registration_order() {
        let bus = ObserverBus::new("test");
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let order = order.clone();
            bus.subscribe(move |_: &u32| {
                order.lock().unwrap().push(id);
                Ok(())
            });
        }
        assert_eq!(bus.publish(&1), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn failing_handler_does_not_block_others() {
        let bus = ObserverBus::new("test");
        bus.subscribe(|_: &u32| Err("boom".into()));
        let (_, seen) = recorder(&bus);

        assert_eq!(bus.publish(&5), 1);
        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let bus = ObserverBus::new("test");
        bus.subscribe(|_: &u32| panic!("handler bug"));
        let (_, seen) = recorder(&bus);

        assert_eq!(bus.publish(&9), 1);
        assert_eq!(*seen.lock().unwrap(), vec![9]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = ObserverBus::new("test");
        let (token, seen) = recorder(&bus);

        bus.publish(&1);
        bus.unsubscribe(token);
        bus.unsubscribe(token);
        bus.publish(&2);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn handler_may_unsubscribe_itself_during_delivery() {
        let bus = Arc::new(ObserverBus::new("test"));
        let slot: Arc<Mutex<Option<SubscriptionToken>>> = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&bus);
        let own = slot.clone();
        let token = bus.subscribe(move |_: &u32| {
            if let (Some(bus), Some(token)) = (weak.upgrade(), *own.lock().unwrap()) {
                bus.unsubscribe(token);
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(token);
        let (_, seen) = recorder(&bus);

        assert_eq!(bus.publish(&1), 2);
        assert_eq!(bus.publish(&2), 1);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
