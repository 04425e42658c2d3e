use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::bus::{ObserverBus, SubscriptionToken};
use crate::store::Sample;

/// Most recent live samples, oldest first, as drawn on a map.
///
/// Fed from the sample bus; unsubscribes when dropped.
pub struct LiveTrail {
    points: Arc<Mutex<VecDeque<Sample>>>,
    bus: Arc<ObserverBus<Sample>>,
    token: SubscriptionToken,
}

impl LiveTrail {
    pub fn attach(bus: &Arc<ObserverBus<Sample>>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let points = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));

        let sink = points.clone();
        let token = bus.subscribe(move |sample: &Sample| {
            let mut points = sink.lock().unwrap_or_else(PoisonError::into_inner);
            if points.len() == capacity {
                points.pop_front();
            }
            points.push_back(*sample);
            Ok(())
        });

        Self {
            points,
            bus: bus.clone(),
            token,
        }
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.lock().iter().copied().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Sample>> {
        self.points.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LiveTrail {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.token);
    }
}
