//! Generic in-process publish/subscribe with explicit unsubscription,
//! per the design note in section 9: a registry of callbacks plus a
//! subscription handle that removes the callback on drop; the publisher
//! iterates a snapshot copy so a subscriber added or dropped mid-publish
//! never deadlocks or mutates the set a publish is iterating.
//!
//! Used for both the InstanceNotificationBus and the
//! ApplicationEntityChangeBus (section 2 items 3-4).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscriber<T> {
    id: u64,
    callback: Callback<T>,
}

/// A publish/subscribe bus for events of type `T`.
pub struct Bus<T> {
    subscribers: Arc<Mutex<Vec<Subscriber<T>>>>,
    next_id: AtomicU64,
}

impl<T> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Bus<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `callback`; returns a handle that unsubscribes on drop.
    pub fn subscribe<F>(&self, callback: F) -> Subscription<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().push(Subscriber {
            id,
            callback: Arc::new(callback),
        });
        Subscription {
            id,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Publishes `event` to a snapshot of current subscribers.
    pub fn publish(&self, event: &T) {
        let snapshot: Vec<Callback<T>> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|s| Arc::clone(&s.callback))
            .collect();
        for callback in snapshot {
            callback(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

/// Removes its subscriber from the owning `Bus` when dropped.
pub struct Subscription<T> {
    id: u64,
    subscribers: Arc<Mutex<Vec<Subscriber<T>>>>,
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.subscribers.lock().unwrap().retain(|s| s.id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let bus: Bus<u32> = Bus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&count);
        let _sub1 = bus.subscribe(move |_| {
            c1.fetch_add(1, Ordering::Relaxed);
        });
        let c2 = Arc::clone(&count);
        let _sub2 = bus.subscribe(move |_| {
            c2.fetch_add(1, Ordering::Relaxed);
        });
        bus.publish(&42);
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_unsubscribe_on_drop() {
        let bus: Bus<u32> = Bus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&count);
        let sub = bus.subscribe(move |_| {
            c1.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(&1);
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }
}
