//! Delivers frequency arrays to registered listeners

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Listener = Arc<dyn Fn(&[f32]) + Send + Sync + 'static>;

/// Returned by `register`; pass to `unregister` to stop delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

/// Listener registry. Each broadcast delivers the same array to every
/// listener registered when the broadcast began, synchronously.
#[derive(Default)]
pub struct Broadcaster {
    listeners: Mutex<Vec<(ListenerHandle, Listener)>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: impl Fn(&[f32]) + Send + Sync + 'static) -> ListenerHandle {
        let handle = ListenerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((handle, Arc::new(listener)));
        handle
    }

    /// Returns false if the handle was not registered
    pub fn unregister(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(h, _)| *h != handle);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Deliver `frequencies` to the current listeners. Returns how many
    /// listeners were called.
    pub fn broadcast(&self, frequencies: &[f32]) -> usize {
        // Snapshot so listeners may register or unregister from a callback
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in &listeners {
            listener(frequencies);
        }
        listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listener_receives_the_same_array() {
        let broadcaster = Broadcaster::new();
        let received = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..3 {
            let received = received.clone();
            broadcaster.register(move |data| received.lock().push(data.to_vec()));
        }

        assert_eq!(broadcaster.broadcast(&[0.1, 0.2]), 3);
        let received = received.lock();
        assert_eq!(received.len(), 3);
        assert!(received.iter().all(|d| d == &vec![0.1, 0.2]));
    }

    #[test]
    fn unregistered_listener_stops_receiving() {
        let broadcaster = Broadcaster::new();
        let count = Arc::new(AtomicU64::new(0));
        let handle = {
            let count = count.clone();
            broadcaster.register(move |_| {
                count.fetch_add(1, Ordering::Relaxed);
            })
        };

        broadcaster.broadcast(&[1.0]);
        assert!(broadcaster.unregister(handle));
        assert!(!broadcaster.unregister(handle));
        broadcaster.broadcast(&[1.0]);

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(broadcaster.listener_count(), 0);
    }

    #[test]
    fn listener_registered_during_broadcast_waits_for_next_cycle() {
        let broadcaster = Arc::new(Broadcaster::new());
        let late_calls = Arc::new(AtomicU64::new(0));

        {
            let registry = broadcaster.clone();
            let late_calls = late_calls.clone();
            let registered = Arc::new(Mutex::new(false));
            broadcaster.register(move |_| {
                let mut registered = registered.lock();
                if !*registered {
                    *registered = true;
                    let late_calls = late_calls.clone();
                    registry.register(move |_| {
                        late_calls.fetch_add(1, Ordering::Relaxed);
                    });
                }
            });
        }

        assert_eq!(broadcaster.broadcast(&[0.5]), 1);
        assert_eq!(late_calls.load(Ordering::Relaxed), 0);

        assert_eq!(broadcaster.broadcast(&[0.5]), 2);
        assert_eq!(late_calls.load(Ordering::Relaxed), 1);
    }
}
