//! Per-session fan-out registry. Observers get their own unbounded
//! queue so one slow or dead connection never stalls delivery to the
//! others; delivery is best-effort, at-most-once per observer.

pub mod bridge;

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

pub use bridge::DeltaPublisher;

/// Token returned by `subscribe`, used for idempotent removal.
#[derive(Debug)]
pub struct SubscriptionHandle {
    session_id: String,
    id: u64,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    sessions: HashMap<String, HashMap<u64, mpsc::UnboundedSender<String>>>,
}

#[derive(Default)]
pub struct SessionRelay {
    registry: Mutex<Registry>,
}

impl SessionRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer of `session_id`. No limit on observers
    /// per session; spectators are allowed.
    pub fn subscribe(
        &self,
        session_id: &str,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock().expect("relay registry poisoned");
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(id, tx);
        (
            SubscriptionHandle {
                session_id: session_id.to_string(),
                id,
            },
            rx,
        )
    }

    /// Sends `delta` to every current observer of `session_id`.
    /// Publishing happens under the registry lock, so observers of a
    /// single session see deltas in the order they were published.
    /// Closed observers are dropped silently and removed. Returns
    /// the number of observers reached.
    pub fn publish(&self, session_id: &str, delta: &str) -> usize {
        let mut registry = self.registry.lock().expect("relay registry poisoned");
        let Some(observers) = registry.sessions.get_mut(session_id) else {
            return 0;
        };

        let mut delivered = 0;
        observers.retain(|_, tx| {
            if tx.send(delta.to_string()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });
        if observers.is_empty() {
            registry.sessions.remove(session_id);
        }
        delivered
    }

    /// Idempotent removal; also reached implicitly when a connection
    /// closes and its receiver is dropped.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut registry = self.registry.lock().expect("relay registry poisoned");
        if let Some(observers) = registry.sessions.get_mut(&handle.session_id) {
            observers.remove(&handle.id);
            if observers.is_empty() {
                registry.sessions.remove(&handle.session_id);
            }
        }
    }

    pub fn observer_count(&self, session_id: &str) -> usize {
        let registry = self.registry.lock().expect("relay registry poisoned");
        registry
            .sessions
            .get(session_id)
            .map(|observers| observers.len())
            .unwrap_or(0)
    }
}
