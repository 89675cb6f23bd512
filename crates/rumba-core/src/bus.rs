//! Fan-out of state changes to every registered observer.
//!
//! ```text
//!   publish(event, &state)
//!         │  seq += 1, snapshot state
//!         ├── subscriber 1 queue ──► drain task ──► Observer::on_event
//!         ├── subscriber 2 queue ──► drain task ──► Observer::on_event
//!         └── channel subscriber ──► caller-owned receiver
//! ```
//!
//! Delivery into the queues happens synchronously inside `publish`, in
//! subscription order, so a publish made while holding the state lock is
//! ordered with the mutation.  Each observer drains its own unbounded queue,
//! which means a slow observer never blocks the controller and nothing is
//! dropped.  Late subscribers only see events published after they joined.

use futures_util::FutureExt;
use rumba_proto::{Event, Notification, SharedState};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Receives every notification published after it subscribed.
#[async_trait::async_trait]
pub trait Observer: Send + Sync {
    async fn on_event(&self, _notification: &Notification) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    name: String,
    tx: mpsc::UnboundedSender<Arc<Notification>>,
}

pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    /// Sequence number of the last publish.
    seq: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            seq: AtomicU64::new(0),
        }
    }

    /// Register an observer.  A drain task is spawned on the current runtime;
    /// errors and panics raised by the observer are logged and the task
    /// keeps going.
    pub fn subscribe(&self, name: &str, observer: Arc<dyn Observer>) -> SubscriptionId {
        let (id, mut rx) = self.subscribe_channel(name);
        let name = name.to_string();
        tokio::spawn(async move {
            while let Some(n) = rx.recv().await {
                let result = AssertUnwindSafe(observer.on_event(&n)).catch_unwind().await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("observer {} failed on {}: {:#}", name, n.event.name(), e),
                    Err(_) => error!("observer {} panicked on {}", name, n.event.name()),
                }
            }
            debug!("observer {} drained", name);
        });
        id
    }

    /// Register a queue the caller drains itself (socket clients, tests).
    pub fn subscribe_channel(
        &self,
        name: &str,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Arc<Notification>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Subscriber {
            id,
            name: name.to_string(),
            tx,
        });
        debug!("bus: {} subscribed ({:?})", name, id);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().retain(|s| s.id != id);
    }

    /// Deliver `event` with a snapshot of `state` to every subscriber.
    /// Returns the sequence number assigned to it.
    pub fn publish(&self, event: Event, state: &SharedState) -> u64 {
        let mut subscribers = self.lock();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("event #{} {:?}", seq, event);
        let notification = Arc::new(Notification {
            seq,
            event,
            state: Arc::new(state.clone()),
        });
        subscribers.retain(|s| {
            if s.tx.send(notification.clone()).is_ok() {
                true
            } else {
                debug!("bus: dropping closed subscriber {}", s.name);
                false
            }
        });
        seq
    }

    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
