//! Deduplicating work queue keyed by object.
//!
//! A key is in at most one of three places: pending (waiting for a worker),
//! in flight (handed to a worker), or dirty (in flight and enqueued again).
//! Handing out only pending keys gives per-key mutual exclusion while
//! distinct keys proceed in parallel.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use harbor_store::ObjectKey;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    shutting_down: bool,
}

impl QueueState {
    fn push(&mut self, key: ObjectKey) -> bool {
        if self.queued.insert(key.clone()) {
            self.pending.push_back(key);
            true
        } else {
            false
        }
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Cloneable handle to a shared work queue.
#[derive(Clone, Default)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a key unless it is already pending.
    ///
    /// A key that is in flight is marked dirty instead and becomes
    /// eligible again when its worker calls [`WorkQueue::done`].
    pub fn enqueue(&self, key: ObjectKey) {
        let mut state = self.state();
        if state.shutting_down {
            return;
        }
        if state.in_flight.contains(&key) {
            trace!(key = %key, "Key in flight, marking dirty");
            state.dirty.insert(key);
            return;
        }
        let added = state.push(key);
        drop(state);
        if added {
            self.shared.notify.notify_one();
        }
    }

    /// Wait for a key and mark it in flight.
    ///
    /// Returns `None` once the queue is shut down. Keys still pending at
    /// that point are dropped; a restarted controller recovers them by
    /// resyncing from the store.
    pub async fn dequeue(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.pending.pop_front() {
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                    let more = !state.pending.is_empty();
                    drop(state);
                    if more {
                        self.shared.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Enqueue `key` after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn requeue_after(&self, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.enqueue(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key);
        });
    }

    /// Release a key handed out by [`WorkQueue::dequeue`].
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.state();
        state.in_flight.remove(key);
        let again = state.dirty.remove(key) && !state.shutting_down && state.push(key.clone());
        drop(state);
        if again {
            self.shared.notify.notify_one();
        }
    }

    /// Stop handing out work and wake every waiting worker.
    pub fn shutdown(&self) {
        self.state().shutting_down = true;
        self.shared.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Number of pending keys.
    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently handed out to workers.
    pub fn in_flight_len(&self) -> usize {
        self.state().in_flight.len()
    }
}
