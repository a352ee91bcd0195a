//! Event-name → listener fan-out.
//!
//! Every bound listener owns a bounded buffer. Delivery is a non-blocking
//! `try_send`: a listener that is not draining its buffer loses the overflow
//! (logged at `warn`) instead of stalling the read loop or its siblings.
//! Per-listener order follows arrival order. A dropped [`Listener`] is pruned
//! on the next dispatch or bind for its event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one binding, for [`crate::Client::unbind`] and
/// [`crate::Channel::unbind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Receiving end of a binding.
#[derive(Debug)]
pub struct Listener<T> {
    id: ListenerId,
    rx: mpsc::Receiver<T>,
}

impl<T> Listener<T> {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Wait for the next delivery. `None` once the binding is removed and
    /// the buffer is drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take a buffered delivery without waiting.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }
}

/// Bindings keyed by event name.
#[derive(Debug)]
pub(crate) struct EventRouter<T> {
    capacity: usize,
    bindings: HashMap<String, HashMap<ListenerId, mpsc::Sender<T>>>,
}

impl<T: Clone> EventRouter<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            bindings: HashMap::new(),
        }
    }

    pub(crate) fn bind(&mut self, event: &str) -> Listener<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));

        let listeners = self.bindings.entry(event.to_string()).or_default();
        listeners.retain(|_, tx| !tx.is_closed());
        listeners.insert(id, tx);

        Listener { id, rx }
    }

    /// Remove `ids` from `event`, or every binding for `event` when `ids` is
    /// empty.
    pub(crate) fn unbind(&mut self, event: &str, ids: &[ListenerId]) {
        if ids.is_empty() {
            self.bindings.remove(event);
            return;
        }

        if let Some(listeners) = self.bindings.get_mut(event) {
            for id in ids {
                listeners.remove(id);
            }
            if listeners.is_empty() {
                self.bindings.remove(event);
            }
        }
    }

    /// Deliver a copy of `item` to every listener bound to `event`, pruning
    /// listeners that were dropped. Returns how many listeners accepted it.
    pub(crate) fn dispatch(&mut self, event: &str, item: &T) -> usize {
        let Some(listeners) = self.bindings.get_mut(event) else {
            return 0;
        };

        let mut delivered = 0;
        listeners.retain(|id, tx| match tx.try_send(item.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(event = %event, listener = ?id, "listener buffer full, dropping event");
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::trace!(event = %event, listener = ?id, "listener dropped");
                false
            }
        });
        if listeners.is_empty() {
            self.bindings.remove(event);
        }
        delivered
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self, event: &str) -> usize {
        self.bindings.get(event).map_or(0, HashMap::len)
    }
}
