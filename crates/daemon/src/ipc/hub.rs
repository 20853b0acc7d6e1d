//! Client fan-out.
//!
//! Every connected client has a bounded queue drained by its own writer task.
//! Events are encoded once and pushed with `try_send`: when a client's queue
//! is full the event is dropped for that client only and the client is
//! flagged as backpressured, so a slow reader never stalls the others.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use protocol::{encode_line, DaemonEvent};
use tokio::sync::mpsc;

use super::ClientId;

/// Default per-client queue capacity, in events.
pub const DEFAULT_CLIENT_CAPACITY: usize = 1024;

struct ClientHandle {
    tx: mpsc::Sender<Arc<str>>,
    backpressured: AtomicBool,
    dropped: AtomicU64,
}

impl ClientHandle {
    /// Returns false if the client is gone.
    fn try_send(&self, id: ClientId, line: Arc<str>) -> bool {
        match self.tx.try_send(line) {
            Ok(()) => {
                if self.backpressured.swap(false, Ordering::Relaxed) {
                    tracing::debug!(client_id = id, "Client recovered from backpressure");
                }
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if !self.backpressured.swap(true, Ordering::Relaxed) {
                    tracing::warn!(client_id = id, dropped = dropped, "Client is backpressured, dropping events");
                }
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Registry of connected clients' outgoing queues.
pub struct ClientHub {
    clients: DashMap<ClientId, ClientHandle>,
    capacity: usize,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CLIENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            clients: DashMap::new(),
            capacity,
        }
    }

    /// Adds a client and returns the receiving end of its queue.
    pub fn register(&self, id: ClientId) -> mpsc::Receiver<Arc<str>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.clients.insert(
            id,
            ClientHandle {
                tx,
                backpressured: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
            },
        );
        rx
    }

    /// Removes a client. Its writer finishes once the queue drains.
    pub fn unregister(&self, id: ClientId) -> bool {
        self.clients.remove(&id).is_some()
    }

    /// Sends an event to one client.
    pub fn send_to(&self, id: ClientId, event: &DaemonEvent) -> bool {
        let Some(line) = encode(event) else {
            return false;
        };
        let alive = match self.clients.get(&id) {
            Some(client) => client.try_send(id, line),
            None => return false,
        };
        if !alive {
            self.clients.remove(&id);
        }
        alive
    }

    /// Sends an event to every client. Returns how many were reached.
    pub fn broadcast(&self, event: &DaemonEvent) -> usize {
        let Some(line) = encode(event) else {
            return 0;
        };

        let mut reached = 0;
        let mut closed = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().try_send(*entry.key(), Arc::clone(&line)) {
                reached += 1;
            } else {
                closed.push(*entry.key());
            }
        }
        for id in closed {
            tracing::debug!(client_id = id, "Pruning closed client");
            self.clients.remove(&id);
        }
        reached
    }

    /// Clients whose queue overflowed since it last drained, in id order.
    pub fn backpressured(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|c| c.backpressured.load(Ordering::Relaxed))
            .map(|c| *c.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Drops every queue; writers exit after flushing what is queued.
    pub fn clear(&self) {
        self.clients.clear();
    }
}

impl Default for ClientHub {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(event: &DaemonEvent) -> Option<Arc<str>> {
    match encode_line(event) {
        Ok(line) => Some(Arc::from(line)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode event");
            None
        }
    }
}
