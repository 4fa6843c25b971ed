//! Per-client outbound queues.
//!
//! Every connection thread owns the receiving end of a bounded channel;
//! anything that wants to reach a client goes through [`ClientRegistry`].
//! Sends never block. A client whose queue is full has missed an update it
//! cannot recover, so it is unregistered: its connection drains what is
//! queued, closes, and the client resyncs on reconnect.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use parking_lot::Mutex;

use cellsync_engine::ClientId;
use cellsync_protocol::{encode_message, ServerMessage};

/// An encoded, newline-terminated message shared between recipients.
pub type OutboundLine = Arc<str>;

#[derive(Clone)]
pub struct ClientRegistry {
    senders: Arc<Mutex<BTreeMap<ClientId, SyncSender<OutboundLine>>>>,
    next_id: Arc<AtomicU64>,
    overflowed: Arc<AtomicU64>,
    queue_depth: usize,
}

impl ClientRegistry {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            senders: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            overflowed: Arc::new(AtomicU64::new(0)),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Allocate a client id and its outbound queue.
    pub fn register(&self) -> (ClientId, Receiver<OutboundLine>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::sync_channel(self.queue_depth);
        self.senders.lock().insert(id, tx);
        (id, rx)
    }

    /// Drop a client's sender. Its receiver drains what is queued and then
    /// reports disconnection.
    pub fn unregister(&self, id: ClientId) {
        self.senders.lock().remove(&id);
    }

    /// Drop every sender (server shutdown).
    pub fn unregister_all(&self) {
        self.senders.lock().clear();
    }

    pub fn send_to(&self, id: ClientId, message: &ServerMessage) {
        if let Some(line) = encode(message) {
            self.deliver(std::iter::once(&id), line);
        }
    }

    /// Encode once and queue for every listed client.
    pub fn broadcast<'a>(&self, recipients: impl IntoIterator<Item = &'a ClientId>, message: &ServerMessage) {
        if let Some(line) = encode(message) {
            self.deliver(recipients, line);
        }
    }

    /// Queue for every registered client.
    pub fn broadcast_all(&self, message: &ServerMessage) {
        let Some(line) = encode(message) else {
            return;
        };
        let ids: Vec<ClientId> = self.senders.lock().keys().copied().collect();
        self.deliver(&ids, line);
    }

    pub fn connection_count(&self) -> usize {
        self.senders.lock().len()
    }

    /// Clients disconnected because their queue was full.
    pub fn overflowed_clients_count(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    fn deliver<'a>(&self, recipients: impl IntoIterator<Item = &'a ClientId>, line: OutboundLine) {
        let mut senders = self.senders.lock();
        let mut overflowed = Vec::new();
        for id in recipients {
            let Some(tx) = senders.get(id) else {
                continue;
            };
            match tx.try_send(Arc::clone(&line)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => overflowed.push(*id),
                // Connection thread already gone; it unregisters itself
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        for id in overflowed {
            senders.remove(&id);
            self.overflowed.fetch_add(1, Ordering::Relaxed);
            log::warn!("Client {} fell behind (queue full), disconnecting", id);
        }
    }
}

fn encode(message: &ServerMessage) -> Option<OutboundLine> {
    match encode_message(message) {
        Ok(line) => Some(Arc::from(line)),
        Err(e) => {
            log::error!("Failed to encode {:?}: {}", message, e);
            None
        }
    }
}
