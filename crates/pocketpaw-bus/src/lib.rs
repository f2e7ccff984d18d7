//! Process-wide pub/sub with three independent typed channels: inbound,
//! outbound, and system. No cross-channel ordering is guaranteed; within one
//! channel, messages from one publisher reach every subscriber in publish
//! order.

use pocketpaw_domain::model::{InboundMessage, OutboundMessage, SystemEvent};
use tokio::sync::{broadcast, mpsc, Mutex};

/// Snapshot of queue depths / subscriber counts, for health introspection.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusMetrics {
    pub inbound_len: usize,
    pub outbound_subscribers: usize,
    pub system_subscribers: usize,
}

pub struct Bus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    outbound_tx: broadcast::Sender<OutboundMessage>,
    system_tx: broadcast::Sender<SystemEvent>,
}

impl Bus {
    pub fn new(inbound_capacity: usize, outbound_capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity.max(1));
        let (outbound_tx, _) = broadcast::channel(outbound_capacity.max(1));
        let (system_tx, _) = broadcast::channel(outbound_capacity.max(1));
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            outbound_tx,
            system_tx,
        }
    }

    /// Fails-never: back-pressures the publisher when the queue is full
    /// rather than dropping or erroring.
    pub async fn publish_inbound(&self, msg: InboundMessage) {
        // The only failure mode of `send` on a bounded mpsc channel is the
        // receiver having been dropped, which only happens at process
        // shutdown — nothing useful to do with that error here.
        let _ = self.inbound_tx.send(msg).await;
    }

    /// Single-consumer contract: the Agent Loop takes the receiver exactly
    /// once at startup. A second call panics — that would silently split
    /// inbound traffic between two consumers, which no caller wants.
    pub async fn consume_inbound(&self) -> mpsc::Receiver<InboundMessage> {
        self.inbound_rx
            .lock()
            .await
            .take()
            .expect("Bus::consume_inbound called more than once")
    }

    pub fn publish_outbound(&self, msg: OutboundMessage) {
        // broadcast::send errors only when there are zero subscribers;
        // that's a legitimate state (no channel adapters connected yet).
        let _ = self.outbound_tx.send(msg);
    }

    pub fn publish_system(&self, event: SystemEvent) {
        let _ = self.system_tx.send(event);
    }

    pub fn subscribe_outbound(&self) -> broadcast::Receiver<OutboundMessage> {
        self.outbound_tx.subscribe()
    }

    pub fn subscribe_system(&self) -> broadcast::Receiver<SystemEvent> {
        self.system_tx.subscribe()
    }

    pub fn metrics(&self) -> BusMetrics {
        BusMetrics {
            inbound_len: self.inbound_tx.max_capacity() - self.inbound_tx.capacity(),
            outbound_subscribers: self.outbound_tx.receiver_count(),
            system_subscribers: self.system_tx.receiver_count(),
        }
    }
}
