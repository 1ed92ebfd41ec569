//! どこで: 型付きpub/sub / 何を: start/stop/block/blockLogs/pendingTxの配送 / なぜ: 購読者をFIFOで遅延なく追えるようにするため

use crossbeam_channel::{unbounded, Receiver, Sender};
use hakoniwa_db::chain_data::{BlockLogs, StoredBlock, StoredTx};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
pub enum ChainEvent {
    Started,
    Stopped,
    Block(StoredBlock),
    BlockLogs(BlockLogs),
    PendingTransaction(StoredTx),
}

/// 購読者ごとに独立したunboundedチャネル。切断された受け手はsend時に間引く。
#[derive(Clone, Default)]
pub struct EventHub {
    subscribers: Arc<Mutex<Vec<Sender<ChainEvent>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ChainEvent> {
        let (sender, receiver) = unbounded();
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.push(sender);
        receiver
    }

    pub fn publish(&self, event: ChainEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_is_fifo_per_subscriber() {
        let hub = EventHub::new();
        let receiver = hub.subscribe();
        hub.publish(ChainEvent::Started);
        hub.publish(ChainEvent::Stopped);
        assert!(matches!(receiver.recv().unwrap(), ChainEvent::Started));
        assert!(matches!(receiver.recv().unwrap(), ChainEvent::Stopped));
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let hub = EventHub::new();
        drop(hub.subscribe());
        hub.publish(ChainEvent::Started);
        let receiver = hub.subscribe();
        hub.publish(ChainEvent::Stopped);
        assert!(matches!(receiver.recv().unwrap(), ChainEvent::Stopped));
    }
}
