use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Collection, Snapshot};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub, one channel per collection. Every committed change delivers
/// the full current snapshot of that collection (replace semantics) —
/// subscribers never see diffs, so redundant deliveries are harmless and a
/// lagged receiver converges on the next one.
pub struct NotifyHub {
    channels: DashMap<Collection, broadcast::Sender<Snapshot>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a collection. Creates the channel if needed.
    pub fn subscribe(&self, collection: Collection) -> broadcast::Receiver<Snapshot> {
        let sender = self
            .channels
            .entry(collection)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Deliver a snapshot. No-op if nobody is listening.
    pub fn send(&self, snapshot: Snapshot) {
        if let Some(sender) = self.channels.get(&snapshot.collection()) {
            let _ = sender.send(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Room;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(Collection::Rooms);

        let snapshot = Snapshot::Rooms(vec![Room {
            id: "KAWSAY".into(),
            name: "KAWSAY".into(),
        }]);
        hub.send(snapshot.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, snapshot);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber — should not panic
        hub.send(Snapshot::Clients(vec![]));
    }

    #[tokio::test]
    async fn collections_are_independent() {
        let hub = NotifyHub::new();
        let mut rooms_rx = hub.subscribe(Collection::Rooms);
        let mut clients_rx = hub.subscribe(Collection::Clients);

        hub.send(Snapshot::Rooms(vec![]));

        assert!(rooms_rx.recv().await.is_ok());
        assert!(clients_rx.try_recv().is_err()); // nothing published there
    }
}
