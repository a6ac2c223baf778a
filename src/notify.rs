use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::dispatch::EventSink;
use crate::model::LifecycleEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Live lifecycle feed per space. Subscribers that fall behind lose the
/// oldest events, same as any other best-effort consumer.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<LifecycleEvent>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events for a space. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<LifecycleEvent> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening. A channel whose last subscriber has
    /// gone is dropped here, so the map only holds watched spaces.
    pub fn send(&self, event: &LifecycleEvent) {
        let delivered = match self.channels.get(&event.resource_id) {
            Some(sender) => sender.send(event.clone()).is_ok(),
            None => return,
        };
        if !delivered {
            // Re-checked under the shard lock; a concurrent subscribe keeps it.
            self.channels
                .remove_if(&event.resource_id, |_, sender| sender.receiver_count() == 0);
        }
    }
}

#[async_trait]
impl EventSink for NotifyHub {
    async fn handle(&self, event: &LifecycleEvent) {
        self.send(event);
    }
}
