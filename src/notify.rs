use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Change;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub of applied changes, one channel per event.
///
/// Collaborators that react to catalog changes (e.g. notifying holders when
/// an event is cancelled) subscribe here instead of polling.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Change>>,
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

    /// Subscribe to changes for an event. Creates the channel if needed.
    pub fn subscribe(&self, event_id: Ulid) -> broadcast::Receiver<Change> {
        let sender = self
            .channels
            .entry(event_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a change. No-op if nobody is listening.
    pub fn send(&self, change: &Change) {
        if let Some(sender) = self.channels.get(&change.event_id()) {
            let _ = sender.send(change.clone());
        }
    }

    /// Remove a channel (e.g. when the event is deleted).
    pub fn remove(&self, event_id: &Ulid) {
        self.channels.remove(event_id);
    }
}
