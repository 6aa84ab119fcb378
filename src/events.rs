//! Outbound change signals
//!
//! The engine publishes fire-and-forget events when backups or library data
//! change. Observers subscribe to an [`EventBus`]; publishing never blocks
//! and never fails, events are simply dropped when nobody listens.

use tokio::sync::broadcast;
use tracing::trace;

/// Channel capacity for event subscribers
const CHANNEL_CAPACITY: usize = 64;

/// A change signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupEvent {
    /// A backup file was created, renamed, deleted or imported
    BackupListChanged,
    /// Reading history was replaced
    HistoryUpdated,
    /// Tracker links were replaced
    TrackersUpdated,
    /// Categories were replaced
    CategoriesUpdated,
    /// Library entries or chapters changed
    LibraryUpdated,
    /// Source lists were replaced
    SourceListChanged,
}

/// Broadcast hub for [`BackupEvent`]s
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BackupEvent>,
}

impl EventBus {
    /// Create a new bus
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event
    pub fn publish(&self, event: BackupEvent) {
        trace!("Publishing {:?}", event);
        // Ignore send errors - they just mean there are no subscribers
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<BackupEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}

/// Drain every event currently queued on a receiver
pub fn drain(receiver: &mut broadcast::Receiver<BackupEvent>) -> Vec<BackupEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(BackupEvent::LibraryUpdated);
    }

    #[test]
    fn test_subscribers_receive_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(BackupEvent::HistoryUpdated);
        bus.publish(BackupEvent::TrackersUpdated);
        assert_eq!(
            drain(&mut rx),
            vec![BackupEvent::HistoryUpdated, BackupEvent::TrackersUpdated]
        );
        assert!(drain(&mut rx).is_empty());
    }
}
