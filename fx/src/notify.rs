//! Observer hooks fired when cached rates change.

use tokio::sync::broadcast;

/// Cache change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FxEvent {
    /// Spot quotes replaced or reset.
    Quotes,
    /// A history series arrived.
    History,
}

/// Receives cache change notifications. Called from the completion task,
/// so implementations must not block.
pub trait Notifier: Send + Sync {
    fn on_quotes(&self);
    fn on_history(&self);
}

/// Notifier that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn on_quotes(&self) {}
    fn on_history(&self) {}
}

/// Fans events out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<FxEvent>,
}

impl BroadcastNotifier {
    /// Create a notifier buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FxEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: FxEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier for BroadcastNotifier {
    fn on_quotes(&self) {
        self.publish(FxEvent::Quotes);
    }

    fn on_history(&self) {
        self.publish(FxEvent::History);
    }
}
