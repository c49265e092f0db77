use tokio::sync::broadcast;

use crate::messages::TradingEvent;

/// A fire-and-forget publish/subscribe channel for [`TradingEvent`]s.
///
/// Cloning is cheap; all clones publish into the same underlying channel.
/// Publishing never blocks and never fails the publisher: when nobody is
/// subscribed the event is simply dropped, and a subscriber that falls more
/// than `capacity` events behind loses the oldest ones.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TradingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to every current subscriber.
    pub fn publish(&self, event: TradingEvent) {
        // A send error only means there is no subscriber right now.
        let _ = self.sender.send(event);
    }

    /// Registers a new subscriber. Events published before this call are not
    /// replayed to it.
    pub fn subscribe(&self) -> broadcast::Receiver<TradingEvent> {
        self.sender.subscribe()
    }
}
