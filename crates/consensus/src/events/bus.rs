//! Event bus — pub/sub over a Tokio broadcast channel with topic filtering.
//!
//! Publishing never blocks and never fails the publisher's work: a bus with
//! no subscribers drops the event silently, which is exactly what a
//! headless consensus run wants.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{Envelope, RuntimeEvent};

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to an [`EventBus`].
pub type SharedEventBus = Arc<EventBus>;

/// Topic-based pub/sub bus.
pub struct EventBus {
    sender: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this bus.
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event on a topic. Absent subscribers are not an error.
    pub fn publish(&self, topic: &str, event: RuntimeEvent) {
        let envelope = Envelope {
            topic: topic.to_string(),
            event,
        };
        match self.sender.send(envelope) {
            Ok(receivers) => debug!(topic, receivers, "event published"),
            Err(_) => debug!(topic, "event published (no receivers)"),
        }
    }

    /// Subscribe to every topic.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    /// Subscribe to a single topic.
    pub fn subscribe_topic(&self, topic: impl Into<String>) -> FilteredReceiver {
        FilteredReceiver {
            receiver: self.sender.subscribe(),
            topic: topic.into(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver that only yields envelopes for one topic.
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<Envelope>,
    topic: String,
}

impl FilteredReceiver {
    /// Receive the next event on the subscribed topic.
    pub async fn recv(&mut self) -> Result<RuntimeEvent, broadcast::error::RecvError> {
        loop {
            let envelope = self.receiver.recv().await?;
            if envelope.topic == self.topic {
                return Ok(envelope.event);
            }
        }
    }
}
