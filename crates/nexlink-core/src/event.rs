/*!
 * Event system for Nexlink.
 *
 * A typed publish/subscribe bus. Devices publish lifecycle events (module
 * activation, refresh failures) through it so that callers can observe a
 * session without polling.
 */
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Maximum number of events that can be buffered in a channel
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

type EventSender<T> = broadcast::Sender<T>;

/// Receiver half of an event subscription
pub type EventReceiver<T> = broadcast::Receiver<T>;

/// Event bus for publishing and subscribing to typed events
#[derive(Debug)]
pub struct EventBus {
    channels: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    channel_capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Create a new event bus with a specific channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            channel_capacity: capacity,
        }
    }

    fn sender_for<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventSender<T>> {
        let type_id = TypeId::of::<T>();
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| Error::event("Failed to lock channels"))?;

        if let Some(sender) = channels.get(&type_id) {
            sender
                .downcast_ref::<EventSender<T>>()
                .cloned()
                .ok_or_else(|| Error::event("Failed to downcast sender"))
        } else {
            let (sender, _) = broadcast::channel(self.channel_capacity);
            channels.insert(type_id, Box::new(sender.clone()));
            Ok(sender)
        }
    }

    /// Publish an event
    ///
    /// Returns the number of receivers the event was delivered to.
    pub fn publish<T: Clone + Debug + Send + Sync + 'static>(&self, event: T) -> Result<usize> {
        let sender = self.sender_for::<T>()?;

        let receivers = sender.receiver_count();
        if receivers == 0 {
            debug!("No receivers for event");
            return Ok(0);
        }

        match sender.send(event) {
            Ok(n) => {
                trace!("Published event to {} receivers", n);
                Ok(n)
            }
            Err(e) => {
                warn!("Failed to publish event: {}", e);
                Err(Error::event(format!("Failed to publish event: {}", e)))
            }
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventReceiver<T>> {
        Ok(self.sender_for::<T>()?.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared event bus that can be cloned
#[derive(Debug, Clone)]
pub struct SharedEventBus(Arc<EventBus>);

impl SharedEventBus {
    /// Create a new shared event bus
    pub fn new() -> Self {
        Self(Arc::new(EventBus::new()))
    }

    /// Create a new shared event bus with a specific channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Arc::new(EventBus::with_capacity(capacity)))
    }

    /// Publish an event
    pub fn publish<T: Clone + Debug + Send + Sync + 'static>(&self, event: T) -> Result<usize> {
        self.0.publish(event)
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventReceiver<T>> {
        self.0.subscribe()
    }
}

impl Default for SharedEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct TestEvent {
        id: u32,
        message: String,
    }

    #[tokio::test]
    async fn test_publish_subscribe() -> Result<()> {
        let event_bus = EventBus::new();
        let mut rx = event_bus.subscribe::<TestEvent>()?;

        let event = TestEvent {
            id: 1,
            message: "Hello, world!".to_string(),
        };

        let receivers = event_bus.publish(event.clone())?;
        assert_eq!(receivers, 1);

        let received = rx.recv().await.map_err(|e| Error::event(e.to_string()))?;
        assert_eq!(received.id, event.id);
        assert_eq!(received.message, event.message);

        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_subscribers() -> Result<()> {
        let event_bus = SharedEventBus::new();
        let mut rx1 = event_bus.subscribe::<TestEvent>()?;
        let mut rx2 = event_bus.subscribe::<TestEvent>()?;

        let event = TestEvent {
            id: 2,
            message: "Test message".to_string(),
        };

        let receivers = event_bus.publish(event.clone())?;
        assert_eq!(receivers, 2);

        let received1 = rx1.recv().await.map_err(|e| Error::event(e.to_string()))?;
        let received2 = rx2.recv().await.map_err(|e| Error::event(e.to_string()))?;

        assert_eq!(received1.id, event.id);
        assert_eq!(received2.id, event.id);

        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_event_types() -> Result<()> {
        #[derive(Debug, Clone)]
        struct OtherEvent {
            value: String,
        }

        let event_bus = EventBus::new();
        let mut rx1 = event_bus.subscribe::<TestEvent>()?;
        let mut rx2 = event_bus.subscribe::<OtherEvent>()?;

        event_bus.publish(TestEvent {
            id: 3,
            message: "Test event".to_string(),
        })?;
        event_bus.publish(OtherEvent {
            value: "Other event".to_string(),
        })?;

        // Each subscriber should receive only its event type
        let received1 = rx1.recv().await.map_err(|e| Error::event(e.to_string()))?;
        let received2 = rx2.recv().await.map_err(|e| Error::event(e.to_string()))?;

        assert_eq!(received1.id, 3);
        assert_eq!(received2.value, "Other event");

        Ok(())
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() -> Result<()> {
        let event_bus = EventBus::new();
        let receivers = event_bus.publish(TestEvent {
            id: 4,
            message: "Nobody listens".to_string(),
        })?;
        assert_eq!(receivers, 0);
        Ok(())
    }
}
